//! Stable-swap bonding curve math.
//!
//! Integer replica of the on-chain StableSwap-NG pricing: invariant `D`,
//! counter balance `y`, the off-peg dynamic fee and the resulting `get_dy`
//! quote. Amplification is the pool's `A_precise` (A * 100). Every routine
//! must agree with the pool to the last integer unit.
//!
//! Non-convergence is reported as `None`; callers skip the swap-dependent
//! decision instead of failing.

use alloy::primitives::U256;

use crate::u256_math::PRECISION;

/// `A_precise` scale.
pub const A_PRECISION: U256 = U256::from_limbs([100u64, 0, 0, 0]);

/// Fee denominator (1e10).
pub const FEE_DENOMINATOR: U256 = U256::from_limbs([10_000_000_000u64, 0, 0, 0]);

const MAX_ITERATIONS: usize = 255;

#[inline(always)]
fn converged(a: U256, b: U256) -> bool {
    if a > b {
        a - b <= U256::from(1u64)
    } else {
        b - a <= U256::from(1u64)
    }
}

/// Newton iteration for the invariant `D` over already rate-scaled balances.
///
/// Returns `Some(0)` for an empty pool and `None` when any balance is zero
/// or the iteration fails to settle within 255 rounds.
pub fn solve_invariant(balances: &[U256], amp: U256) -> Option<U256> {
    let n = U256::from(balances.len());
    let s = balances.iter().fold(U256::ZERO, |acc, x| acc + *x);
    if s.is_zero() {
        return Some(U256::ZERO);
    }
    if balances.iter().any(|x| x.is_zero()) {
        return None;
    }

    let ann = amp * n;
    let n_pow_n = n.pow(n);
    let mut d = s;
    for _ in 0..MAX_ITERATIONS {
        let mut dp = d;
        for x in balances {
            dp = dp * d / *x;
        }
        dp /= n_pow_n;

        let d_prev = d;
        let numerator = (ann * s / A_PRECISION + dp * n) * d;
        let denominator =
            ann.saturating_sub(A_PRECISION) * d / A_PRECISION + (n + U256::from(1u64)) * dp;
        if denominator.is_zero() {
            return None;
        }
        d = numerator / denominator;
        if converged(d, d_prev) {
            return Some(d);
        }
    }
    None
}

/// Newton iteration `y = (y^2 + c) / (2y + b - D)` starting from `D`.
fn newton_y(b: U256, c: U256, d: U256) -> Option<U256> {
    let mut y = d;
    for _ in 0..MAX_ITERATIONS {
        let y_prev = y;
        let denominator = (y + y + b).checked_sub(d)?;
        if denominator.is_zero() {
            return None;
        }
        y = (y * y + c) / denominator;
        if converged(y, y_prev) {
            return Some(y);
        }
    }
    None
}

/// Balance of `index_out` that keeps `d` constant once `index_in` holds
/// `new_balance_in`. Balances are rate-scaled.
pub fn solve_counter_balance(
    index_in: usize,
    index_out: usize,
    new_balance_in: U256,
    balances: &[U256],
    amp: U256,
    d: U256,
) -> Option<U256> {
    if index_in == index_out || index_in >= balances.len() || index_out >= balances.len() {
        return None;
    }
    let n = U256::from(balances.len());
    let ann = amp * n;
    if ann.is_zero() {
        return None;
    }

    let mut s = U256::ZERO;
    let mut c = d;
    for (i, balance) in balances.iter().enumerate() {
        if i == index_out {
            continue;
        }
        let x = if i == index_in { new_balance_in } else { *balance };
        if x.is_zero() {
            return None;
        }
        s += x;
        c = c * d / (x * n);
    }
    c = c * d * A_PRECISION / (ann * n);
    let b = s + d * A_PRECISION / ann;
    newton_y(b, c, d)
}

/// Off-peg fee: grows as the two averaged balances diverge.
pub fn dynamic_fee(xpi: U256, xpj: U256, base_fee: U256, offpeg_multiplier: U256) -> U256 {
    if offpeg_multiplier <= FEE_DENOMINATOR {
        return base_fee;
    }
    let xps2 = (xpi + xpj) * (xpi + xpj);
    if xps2.is_zero() {
        return base_fee;
    }
    offpeg_multiplier * base_fee
        / ((offpeg_multiplier - FEE_DENOMINATOR) * U256::from(4u64) * xpi * xpj / xps2
            + FEE_DENOMINATOR)
}

/// Parameters of a stable pool as read from chain.
#[derive(Debug, Clone, Default)]
pub struct StablePool {
    /// Native token balances
    pub balances: Vec<U256>,
    /// Per-token multipliers bringing balances to a common scale
    pub rates: Vec<U256>,
    /// `A_precise`
    pub amp: U256,
    /// Base fee (1e10 scale)
    pub base_fee: U256,
    /// Off-peg fee multiplier (1e10 scale)
    pub offpeg_multiplier: U256,
}

impl StablePool {
    /// Net output of swapping `amount_in` of `index_in` for `index_out`.
    pub fn quote(&self, index_in: usize, index_out: usize, amount_in: U256) -> Option<U256> {
        quote_output(
            &self.balances,
            &self.rates,
            self.amp,
            self.base_fee,
            self.offpeg_multiplier,
            index_in,
            index_out,
            amount_in,
        )
    }

    /// Marginal price of token 1 in units of token 0, 1e18 scale.
    pub fn spot_price(&self) -> Option<U256> {
        let xp = scaled(&self.balances, &self.rates)?;
        spot_price(&xp, self.amp)
    }
}

fn scaled(balances: &[U256], rates: &[U256]) -> Option<Vec<U256>> {
    if balances.len() != rates.len() {
        return None;
    }
    Some(balances.iter().zip(rates).map(|(b, r)| *b * *r).collect())
}

/// Net output amount after the dynamic fee, in native units of `index_out`.
#[allow(clippy::too_many_arguments)]
pub fn quote_output(
    balances: &[U256],
    rates: &[U256],
    amp: U256,
    base_fee: U256,
    offpeg_multiplier: U256,
    index_in: usize,
    index_out: usize,
    amount_in: U256,
) -> Option<U256> {
    let xp = scaled(balances, rates)?;
    if index_in >= xp.len() || index_out >= xp.len() || rates[index_out].is_zero() {
        return None;
    }
    let d = solve_invariant(&xp, amp)?;
    let new_x = xp[index_in] + amount_in * rates[index_in];
    let y = solve_counter_balance(index_in, index_out, new_x, &xp, amp, d)?;

    let Some(dy) = xp[index_out].checked_sub(y + U256::from(1u64)) else {
        return Some(U256::ZERO);
    };
    let fee = dynamic_fee(
        (xp[index_in] + new_x) / U256::from(2u64),
        (xp[index_out] + y) / U256::from(2u64),
        base_fee,
        offpeg_multiplier,
    ) * dy
        / FEE_DENOMINATOR;

    Some((dy - fee) / rates[index_out])
}

/// Marginal price of coin 1 in units of coin 0 for a two-coin pool, 1e18 scale.
pub fn spot_price(xp: &[U256], amp: U256) -> Option<U256> {
    if xp.len() != 2 || xp.iter().any(|x| x.is_zero()) {
        return None;
    }
    let n = U256::from(2u64);
    let d = solve_invariant(xp, amp)?;
    let ann = amp * n;

    let mut dr = d / n.pow(n);
    for x in xp {
        dr = dr * d / *x;
    }
    let xp0_a = ann * xp[0] / A_PRECISION;
    let denominator = xp0_a + dr;
    if denominator.is_zero() {
        return None;
    }
    Some(PRECISION * (xp0_a + dr * xp[0] / xp[1]) / denominator)
}
