//! Batch sizing for rebalance and liquidation actions.
//!
//! One algorithm covers both bands and both books. The differences are
//! carried by [`SizingPolicy`] (caps and thresholds) and [`Liquidity`]
//! (what the executor may draw on), so the keeper never branches on the
//! book here.

use alloy::primitives::{Address, U256};
use tracing::debug;

use crate::eligibility::{EligibleTick, ScanBand};
use crate::stable_math::StablePool;
use crate::u256_math::{format_units, min, net_bonus, FEE_PRECISION, PRECISION};

/// USDC carries 6 decimals; fxUSD and the debt accounting carry 18.
pub const USDC_SCALAR: U256 = U256::from_limbs([1_000_000_000_000u64, 0, 0, 0]);

/// Stable-pool coin index of USDC.
pub const USDC_INDEX: usize = 0;
/// Stable-pool coin index of fxUSD.
pub const FXUSD_INDEX: usize = 1;

/// Caps and thresholds for one book, or one pool of the short book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizingPolicy {
    /// Ticks batched into one action
    pub max_ticks: usize,
    /// Raw debt after which no further tick is added
    pub max_debt: U256,
    /// Batches below this total are dropped
    pub dust: U256,
    /// Liquidations at or above this total borrow instead of spending balances
    pub flash_threshold: U256,
    /// Rebalances paying less net bonus are dropped
    pub min_rebalance_bonus: U256,
}

/// Balances the sizer may count on for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liquidity {
    /// Added to a tick's collateral when sizing a liquidation
    pub extra_balance: U256,
    /// Per-tick repayment ceiling
    pub max_liquidity: U256,
    /// `scalar * rate` of the debt token; totals are `raw * 1e18 / scaling`
    pub scaling: U256,
}

impl Liquidity {
    /// Long-book liquidity, where totals equal raw amounts.
    pub fn long(extra_balance: U256, max_liquidity: U256) -> Self {
        Self {
            extra_balance,
            max_liquidity,
            scaling: PRECISION,
        }
    }

    /// Short-book liquidity: unbounded ceiling, totals rescaled by the
    /// base token's rate.
    pub fn short(extra_balance: U256, scaling: U256) -> Self {
        Self {
            extra_balance,
            max_liquidity: U256::MAX,
            scaling,
        }
    }
}

/// Sized batch, ready for a funding decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub pool: Address,
    pub band: ScanBand,
    pub raw_debts: U256,
    pub raw_bonus: U256,
    /// Debt in executor units
    pub total_debts: U256,
    /// Net bonus in executor units
    pub total_bonus: U256,
    /// Ticks to lock once the action lands
    pub ticks: Vec<i32>,
}

/// Why a batch was not acted on. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    NoTicks,
    Dust { total_debts: U256 },
    BonusTooSmall { total_bonus: U256 },
}

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Skip::NoTicks => f.write_str("no eligible ticks"),
            Skip::Dust { total_debts } => write!(f, "dust debt {}", format_units(*total_debts, 18)),
            Skip::BonusTooSmall { total_bonus } => {
                write!(f, "bonus too small {}", format_units(*total_bonus, 18))
            }
        }
    }
}

/// How the executor funds the repayment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingPath {
    /// Spend balances the executor already holds.
    Direct,
    /// Borrow, repay, and swap the seized collateral back through a route.
    FlashLoan { use_fxusd: bool },
}

impl FundingPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingPath::Direct => "direct",
            FundingPath::FlashLoan { use_fxusd: true } => "flash-fxusd",
            FundingPath::FlashLoan { use_fxusd: false } => "flash-usdc",
        }
    }
}

/// Largest repayment whose collateral claim, bonus included, is covered
/// by the tick's collateral plus `extra_balance`. Capped at the tick's debt.
pub fn raw_debt_to_liquidate(tick: &EligibleTick, extra_balance: U256) -> U256 {
    let covered = (tick.raw_colls + extra_balance) * tick.price / PRECISION * FEE_PRECISION
        / (FEE_PRECISION + tick.bonus_ratio);
    min(covered, tick.raw_debts)
}

/// Smallest repayment `x` bringing the tick back to its rebalance ratio:
/// `(debt - x) / (price * (coll - x / price * (1 + bonus))) = target`.
///
/// Zero when the target and bonus leave no positive solution.
pub fn raw_debt_to_rebalance(tick: &EligibleTick) -> U256 {
    let excess = (tick.raw_debts * PRECISION * PRECISION)
        .saturating_sub(tick.debt_ratio * tick.price * tick.raw_colls);
    let leverage = PRECISION * tick.debt_ratio * (FEE_PRECISION + tick.bonus_ratio) / FEE_PRECISION;
    match (PRECISION * PRECISION).checked_sub(leverage) {
        Some(denominator) if !denominator.is_zero() => excess / denominator,
        _ => U256::ZERO,
    }
}

/// Accumulate ticks in order until the tick cap, or until the raw total has
/// passed `max_debt` (the tick crossing it is still included), then apply
/// the dust and bonus gates.
pub fn size_batch(
    ticks: &[EligibleTick],
    band: ScanBand,
    policy: &SizingPolicy,
    liquidity: &Liquidity,
    expense_ratio: U256,
) -> Result<Batch, Skip> {
    let Some(first) = ticks.first() else {
        return Err(Skip::NoTicks);
    };

    let mut raw_debts = U256::ZERO;
    let mut raw_bonus = U256::ZERO;
    let mut locked = Vec::new();
    for tick in ticks.iter().take(policy.max_ticks) {
        let debts = match band {
            ScanBand::Liquidate => raw_debt_to_liquidate(tick, liquidity.extra_balance),
            ScanBand::Rebalance => raw_debt_to_rebalance(tick),
        };
        let debts = min(debts, liquidity.max_liquidity);
        let bonus = net_bonus(debts, tick.bonus_ratio, expense_ratio);
        debug!(
            pool = %tick.pool,
            tick = tick.tick,
            band = %band,
            debts = %format_units(debts, 18),
            bonus = %format_units(bonus, 18),
            "Tick sized"
        );
        raw_debts += debts;
        raw_bonus += bonus;
        locked.push(tick.tick);
        if raw_debts > policy.max_debt {
            break;
        }
    }

    let scaling = if liquidity.scaling.is_zero() {
        PRECISION
    } else {
        liquidity.scaling
    };
    let total_debts = raw_debts * PRECISION / scaling;
    let total_bonus = raw_bonus * PRECISION / scaling;

    if total_debts < policy.dust {
        return Err(Skip::Dust { total_debts });
    }
    if band == ScanBand::Rebalance && total_bonus < policy.min_rebalance_bonus {
        return Err(Skip::BonusTooSmall { total_bonus });
    }

    Ok(Batch {
        pool: first.pool,
        band,
        raw_debts,
        raw_bonus,
        total_debts,
        total_bonus,
        ticks: locked,
    })
}

/// Pick the long-book funding path. Rebalances always borrow; liquidations
/// borrow from the flash threshold up. The settlement asset is fxUSD when
/// swapping the debt amount of USDC through the stable pool yields more
/// than the debt itself. An unpriced swap keeps liquidations direct and
/// settles rebalances in USDC.
pub fn long_funding(batch: &Batch, policy: &SizingPolicy, stable: &StablePool) -> FundingPath {
    let flash = match batch.band {
        ScanBand::Rebalance => true,
        ScanBand::Liquidate => batch.total_debts >= policy.flash_threshold,
    };
    if !flash {
        return FundingPath::Direct;
    }

    let quoted = stable.quote(USDC_INDEX, FXUSD_INDEX, batch.total_debts / USDC_SCALAR);
    match (quoted, batch.band) {
        (Some(swapped), _) => FundingPath::FlashLoan {
            use_fxusd: swapped > batch.total_debts,
        },
        (None, ScanBand::Liquidate) => FundingPath::Direct,
        (None, ScanBand::Rebalance) => FundingPath::FlashLoan { use_fxusd: false },
    }
}

/// Pick the short-book funding path. The executor settles in the base
/// token either way, so no stable-pool quote is involved.
pub fn short_funding(batch: &Batch, policy: &SizingPolicy) -> FundingPath {
    let flash = match batch.band {
        ScanBand::Rebalance => true,
        ScanBand::Liquidate => batch.total_debts >= policy.flash_threshold,
    };
    if flash {
        FundingPath::FlashLoan { use_fxusd: false }
    } else {
        FundingPath::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: Address = Address::repeat_byte(0xaa);
    const TOKEN: Address = Address::repeat_byte(0xbb);

    fn e18(v: u64) -> U256 {
        U256::from(v) * PRECISION
    }

    fn tick(tick: i32, colls: U256, debts: U256, debt_ratio: U256, bonus_ratio: u64) -> EligibleTick {
        EligibleTick {
            pool: POOL,
            token: TOKEN,
            tick,
            price: PRECISION,
            raw_colls: colls,
            raw_debts: debts,
            debt_ratio,
            bonus_ratio: U256::from(bonus_ratio),
        }
    }

    fn policy() -> SizingPolicy {
        SizingPolicy {
            max_ticks: 20,
            max_debt: e18(1_000_000),
            dust: PRECISION / U256::from(100u64),
            flash_threshold: e18(1_000),
            min_rebalance_bonus: e18(100),
        }
    }

    #[test]
    fn test_liquidate_amount_capped_by_debt() {
        // 5% bonus, 10 coll at price 1 covers 9.52 debt, more than 9 owed
        let t = tick(1, e18(10), e18(9), PRECISION * U256::from(8u64) / U256::from(10u64), 50_000_000);
        assert_eq!(raw_debt_to_liquidate(&t, U256::ZERO), e18(9));
    }

    #[test]
    fn test_liquidate_amount_limited_by_collateral() {
        // 10.5 coll with 5% bonus covers exactly 10 debt
        let colls = e18(105) / U256::from(10u64);
        let t = tick(1, colls, e18(12), PRECISION, 50_000_000);
        assert_eq!(raw_debt_to_liquidate(&t, U256::ZERO), e18(10));
        // reserve balance tops the collateral up
        assert_eq!(raw_debt_to_liquidate(&t, e18(21) / U256::from(10u64)), e18(12));
    }

    #[test]
    fn test_rebalance_amount_restores_target() {
        let target = PRECISION * U256::from(8u64) / U256::from(10u64);
        let t = tick(1, e18(100), e18(85), target, 25_000_000);
        let x = raw_debt_to_rebalance(&t);
        assert!(!x.is_zero());

        // After repaying x and paying x*(1+bonus) collateral, ratio is back at 0.8.
        let debt_after = t.raw_debts - x;
        let coll_after = t.raw_colls - x * (FEE_PRECISION + t.bonus_ratio) / FEE_PRECISION;
        let ratio = debt_after * PRECISION / coll_after;
        let tolerance = U256::from(1_000_000u64);
        assert!(ratio <= target + tolerance && ratio + tolerance >= target, "ratio {ratio}");
    }

    #[test]
    fn test_rebalance_degenerate_target_is_zero() {
        // target * (1 + bonus) >= 1 has no solution
        let t = tick(1, e18(100), e18(99), PRECISION, 25_000_000);
        assert_eq!(raw_debt_to_rebalance(&t), U256::ZERO);
    }

    #[test]
    fn test_dust_gate_boundary() {
        let mut p = policy();
        p.dust = e18(9);
        let ratio = PRECISION * U256::from(8u64) / U256::from(10u64);

        let below = [tick(1, e18(10), e18(9) - U256::from(1u64), ratio, 50_000_000)];
        let at = [tick(1, e18(10), e18(9), ratio, 50_000_000)];
        let liquidity = Liquidity::long(U256::ZERO, U256::MAX);

        assert_eq!(
            size_batch(&below, ScanBand::Liquidate, &p, &liquidity, U256::ZERO),
            Err(Skip::Dust {
                total_debts: e18(9) - U256::from(1u64)
            })
        );
        let batch = size_batch(&at, ScanBand::Liquidate, &p, &liquidity, U256::ZERO).unwrap();
        assert_eq!(batch.total_debts, e18(9));
    }

    #[test]
    fn test_tick_and_debt_caps() {
        let ratio = PRECISION * U256::from(8u64) / U256::from(10u64);
        let many: Vec<_> = (0..30).map(|i| tick(i, e18(10), e18(9), ratio, 0)).collect();
        let liquidity = Liquidity::long(U256::ZERO, U256::MAX);

        let batch = size_batch(&many, ScanBand::Liquidate, &policy(), &liquidity, U256::ZERO).unwrap();
        assert_eq!(batch.ticks.len(), 20);

        // the tick pushing the total past the cap is still taken
        let mut p = policy();
        p.max_debt = e18(20);
        let batch = size_batch(&many, ScanBand::Liquidate, &p, &liquidity, U256::ZERO).unwrap();
        assert_eq!(batch.ticks, vec![0, 1, 2]);
        assert_eq!(batch.raw_debts, e18(27));
    }

    #[test]
    fn test_bonus_net_of_expense_and_ceiling() {
        let ratio = PRECISION * U256::from(8u64) / U256::from(10u64);
        let ticks = [tick(7, e18(10), e18(9), ratio, 100_000_000)]; // 10%
        let liquidity = Liquidity::long(U256::ZERO, e18(5));
        // half the gross bonus goes to the protocol
        let batch = size_batch(
            &ticks,
            ScanBand::Liquidate,
            &policy(),
            &liquidity,
            U256::from(500_000_000u64),
        )
        .unwrap();
        assert_eq!(batch.raw_debts, e18(5));
        assert_eq!(batch.total_bonus, e18(5) / U256::from(20u64));
        assert_eq!(batch.ticks, vec![7]);
    }

    #[test]
    fn test_rebalance_bonus_floor() {
        let target = PRECISION * U256::from(8u64) / U256::from(10u64);
        let ticks = [tick(1, e18(100), e18(85), target, 25_000_000)];
        let liquidity = Liquidity::long(U256::ZERO, U256::MAX);
        let result = size_batch(&ticks, ScanBand::Rebalance, &policy(), &liquidity, U256::ZERO);
        assert!(matches!(result, Err(Skip::BonusTooSmall { .. })));
    }

    #[test]
    fn test_short_totals_are_rescaled() {
        let ratio = PRECISION * U256::from(8u64) / U256::from(10u64);
        let ticks = [tick(1, e18(10), e18(9), ratio, 0)];
        // scalar 1 and a 1.2 rate
        let liquidity = Liquidity::short(U256::ZERO, PRECISION * U256::from(12u64) / U256::from(10u64));
        let mut p = policy();
        p.dust = U256::ZERO;
        let batch = size_batch(&ticks, ScanBand::Liquidate, &p, &liquidity, U256::ZERO).unwrap();
        assert_eq!(batch.total_debts, e18(9) * PRECISION / (PRECISION * U256::from(12u64) / U256::from(10u64)));
        assert_eq!(short_funding(&batch, &p), FundingPath::Direct);
        p.flash_threshold = U256::ZERO;
        assert_eq!(short_funding(&batch, &p), FundingPath::FlashLoan { use_fxusd: false });
    }

    fn balanced_pool(usdc: u64, fxusd: u64) -> StablePool {
        StablePool {
            balances: vec![U256::from(usdc) * U256::from(1_000_000u64), e18(fxusd)],
            rates: vec![USDC_SCALAR, U256::from(1u64)],
            amp: U256::from(50_000u64),
            base_fee: U256::from(1_000_000u64),
            offpeg_multiplier: U256::from(50_000_000_000u64),
        }
    }

    fn batch(band: ScanBand, total: U256) -> Batch {
        Batch {
            pool: POOL,
            band,
            raw_debts: total,
            raw_bonus: U256::ZERO,
            total_debts: total,
            total_bonus: U256::ZERO,
            ticks: vec![1],
        }
    }

    #[test]
    fn test_long_funding_paths() {
        let p = policy();
        let pool = balanced_pool(10_000_000, 10_000_000);

        assert_eq!(long_funding(&batch(ScanBand::Liquidate, e18(999)), &p, &pool), FundingPath::Direct);
        // balanced pool: the fee makes the swap return less than the debt
        assert_eq!(
            long_funding(&batch(ScanBand::Liquidate, e18(1_000)), &p, &pool),
            FundingPath::FlashLoan { use_fxusd: false }
        );
        // fxUSD-heavy pool pays a premium for USDC
        let skewed = balanced_pool(1_000_000, 30_000_000);
        assert_eq!(
            long_funding(&batch(ScanBand::Rebalance, e18(10)), &p, &skewed),
            FundingPath::FlashLoan { use_fxusd: true }
        );
    }

    #[test]
    fn test_unpriced_swap_fallbacks() {
        let p = policy();
        let empty = StablePool::default();
        assert_eq!(
            long_funding(&batch(ScanBand::Liquidate, e18(5_000)), &p, &empty),
            FundingPath::Direct
        );
        assert_eq!(
            long_funding(&batch(ScanBand::Rebalance, e18(5_000)), &p, &empty),
            FundingPath::FlashLoan { use_fxusd: false }
        );
    }
}
