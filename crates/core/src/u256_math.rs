//! U256 fixed-point helpers shared by the replica, scanner and sizer.
//!
//! All amounts stay in `U256` end to end. Ratio tests are cross-multiplied
//! against [`PRECISION`] instead of divided, so comparisons carry no rounding.

use alloy::primitives::U256;

/// 2^96, the scale of the rebase indices.
pub const E96: U256 = U256::from_limbs([0, 1u64 << 32, 0, 0]);

/// 1e18, scale of prices and debt ratios.
pub const PRECISION: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// 1e9, scale of bonus and expense ratios.
pub const FEE_PRECISION: U256 = U256::from_limbs([1_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10000u64, 0, 0, 0]);

/// Raw debt units below which a tick is dust for scanning purposes.
pub const DUST_RAW_DEBT: U256 = U256::from_limbs([1_000_000_000u64, 0, 0, 0]);

/// Convert collateral shares to the raw collateral amount.
///
/// The collateral index grows as the underlying rebases, so each share is
/// worth less raw collateral over time: `raw = shares * 2^96 / index`.
#[inline(always)]
pub fn coll_shares_to_raw(shares: U256, coll_index: U256) -> U256 {
    if coll_index.is_zero() {
        return U256::ZERO;
    }
    shares * E96 / coll_index
}

/// Convert debt shares to the raw debt amount: `raw = shares * index / 2^96`.
#[inline(always)]
pub fn debt_shares_to_raw(shares: U256, debt_index: U256) -> U256 {
    shares * debt_index / E96
}

/// `rawDebts * P * P >= ratio * rawColls * price`, i.e. debt ratio at or
/// above `ratio` (1e18 scale) at the given price.
#[inline(always)]
pub fn debt_ratio_at_least(raw_debts: U256, raw_colls: U256, price: U256, ratio: U256) -> bool {
    raw_debts * PRECISION * PRECISION >= ratio * raw_colls * price
}

/// Apply basis points increase (e.g., for slippage bounds).
/// Returns: value * (10000 + basis_points) / 10000
#[inline(always)]
pub fn apply_basis_points_up(value: U256, basis_points: u16) -> U256 {
    let factor = U256::from(10000u16.saturating_add(basis_points));
    (value * factor) / BPS_DENOMINATOR
}

/// Net executor bonus for repaying `debts`: gross bonus minus the protocol's
/// liquidation expense take-rate, both on the 1e9 scale.
#[inline(always)]
pub fn net_bonus(debts: U256, bonus_ratio: U256, expense_ratio: U256) -> U256 {
    let gross = debts * bonus_ratio / FEE_PRECISION;
    gross * FEE_PRECISION.saturating_sub(expense_ratio) / FEE_PRECISION
}

/// Parse a human decimal such as `"0.01"` into fixed point with `decimals`.
///
/// Used for configuration defaults; extra fractional digits are truncated.
pub fn parse_units(value: &str, decimals: u8) -> Option<U256> {
    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, f),
        None => (value, ""),
    };
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let int = if int_part.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(int_part, 10).ok()?
    };
    let mut frac: String = frac_part.chars().take(decimals as usize).collect();
    while frac.len() < decimals as usize {
        frac.push('0');
    }
    let frac = if frac.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(&frac, 10).ok()?
    };
    Some(int * scale + frac)
}

/// Format a fixed-point amount for logs. Display only.
pub fn format_units(value: U256, decimals: u8) -> String {
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let int = value / scale;
    let frac = value % scale;
    if frac.is_zero() {
        return int.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    format!("{}.{}", int, frac.trim_end_matches('0'))
}

/// Safe minimum of two U256 values
#[inline(always)]
pub fn min(a: U256, b: U256) -> U256 {
    if a < b {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(E96, U256::from(1u64) << 96);
        assert_eq!(PRECISION, U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(FEE_PRECISION, U256::from(1_000_000_000u64));
    }

    #[test]
    fn test_identity_index() {
        let shares = U256::from(123_456_789u64);
        assert_eq!(debt_shares_to_raw(shares, E96), shares);
        assert_eq!(coll_shares_to_raw(shares, E96), shares);
    }

    #[test]
    fn test_index_growth_direction() {
        let shares = U256::from(1_000u64);
        let doubled = E96 * U256::from(2u64);
        // debt grows with its index, collateral shrinks with its index
        assert_eq!(debt_shares_to_raw(shares, doubled), U256::from(2_000u64));
        assert_eq!(coll_shares_to_raw(shares, doubled), U256::from(500u64));
        assert_eq!(coll_shares_to_raw(shares, U256::ZERO), U256::ZERO);
        // both conversions round down
        assert_eq!(debt_shares_to_raw(U256::from(3u64), E96 / U256::from(2u64)), U256::from(1u64));
        assert_eq!(coll_shares_to_raw(U256::from(3u64), doubled), U256::from(1u64));
    }

    #[test]
    fn test_debt_ratio_at_least() {
        let colls = U256::from(10u64) * PRECISION;
        let debts = U256::from(9u64) * PRECISION;
        let price = PRECISION;
        let ratio = U256::from(8u64) * PRECISION / U256::from(10u64);
        assert!(debt_ratio_at_least(debts, colls, price, ratio));

        let ratio = U256::from(95u64) * PRECISION / U256::from(100u64);
        assert!(!debt_ratio_at_least(debts, colls, price, ratio));

        // Boundary is inclusive
        let ratio = U256::from(9u64) * PRECISION / U256::from(10u64);
        assert!(debt_ratio_at_least(debts, colls, price, ratio));
    }

    #[test]
    fn test_net_bonus() {
        // 100 debt, 5% bonus, 10% expense -> 4.5
        let debts = U256::from(100u64) * PRECISION;
        let bonus = U256::from(50_000_000u64);
        let expense = U256::from(100_000_000u64);
        let net = net_bonus(debts, bonus, expense);
        assert_eq!(net, U256::from(45u64) * PRECISION / U256::from(10u64));
    }

    #[test]
    fn test_parse_and_format_units() {
        assert_eq!(parse_units("0.01", 18), Some(PRECISION / U256::from(100u64)));
        assert_eq!(parse_units("1000000", 18), Some(U256::from(1_000_000u64) * PRECISION));
        assert_eq!(parse_units("0.0001", 8), Some(U256::from(10_000u64)));
        assert_eq!(parse_units("abc", 18), None);

        assert_eq!(format_units(U256::from(1_500_000_000_000_000_000u128), 18), "1.5");
        assert_eq!(format_units(U256::from(2u64) * PRECISION, 18), "2");
    }

    #[test]
    fn test_apply_basis_points_up() {
        let value = U256::from(10_000u64);
        assert_eq!(apply_basis_points_up(value, 1), U256::from(10_001u64));
    }
}
