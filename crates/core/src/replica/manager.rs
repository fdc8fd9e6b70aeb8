//! Pool manager records.

use alloy::primitives::{Address, U256};

use super::Book;
use crate::u256_math::PRECISION;

/// Rate source for one token: `scalar` normalizes decimals, `provider`
/// returns a live rate (zero address means a fixed 1e18).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateProvider {
    pub token: Address,
    pub scalar: U256,
    pub provider: Address,
}

impl RateProvider {
    pub fn is_fixed(&self) -> bool {
        self.provider.is_zero()
    }

    /// `scalar * rate`, where the rate is 1e18 for fixed providers.
    pub fn scaling_factor(&self, live_rate: Option<U256>) -> U256 {
        let rate = if self.is_fixed() {
            PRECISION
        } else {
            live_rate.unwrap_or(PRECISION)
        };
        self.scalar * rate
    }
}

/// One protocol deployment's manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manager {
    pub address: Address,
    pub book: Book,
    pub reserve_pool: Address,
    /// 1e9 scale
    pub redeem_fee_ratio: U256,
    /// 1e9 scale, taken out of the gross bonus
    pub liquidation_expense_ratio: U256,
    /// Ordered as first announced on chain
    pub rate_providers: Vec<RateProvider>,
}

impl Manager {
    pub fn genesis(address: Address, book: Book, reserve_pool: Address) -> Self {
        Self {
            address,
            book,
            reserve_pool,
            redeem_fee_ratio: U256::ZERO,
            liquidation_expense_ratio: U256::ZERO,
            rate_providers: Vec::new(),
        }
    }

    pub fn rate_provider(&self, token: Address) -> Option<&RateProvider> {
        self.rate_providers.iter().find(|r| r.token == token)
    }

    /// Insert or replace the rate source for `token`, keeping order.
    pub(super) fn set_token_rate(&mut self, token: Address, scalar: U256, provider: Address) {
        let entry = RateProvider {
            token,
            scalar,
            provider,
        };
        match self.rate_providers.iter_mut().find(|r| r.token == token) {
            Some(existing) => *existing = entry,
            None => self.rate_providers.push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_token_rate_keeps_order() {
        let mut manager = Manager::genesis(Address::ZERO, Book::Long, Address::ZERO);
        let a = Address::repeat_byte(0xa);
        let b = Address::repeat_byte(0xb);
        manager.set_token_rate(a, U256::from(1u64), Address::ZERO);
        manager.set_token_rate(b, U256::from(1u64), Address::ZERO);
        manager.set_token_rate(a, U256::from(10u64), Address::repeat_byte(1));

        assert_eq!(manager.rate_providers.len(), 2);
        assert_eq!(manager.rate_providers[0].token, a);
        assert_eq!(manager.rate_providers[0].scalar, U256::from(10u64));
        assert!(!manager.rate_providers[0].is_fixed());
    }

    #[test]
    fn test_scaling_factor() {
        let fixed = RateProvider {
            token: Address::ZERO,
            scalar: U256::from(10_000_000_000u64),
            provider: Address::ZERO,
        };
        assert_eq!(fixed.scaling_factor(None), U256::from(10_000_000_000u64) * PRECISION);

        let live = RateProvider {
            provider: Address::repeat_byte(1),
            scalar: U256::from(1u64),
            ..fixed
        };
        let rate = U256::from(1_200_000_000_000_000_000u128);
        assert_eq!(live.scaling_factor(Some(rate)), rate);
    }
}
