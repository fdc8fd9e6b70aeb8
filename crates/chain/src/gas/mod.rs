//! Gas strategy abstraction.
//!
//! Keeper transactions are EIP-1559 only. The strategy fetches the latest
//! base fee and turns it into fee caps; gas limits come from estimation
//! with a fixed headroom multiplier.
//!
//! # Example
//!
//! ```rust,ignore
//! use fx_keeper_chain::gas::{Eip1559GasStrategy, GasStrategy};
//!
//! // maxFee = 2 * baseFee, tip = 0.1 gwei
//! let strategy = Eip1559GasStrategy::new(100_000_000, 2);
//! ```

mod eip1559;

pub use eip1559::Eip1559GasStrategy;

use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Gas parameters fetched from the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    /// Maximum fee per gas in wei.
    pub max_fee_per_gas: u128,
    /// Maximum priority fee per gas in wei.
    pub max_priority_fee_per_gas: u128,
    /// Base fee of the latest block.
    pub base_fee: u128,
}

/// Apply the estimation headroom: `estimate * 3 / 2`.
pub fn buffered_gas_limit(estimate: u64) -> u64 {
    estimate.saturating_mul(3) / 2
}

/// Trait for gas pricing strategies.
#[async_trait]
pub trait GasStrategy: Send + Sync + Debug {
    /// Fetch current gas parameters from the given RPC URL.
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams>;

    /// Apply gas parameters to a transaction request.
    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams);

    /// Get the strategy name for logging/debugging.
    fn strategy_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_gas_limit() {
        assert_eq!(buffered_gas_limit(1_000_000), 1_500_000);
        assert_eq!(buffered_gas_limit(3), 4);
        assert_eq!(buffered_gas_limit(u64::MAX), u64::MAX / 2);
    }
}
