//! EIP-1559 gas pricing strategy.
//!
//! `maxFeePerGas` is a fixed multiple of the latest base fee and the tip is
//! a constant, so a submission stays includable for a couple of blocks of
//! base-fee growth without overpaying the builder.

use super::{GasParams, GasStrategy};
use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// EIP-1559 gas pricing strategy.
#[derive(Debug)]
pub struct Eip1559GasStrategy {
    /// Priority fee (tip) in wei.
    priority_fee: u128,
    /// `max_fee = base_fee * multiplier`.
    base_fee_multiplier: u128,
    /// Last base fee seen, for logging.
    cached_base_fee: AtomicU64,
}

impl Eip1559GasStrategy {
    pub fn new(priority_fee: u128, base_fee_multiplier: u128) -> Self {
        Self {
            priority_fee,
            base_fee_multiplier,
            cached_base_fee: AtomicU64::new(0),
        }
    }

    /// Get the cached base fee.
    pub fn cached_base_fee(&self) -> u128 {
        self.cached_base_fee.load(Ordering::Relaxed) as u128
    }

    fn params_for(&self, base_fee: u128) -> GasParams {
        GasParams {
            max_fee_per_gas: base_fee.saturating_mul(self.base_fee_multiplier),
            max_priority_fee_per_gas: self.priority_fee,
            base_fee,
        }
    }
}

#[async_trait]
impl GasStrategy for Eip1559GasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams> {
        use alloy::providers::{Provider, ProviderBuilder};

        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);

        let block = provider
            .get_block_by_number(alloy::eips::BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to get latest block"))?;

        let base_fee = block
            .header
            .base_fee_per_gas
            .map(|b| b as u128)
            .ok_or_else(|| anyhow::anyhow!("Latest block has no base fee"))?;

        self.cached_base_fee
            .store(base_fee.min(u64::MAX as u128) as u64, Ordering::Relaxed);

        Ok(self.params_for(base_fee))
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        tx.set_max_fee_per_gas(params.max_fee_per_gas);
        tx.set_max_priority_fee_per_gas(params.max_priority_fee_per_gas);
    }

    fn strategy_name(&self) -> &'static str {
        "EIP-1559"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    #[test]
    fn test_params_double_base_fee() {
        let strategy = Eip1559GasStrategy::new(100_000_000, 2);
        let params = strategy.params_for(30_000_000_000);
        assert_eq!(params.max_fee_per_gas, 60_000_000_000);
        assert_eq!(params.max_priority_fee_per_gas, 100_000_000);
        assert_eq!(params.base_fee, 30_000_000_000);
    }

    #[test]
    fn test_eip1559_apply_gas() {
        let strategy = Eip1559GasStrategy::new(100_000_000, 2);
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);

        let params = strategy.params_for(25_000_000_000);
        strategy.apply_gas(&mut tx, &params);

        assert_eq!(tx.max_fee_per_gas, Some(50_000_000_000));
        assert_eq!(tx.max_priority_fee_per_gas, Some(100_000_000));
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_fetch_params_mainnet() {
        let strategy = Eip1559GasStrategy::new(100_000_000, 2);
        let params = strategy.fetch_params("https://eth.drpc.org").await.unwrap();
        assert_eq!(params.max_fee_per_gas, params.base_fee * 2);
        assert_eq!(strategy.cached_base_fee(), params.base_fee);
    }
}
