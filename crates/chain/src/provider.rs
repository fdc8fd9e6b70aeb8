//! Provider management for the keeper's single HTTP endpoint.
//! Uses Alloy providers for type-safe RPC interactions.

use crate::contracts::{IMulticall3, MULTICALL3};
use crate::events::{decode_log, topic_allow_list, ProtocolLog};
use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use anyhow::Result;
use tracing::{debug, info};

/// One read call batched through Multicall3.
#[derive(Debug, Clone)]
pub struct MulticallRequest {
    pub target: Address,
    pub call_data: Bytes,
}

impl MulticallRequest {
    pub fn new(target: Address, call_data: impl Into<Bytes>) -> Self {
        Self {
            target,
            call_data: call_data.into(),
        }
    }
}

/// Provider manager for the keeper's RPC endpoint.
#[derive(Debug, Clone)]
pub struct ProviderManager {
    /// HTTP URL used for reads, logs and public submissions
    rpc_url: String,
    /// Multicall3 deployment used by [`Self::aggregate`]
    multicall: Address,
}

impl ProviderManager {
    /// Create a provider manager and verify the endpoint answers.
    pub async fn new(rpc_url: &str) -> Result<Self> {
        info!(rpc = rpc_url, "Initializing provider manager");

        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let block = provider.get_block_number().await?;
        info!(block = block, "Provider connection verified");

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            multicall: MULTICALL3,
        })
    }

    /// Use a Multicall3 deployment other than the canonical address.
    pub fn with_multicall(mut self, multicall: Address) -> Self {
        self.multicall = multicall;
        self
    }

    /// Get current block number.
    pub async fn block_number(&self) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let block = provider.get_block_number().await?;
        Ok(block)
    }

    /// Fetch and decode replica events emitted by `addresses` in
    /// `[from_block, to_block]`, in chain order. A tracked log that fails to
    /// decode fails the whole window.
    pub async fn protocol_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ProtocolLog>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let filter = Filter::new()
            .address(addresses.to_vec())
            .event_signature(topic_allow_list())
            .from_block(from_block)
            .to_block(to_block);

        let logs = provider.get_logs(&filter).await?;
        let decoded: Vec<ProtocolLog> = logs
            .iter()
            .map(decode_log)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        debug!(
            from = from_block,
            to = to_block,
            raw = logs.len(),
            decoded = decoded.len(),
            "Fetched protocol logs"
        );
        Ok(decoded)
    }

    /// Run `calls` in one `Multicall3.aggregate`, returning the block it
    /// executed at and the raw return data in call order. Any failing call
    /// fails the whole batch.
    pub async fn aggregate(&self, calls: Vec<MulticallRequest>) -> Result<(u64, Vec<Bytes>)> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let multicall = IMulticall3::new(self.multicall, &provider);

        let count = calls.len();
        let calls: Vec<IMulticall3::Call> = calls
            .into_iter()
            .map(|c| IMulticall3::Call {
                target: c.target,
                callData: c.call_data,
            })
            .collect();

        let result = multicall.aggregate(calls).call().await?;
        let block = result.blockNumber.saturating_to::<u64>();
        if result.returnData.len() != count {
            anyhow::bail!(
                "multicall returned {} results for {} calls",
                result.returnData.len(),
                count
            );
        }

        debug!(block = block, calls = count, "Multicall aggregate executed");
        Ok((block, result.returnData))
    }
}
