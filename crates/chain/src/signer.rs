//! Transaction signer and sender for keeper actions.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! Every submission is gas-estimated first; an estimate that reverts means
//! the opportunity is gone and the action is skipped without sending.

use crate::gas::{buffered_gas_limit, Eip1559GasStrategy, GasStrategy};
use crate::relay::PrivateRelay;
use alloy::contract::RawCallBuilder;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long to wait for a receipt before giving up on confirmation.
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Where signed transactions go.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Through the RPC endpoint into the public mempool.
    Public,
    /// Straight to builders.
    Private(PrivateRelay),
}

/// Result of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Gas estimation failed; nothing was sent.
    Skipped,
    /// Sent; `confirmed` is the receipt status if one arrived in time.
    Sent {
        tx_hash: B256,
        confirmed: Option<bool>,
    },
}

impl SendOutcome {
    pub fn was_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}

/// Transaction sender with EIP-1559 pricing.
pub struct TransactionSender {
    /// RPC URL for estimation, nonces and public sends
    rpc_url: String,
    /// Signer wallet
    wallet: EthereumWallet,
    /// Signer address
    pub address: Address,
    /// Gas pricing strategy
    gas_strategy: Box<dyn GasStrategy>,
    submission: Submission,
    receipt_timeout: Duration,
}

/// Builder for TransactionSender with flexible configuration.
pub struct TransactionSenderBuilder {
    rpc_url: String,
    gas_strategy: Option<Box<dyn GasStrategy>>,
    submission: Submission,
    receipt_timeout: Duration,
}

impl TransactionSenderBuilder {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            gas_strategy: None,
            submission: Submission::Public,
            receipt_timeout: RECEIPT_TIMEOUT,
        }
    }

    /// Set the gas strategy.
    pub fn gas_strategy(mut self, strategy: Box<dyn GasStrategy>) -> Self {
        self.gas_strategy = Some(strategy);
        self
    }

    /// Route signed transactions through private relays.
    pub fn private(mut self, relay: PrivateRelay) -> Self {
        self.submission = Submission::Private(relay);
        self
    }

    pub fn receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Build the TransactionSender.
    pub fn build(self, private_key: &str) -> Result<TransactionSender> {
        // Parse private key (with or without 0x prefix)
        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str.parse()?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        // 0.1 gwei tip, max fee twice the base fee
        let gas_strategy = self
            .gas_strategy
            .unwrap_or_else(|| Box::new(Eip1559GasStrategy::new(100_000_000, 2)));

        info!(
            address = %address,
            gas_strategy = gas_strategy.strategy_name(),
            private = matches!(self.submission, Submission::Private(_)),
            "Transaction sender initialized"
        );

        Ok(TransactionSender {
            rpc_url: self.rpc_url,
            wallet,
            address,
            gas_strategy,
            submission: self.submission,
            receipt_timeout: self.receipt_timeout,
        })
    }
}

impl TransactionSender {
    /// Get the current gas strategy name.
    pub fn gas_strategy_name(&self) -> &'static str {
        self.gas_strategy.strategy_name()
    }

    pub fn is_private(&self) -> bool {
        matches!(self.submission, Submission::Private(_))
    }

    /// Estimate, price, sign and submit a call to `to`, then wait up to the
    /// receipt timeout for confirmation.
    pub async fn send(&self, to: Address, calldata: Bytes) -> Result<SendOutcome> {
        let total_start = Instant::now();
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);

        let estimate = RawCallBuilder::<(), _, _>::new_raw(&provider, calldata.clone())
            .to(to)
            .from(self.address)
            .estimate_gas()
            .await;
        let gas_limit = match estimate {
            Ok(gas) => buffered_gas_limit(gas),
            Err(e) => {
                warn!(to = %to, error = %e, "Gas estimation failed, skipping submission");
                return Ok(SendOutcome::Skipped);
            }
        };

        let gas_params = self.gas_strategy.fetch_params(&self.rpc_url).await?;
        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_input(calldata)
            .with_value(U256::ZERO)
            .with_gas_limit(gas_limit);
        self.gas_strategy.apply_gas(&mut tx, &gas_params);

        info!(
            to = %to,
            gas_limit = gas_limit,
            max_fee_gwei = gas_params.max_fee_per_gas / 1_000_000_000,
            base_fee_gwei = gas_params.base_fee / 1_000_000_000,
            private = self.is_private(),
            "Sending transaction"
        );

        let tx_hash = match &self.submission {
            Submission::Public => {
                let provider = ProviderBuilder::new()
                    .wallet(self.wallet.clone())
                    .on_http(self.rpc_url.parse()?);
                let pending = provider.send_transaction(tx).await?;
                *pending.tx_hash()
            }
            Submission::Private(relay) => {
                let nonce = provider.get_transaction_count(self.address).await?;
                let chain_id = provider.get_chain_id().await?;
                let envelope = tx
                    .with_nonce(nonce)
                    .with_chain_id(chain_id)
                    .build(&self.wallet)
                    .await?;
                let hash = *envelope.tx_hash();
                let accepted = relay.broadcast(&envelope.encoded_2718()).await;
                if accepted.is_empty() {
                    anyhow::bail!("no private relay accepted transaction {}", hash);
                }
                hash
            }
        };

        info!(tx_hash = %tx_hash, "Transaction submitted, waiting for confirmation");

        let confirmed = self.wait_for_receipt(tx_hash).await;
        match confirmed {
            Some(true) => info!(
                tx_hash = %tx_hash,
                total_ms = total_start.elapsed().as_millis(),
                "Transaction confirmed"
            ),
            Some(false) => warn!(tx_hash = %tx_hash, "Transaction reverted"),
            None => warn!(
                tx_hash = %tx_hash,
                timeout_s = self.receipt_timeout.as_secs(),
                "No receipt before timeout"
            ),
        }

        Ok(SendOutcome::Sent { tx_hash, confirmed })
    }

    /// Poll for a receipt until the timeout. `None` when none arrived.
    async fn wait_for_receipt(&self, tx_hash: B256) -> Option<bool> {
        let poll = async {
            loop {
                match self.receipt_status(tx_hash).await {
                    Ok(Some(status)) => return status,
                    Ok(None) => {}
                    Err(e) => debug!(tx_hash = %tx_hash, error = %e, "Receipt poll failed"),
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(self.receipt_timeout, poll).await.ok()
    }

    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let receipt = provider.get_transaction_receipt(tx_hash).await?;
        if let Some(r) = &receipt {
            debug!(tx_hash = %tx_hash, gas_used = r.gas_used, "Receipt received");
        }
        Ok(receipt.map(|r| r.status()))
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("rpc_url", &self.rpc_url)
            .field("gas_strategy", &self.gas_strategy.strategy_name())
            .field("private", &self.is_private())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known development key (DO NOT USE IN PRODUCTION)
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_sender_address_from_key() {
        let sender = TransactionSenderBuilder::new("http://localhost:8545")
            .build(TEST_KEY)
            .unwrap();
        assert_eq!(
            format!("{:?}", sender.address).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_eq!(sender.gas_strategy_name(), "EIP-1559");
        assert!(!sender.is_private());
    }

    #[test]
    fn test_private_submission_flag() {
        let sender = TransactionSenderBuilder::new("http://localhost:8545")
            .private(PrivateRelay::with_default_relays().unwrap())
            .build(TEST_KEY.trim_start_matches("0x"))
            .unwrap();
        assert!(sender.is_private());
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(TransactionSenderBuilder::new("http://localhost:8545")
            .build("not-a-key")
            .is_err());
    }

    #[test]
    fn test_send_outcome() {
        assert!(!SendOutcome::Skipped.was_sent());
        assert!(SendOutcome::Sent {
            tx_hash: B256::ZERO,
            confirmed: None
        }
        .was_sent());
    }
}
