//! Private transaction relays.
//!
//! Signed transactions are posted as plain `eth_sendRawTransaction` JSON-RPC
//! requests to block builders, bypassing the public mempool. Each relay is
//! tried in turn; a failing relay is logged and skipped.

use alloy::primitives::B256;
use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// Builder endpoints accepting raw transactions.
pub const DEFAULT_RELAYS: [&str; 3] = [
    "https://eth.rpc.blxrbdn.com",
    "https://rpc.beaverbuild.org",
    "https://rpc.titanbuilder.xyz",
];

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<serde_json::Value>,
}

/// Fan-out client for private relays.
#[derive(Debug, Clone)]
pub struct PrivateRelay {
    urls: Vec<String>,
    client: reqwest::Client,
}

impl PrivateRelay {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { urls, client })
    }

    pub fn with_default_relays() -> Result<Self> {
        Self::new(DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect())
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Post `raw_tx` to every relay. Returns the hashes relays acknowledged.
    pub async fn broadcast(&self, raw_tx: &[u8]) -> Vec<B256> {
        let payload = raw_request(raw_tx);
        let mut accepted = Vec::new();

        for url in &self.urls {
            match self.post(url, &payload).await {
                Ok(hash) => {
                    info!(relay = %url, tx_hash = %hash, "Private transaction accepted");
                    accepted.push(hash);
                }
                Err(e) => {
                    warn!(relay = %url, error = %e, "Private relay rejected transaction");
                }
            }
        }
        accepted
    }

    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<B256> {
        let response: RpcResponse = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;

        match (response.result, response.error) {
            (Some(hash), _) => Ok(hash.parse()?),
            (None, Some(err)) => anyhow::bail!("relay error: {}", err),
            (None, None) => anyhow::bail!("relay returned neither result nor error"),
        }
    }
}

/// JSON-RPC body for one raw transaction.
fn raw_request(raw_tx: &[u8]) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_sendRawTransaction",
        "params": [format!("0x{}", hex::encode(raw_tx))],
        "id": 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_request_body() {
        let body = raw_request(&[0x02, 0xab]);
        assert_eq!(body["method"], "eth_sendRawTransaction");
        assert_eq!(body["params"][0], "0x02ab");
        assert_eq!(body["id"], 1);
    }

    #[test]
    fn test_default_relays() {
        let relay = PrivateRelay::with_default_relays().unwrap();
        assert_eq!(relay.urls().len(), 3);
        assert!(relay.urls().iter().all(|u| u.starts_with("https://")));
    }

    #[test]
    fn test_rpc_response_parsing() {
        let ok: RpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x01"}"#).unwrap();
        assert_eq!(ok.result.as_deref(), Some("0x01"));

        let err: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low"}}"#)
                .unwrap();
        assert!(err.result.is_none());
        assert!(err.error.is_some());
    }
}
