//! Keeper chain interaction layer.
//!
//! This crate provides:
//! - Provider management (block height, protocol logs, Multicall3 batches)
//! - Contract bindings for oracles, pools, the Curve pool and executors
//! - Event decoding for the pool manager and pool replay stream
//! - Transaction signing and sending, publicly or via private relays
//! - Gas strategy abstraction (EIP-1559)

pub mod contracts;
pub mod events;
pub mod gas;
mod provider;
mod relay;
mod signer;

pub use events::{decode_log, topic_allow_list, ProtocolEvent, ProtocolLog};
pub use provider::{MulticallRequest, ProviderManager};
pub use relay::{PrivateRelay, DEFAULT_RELAYS};
pub use signer::{SendOutcome, Submission, TransactionSender, TransactionSenderBuilder, RECEIPT_TIMEOUT};
