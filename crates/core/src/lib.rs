//! Keeper core logic.
//!
//! This crate provides the core rebalance and liquidation keeper:
//! - Event-sourced ledger replica with tick and position tables
//! - Durable JSON snapshots and windowed log replay
//! - Tick eligibility scanning for the rebalance and liquidation bands
//! - Batch sizing, funding-path choice and executor calldata encoding
//! - Stable-swap invariant solver for settlement quotes
//! - Poll loop orchestration with tick locks and a liveness heartbeat
//!
//! Covers both the long (fxUSD-debt) and short (base-token-debt) books.

mod action;
pub mod config;
mod eligibility;
mod heartbeat;
mod keeper;
mod lock_table;
mod market;
pub mod replica;
mod route;
mod sizer;
mod snapshot;
pub mod stable_math;
mod sync;
pub mod u256_math;

pub use action::{ActionEncoder, ActionRequest, IdleBalances};
pub use config::BotConfig;
pub use eligibility::{
    positions_to_liquidate, scan_ticks, ticks_to_rebalance, EligiblePosition, EligibleTick,
    ScanBand,
};
pub use heartbeat::Heartbeat;
pub use keeper::{Keeper, Mode, Planner};
pub use lock_table::{now_secs, LockKey, LockTable};
pub use market::{BasePool, LongMarket, MarketAddresses, MarketQuery, MarketSnapshot};
pub use replica::{Book, LedgerReplica, ReplicaError};
pub use route::{encode_multi_path, RouteTable, SwapRoute};
pub use sizer::{
    long_funding, short_funding, size_batch, Batch, FundingPath, Liquidity, Skip, SizingPolicy,
};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use sync::{apply_log, LedgerSource, SyncReport, Synchronizer};
