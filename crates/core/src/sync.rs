//! Incremental replay of protocol logs into the replica.
//!
//! Replay runs in fixed block windows. After each window every tracked
//! contract's height is raised to the window end and the full replica is
//! written to the snapshot store, so a crash costs at most one window.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fx_keeper_chain::{ProtocolEvent, ProtocolLog, ProviderManager};
use tracing::{debug, info, instrument};

use crate::replica::{LedgerReplica, ReplicaError};
use crate::snapshot::SnapshotStore;

/// Where replayed logs come from.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    /// Decoded logs of `addresses` in `[from, to]`, in chain order.
    async fn logs(&self, addresses: &[Address], from: u64, to: u64) -> Result<Vec<ProtocolLog>>;
}

#[async_trait]
impl LedgerSource for ProviderManager {
    async fn block_number(&self) -> Result<u64> {
        ProviderManager::block_number(self).await
    }

    async fn logs(&self, addresses: &[Address], from: u64, to: u64) -> Result<Vec<ProtocolLog>> {
        self.protocol_logs(addresses, from, to).await
    }
}

/// Apply one decoded log to the replica.
pub fn apply_log(replica: &mut LedgerReplica, log: &ProtocolLog) -> Result<(), ReplicaError> {
    let at = log.address;
    debug!(
        address = %at,
        block = log.block_number,
        event = log.event.name(),
        "Replaying event"
    );
    match log.event {
        ProtocolEvent::ReservePool { new_reserve } => replica.on_reserve_pool(at, new_reserve),
        ProtocolEvent::LiquidationExpenseRatio { ratio } => {
            replica.on_liquidation_expense_ratio(at, ratio)
        }
        ProtocolEvent::RedeemFeeRatio { ratio } => replica.on_redeem_fee_ratio(at, ratio),
        ProtocolEvent::TokenRate {
            token,
            scalar,
            provider,
        } => replica.on_token_rate(at, token, scalar, provider),
        ProtocolEvent::PriceOracle { new_oracle } => replica.on_price_oracle(at, new_oracle),
        ProtocolEvent::RedeemStatus { status } => replica.on_redeem_status(at, status),
        ProtocolEvent::MaxRedeemRatioPerTick { ratio } => replica.on_max_redeem_ratio(at, ratio),
        ProtocolEvent::RebalanceRatios {
            debt_ratio,
            bonus_ratio,
        } => replica.on_rebalance_ratios(at, debt_ratio, bonus_ratio),
        ProtocolEvent::LiquidateRatios {
            debt_ratio,
            bonus_ratio,
        } => replica.on_liquidate_ratios(at, debt_ratio, bonus_ratio),
        ProtocolEvent::PositionSnapshot {
            position,
            tick,
            coll_shares,
            debt_shares,
        } => replica
            .on_position_snapshot(at, position, tick, coll_shares, debt_shares)
            .map(|_| ()),
        ProtocolEvent::TickMovement {
            old_tick,
            new_tick,
            coll_shares,
            debt_shares,
        } => replica
            .on_tick_movement(at, old_tick, new_tick, coll_shares, debt_shares)
            .map(|_| ()),
        ProtocolEvent::DebtIndex { index } => replica.on_debt_index(at, index),
        ProtocolEvent::CollateralIndex { index } => replica.on_collateral_index(at, index),
    }
}

/// What one sync pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub from: u64,
    pub to: u64,
    pub windows: usize,
    pub applied: usize,
    pub skipped: usize,
}

/// Drives replay from a [`LedgerSource`] into a replica and its store.
pub struct Synchronizer<S> {
    source: S,
    store: SnapshotStore,
    window: u64,
    reorg_margin: u64,
}

impl<S: LedgerSource> Synchronizer<S> {
    pub fn new(source: S, store: SnapshotStore, window: u64, reorg_margin: u64) -> Self {
        Self {
            source,
            store,
            window: window.max(1),
            reorg_margin,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Replay range for the next pass. Laggards from an interrupted pass are
    /// brought up to the leader first; otherwise replay runs to
    /// `head - reorg_margin`. `None` when there is nothing to do.
    pub fn target_range(&self, replica: &LedgerReplica, head: Option<u64>) -> Option<(u64, u64)> {
        let min = replica.min_synced();
        let max = replica.max_synced();
        let (from, to) = if min < max {
            (min + 1, max)
        } else {
            (max + 1, head?.checked_sub(self.reorg_margin)?)
        };
        (from <= to).then_some((from, to))
    }

    /// Scans may run only against a replica exactly `reorg_margin` behind
    /// the head it is compared to.
    pub fn is_caught_up(&self, replica: &LedgerReplica, head: u64) -> bool {
        replica.min_synced() == replica.max_synced()
            && replica.min_synced().saturating_add(self.reorg_margin) == head
    }

    /// One sync pass.
    #[instrument(skip_all)]
    pub async fn sync(&self, replica: &mut LedgerReplica) -> Result<SyncReport> {
        let head = if replica.min_synced() < replica.max_synced() {
            None
        } else {
            Some(self.source.block_number().await?)
        };
        let Some((from, to)) = self.target_range(replica, head) else {
            return Ok(SyncReport::default());
        };

        let addresses = replica.tracked_addresses();
        let mut report = SyncReport {
            from,
            to,
            ..Default::default()
        };

        let mut start = from;
        while start <= to {
            let end = to.min(start.saturating_add(self.window - 1));
            let logs = self
                .source
                .logs(&addresses, start, end)
                .await
                .with_context(|| format!("fetching logs {start}..={end}"))?;

            let mut applied = 0usize;
            for log in &logs {
                let synced = replica.last_synced(log.address).unwrap_or(0);
                if log.block_number <= synced {
                    report.skipped += 1;
                    continue;
                }
                apply_log(replica, log).with_context(|| {
                    format!(
                        "applying {} from {} at block {}",
                        log.event.name(),
                        log.address,
                        log.block_number
                    )
                })?;
                applied += 1;
            }

            replica.advance_sync_height(end);
            self.store.save(replica)?;

            info!(from = start, to = end, logs = logs.len(), applied, "Synced window");
            report.windows += 1;
            report.applied += applied;
            start = end + 1;
        }
        Ok(report)
    }
}
