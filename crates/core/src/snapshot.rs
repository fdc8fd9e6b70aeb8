//! Durable snapshot of the ledger replica.
//!
//! One `state.json` per store directory. Keys are PascalCase and every
//! large integer is a decimal string. A present file fully overrides genesis
//! for the records it carries; a file without any sync-height record is
//! rejected so the keeper never acts on state of unknown age.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::replica::{
    Book, LedgerReplica, Manager, Pool, PoolParams, Position, RateProvider, ReplicaError, Shares,
};

pub const SNAPSHOT_FILE: &str = "state.json";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot has neither LastSyncBlock nor a non-zero LastSyncAt")]
    MissingSyncHeight,
    #[error("field {field} is not a decimal integer: {value:?}")]
    BadInteger { field: &'static str, value: String },
    #[error("{field} record on tick {tick} is outside the tick table")]
    TickOutOfRange { field: &'static str, tick: i32 },
    #[error("snapshot pool is inconsistent: {0}")]
    Replica(ReplicaError),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateFile {
    /// Legacy single height; written as 0.
    #[serde(default)]
    last_sync_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_sync_block: Option<BTreeMap<Address, u64>>,
    pool_manager: ManagerRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    short_pool_manager: Option<ManagerRecord>,
    #[serde(default)]
    pools: Vec<PoolRecord>,
    #[serde(default)]
    short_pools: Vec<PoolRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManagerRecord {
    address: Address,
    reserve_pool_address: Address,
    redeem_fee_ratio: String,
    liquidation_expense_ratio: String,
    #[serde(default)]
    rate_provider: Vec<(Address, String, Address)>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PoolRecord {
    address: Address,
    collateral_token: Address,
    price_oracle: Address,
    coll_index: String,
    debt_index: String,
    redeem_status: bool,
    max_redeem_ratio_per_tick: String,
    rebalance_debt_ratio: String,
    rebalance_bonus_ratio: String,
    liquidate_debt_ratio: String,
    liquidate_bonus_ratio: String,
    #[serde(default)]
    ticks: Vec<TickRecord>,
    #[serde(default)]
    positions: Vec<TickRecord>,
}

/// Shared shape of tick and position entries.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TickRecord {
    tick: i32,
    debts: String,
    colls: String,
}

fn decimal(field: &'static str, value: &str) -> Result<U256, SnapshotError> {
    U256::from_str_radix(value, 10).map_err(|_| SnapshotError::BadInteger {
        field,
        value: value.to_string(),
    })
}

impl ManagerRecord {
    fn from_manager(manager: &Manager) -> Self {
        Self {
            address: manager.address,
            reserve_pool_address: manager.reserve_pool,
            redeem_fee_ratio: manager.redeem_fee_ratio.to_string(),
            liquidation_expense_ratio: manager.liquidation_expense_ratio.to_string(),
            rate_provider: manager
                .rate_providers
                .iter()
                .map(|r| (r.token, r.scalar.to_string(), r.provider))
                .collect(),
        }
    }

    fn into_manager(self, book: Book) -> Result<Manager, SnapshotError> {
        let mut manager = Manager::genesis(self.address, book, self.reserve_pool_address);
        manager.redeem_fee_ratio = decimal("RedeemFeeRatio", &self.redeem_fee_ratio)?;
        manager.liquidation_expense_ratio =
            decimal("LiquidationExpenseRatio", &self.liquidation_expense_ratio)?;
        for (token, scalar, provider) in self.rate_provider {
            manager.rate_providers.push(RateProvider {
                token,
                scalar: decimal("RateProvider.scalar", &scalar)?,
                provider,
            });
        }
        Ok(manager)
    }
}

impl PoolRecord {
    fn from_pool(pool: &Pool) -> Self {
        let params = pool.params();
        Self {
            address: pool.address(),
            collateral_token: pool.collateral_token(),
            price_oracle: params.price_oracle,
            coll_index: pool.coll_index().to_string(),
            debt_index: pool.debt_index().to_string(),
            redeem_status: params.redeem_status,
            max_redeem_ratio_per_tick: params.max_redeem_ratio_per_tick.to_string(),
            rebalance_debt_ratio: params.rebalance_debt_ratio.to_string(),
            rebalance_bonus_ratio: params.rebalance_bonus_ratio.to_string(),
            liquidate_debt_ratio: params.liquidate_debt_ratio.to_string(),
            liquidate_bonus_ratio: params.liquidate_bonus_ratio.to_string(),
            ticks: pool
                .occupied_ticks()
                .map(|(tick, shares)| TickRecord::new(tick, shares))
                .collect(),
            positions: pool
                .positions()
                .iter()
                .map(|p| TickRecord::new(p.tick, p.shares))
                .collect(),
        }
    }

    fn into_pool(self, book: Book) -> Result<Pool, SnapshotError> {
        let params = PoolParams {
            price_oracle: self.price_oracle,
            redeem_status: self.redeem_status,
            max_redeem_ratio_per_tick: decimal("MaxRedeemRatioPerTick", &self.max_redeem_ratio_per_tick)?,
            rebalance_debt_ratio: decimal("RebalanceDebtRatio", &self.rebalance_debt_ratio)?,
            rebalance_bonus_ratio: decimal("RebalanceBonusRatio", &self.rebalance_bonus_ratio)?,
            liquidate_debt_ratio: decimal("LiquidateDebtRatio", &self.liquidate_debt_ratio)?,
            liquidate_bonus_ratio: decimal("LiquidateBonusRatio", &self.liquidate_bonus_ratio)?,
        };
        let ticks = self
            .ticks
            .into_iter()
            .map(|t| Ok((t.tick, t.shares()?)))
            .collect::<Result<Vec<_>, SnapshotError>>()?;
        let positions = self
            .positions
            .into_iter()
            .map(|p| {
                Ok(Position {
                    tick: p.tick,
                    shares: p.shares()?,
                })
            })
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        Pool::restore(
            self.address,
            book,
            self.collateral_token,
            decimal("CollIndex", &self.coll_index)?,
            decimal("DebtIndex", &self.debt_index)?,
            params,
            ticks,
            positions,
        )
        .map_err(|e| match e {
            ReplicaError::TickOutOfRange(tick) => SnapshotError::TickOutOfRange {
                field: "Ticks",
                tick,
            },
            ReplicaError::PositionTickOutOfRange { tick, .. } => SnapshotError::TickOutOfRange {
                field: "Positions",
                tick,
            },
            other => SnapshotError::Replica(other),
        })
    }
}

impl TickRecord {
    fn new(tick: i32, shares: Shares) -> Self {
        Self {
            tick,
            debts: shares.debts.to_string(),
            colls: shares.colls.to_string(),
        }
    }

    fn shares(&self) -> Result<Shares, SnapshotError> {
        Ok(Shares {
            colls: decimal("Colls", &self.colls)?,
            debts: decimal("Debts", &self.debts)?,
        })
    }
}

/// Store directory holding one snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Restore the replica. `Ok(None)` when no snapshot exists yet.
    pub fn load(&self) -> Result<Option<LedgerReplica>, SnapshotError> {
        let path = self.path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found, starting from genesis");
                return Ok(None);
            }
            Err(source) => return Err(SnapshotError::Io { path, source }),
        };
        let file: StateFile = serde_json::from_slice(&bytes)?;
        let replica = restore(file)?;

        info!(
            path = %path.display(),
            min_synced = replica.min_synced(),
            max_synced = replica.max_synced(),
            pools = replica.all_pools().count(),
            "Snapshot restored"
        );
        Ok(Some(replica))
    }

    /// Load the snapshot or fall back to genesis.
    pub fn load_or_genesis(&self) -> Result<LedgerReplica, SnapshotError> {
        Ok(self.load()?.unwrap_or_else(LedgerReplica::genesis))
    }

    /// Persist the whole replica, replacing the previous file atomically.
    pub fn save(&self, replica: &LedgerReplica) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let file = capture(replica);
        let bytes = serde_json::to_vec(&file)?;
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        write_then_rename(&tmp, &path, &bytes).map_err(|source| SnapshotError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), bytes = bytes.len(), "Snapshot saved");
        Ok(())
    }
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::write(tmp, bytes)?;
    fs::rename(tmp, path)
}

fn capture(replica: &LedgerReplica) -> StateFile {
    StateFile {
        last_sync_at: 0,
        last_sync_block: Some(replica.last_sync_blocks().clone()),
        pool_manager: ManagerRecord::from_manager(replica.manager(Book::Long)),
        short_pool_manager: Some(ManagerRecord::from_manager(replica.manager(Book::Short))),
        pools: replica.pools(Book::Long).map(PoolRecord::from_pool).collect(),
        short_pools: replica.pools(Book::Short).map(PoolRecord::from_pool).collect(),
    }
}

fn restore(file: StateFile) -> Result<LedgerReplica, SnapshotError> {
    let mut replica = LedgerReplica::genesis();

    replica.replace_manager(file.pool_manager.into_manager(Book::Long)?);
    if let Some(short) = file.short_pool_manager {
        replica.replace_manager(short.into_manager(Book::Short)?);
    }
    for record in file.pools {
        let pool = record.into_pool(Book::Long)?;
        let height = replica.last_synced(pool.address()).unwrap_or(0);
        replica.insert_pool(pool, height);
    }
    for record in file.short_pools {
        let pool = record.into_pool(Book::Short)?;
        let height = replica.last_synced(pool.address()).unwrap_or(0);
        replica.insert_pool(pool, height);
    }

    match file.last_sync_block {
        Some(heights) => {
            for (address, height) in heights {
                replica.set_sync_height(address, height);
            }
        }
        None if file.last_sync_at != 0 => {
            let long_manager = replica.manager(Book::Long).address;
            let long_pools: Vec<Address> = replica.pools(Book::Long).map(|p| p.address()).collect();
            replica.set_sync_height(long_manager, file.last_sync_at);
            for pool in long_pools {
                replica.set_sync_height(pool, file.last_sync_at);
            }
        }
        None => return Err(SnapshotError::MissingSyncHeight),
    }

    Ok(replica)
}
