//! Event-sourced replica of pool managers, pools, ticks and positions.
//!
//! [`LedgerReplica`] is the single owner of replicated state. Each on-chain
//! event kind has one mutation method here; every method keeps the
//! tick/position invariant (a tick's aggregate equals the sum of the
//! positions assigned to it) and clears locks on whatever it touched.

pub mod genesis;
mod manager;
mod pool;

pub use manager::{Manager, RateProvider};
pub use pool::{
    slot_tick, tick_slot, Book, Pool, PoolParams, Position, Shares, SENTINEL_TICK, TICK_OFFSET,
    TICK_SLOTS,
};

use alloy::primitives::{Address, U256};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::lock_table::{LockKey, LockTable};

/// Replica mutation failures. All of them mean the replayed log does not
/// match what the replica believes, so the sync pass must stop.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("unknown pool {0}")]
    UnknownPool(Address),
    #[error("unknown manager {0}")]
    UnknownManager(Address),
    #[error("position {index} of pool {pool} skips past table length {len}")]
    PositionGap {
        pool: Address,
        index: usize,
        len: usize,
    },
    #[error("tick {0} outside the tick table")]
    TickOutOfRange(i32),
    #[error("position {index} sits on tick {tick} outside the tick table")]
    PositionTickOutOfRange { index: usize, tick: i32 },
}

/// In-memory replica of both books.
#[derive(Debug)]
pub struct LedgerReplica {
    long_manager: Manager,
    short_manager: Manager,
    pools: BTreeMap<Address, Pool>,
    last_sync_block: BTreeMap<Address, u64>,
    locks: LockTable,
}

impl LedgerReplica {
    /// Hard-coded mainnet deployment state.
    pub fn genesis() -> Self {
        use self::genesis::*;

        let mut replica = Self::empty(
            Manager::genesis(POOL_MANAGER, Book::Long, RESERVE_POOL),
            Manager::genesis(SHORT_POOL_MANAGER, Book::Short, RESERVE_POOL),
        );
        replica.insert_pool(Pool::genesis(WSTETH_POOL, Book::Long, WSTETH), LONG_GENESIS_BLOCK);
        replica.insert_pool(Pool::genesis(WBTC_POOL, Book::Long, WBTC), WBTC_POOL_GENESIS_BLOCK);
        replica.insert_pool(
            Pool::genesis(WSTETH_SHORT_POOL, Book::Short, WSTETH),
            SHORT_GENESIS_BLOCK,
        );
        replica.last_sync_block.insert(POOL_MANAGER, LONG_GENESIS_BLOCK);
        replica.last_sync_block.insert(SHORT_POOL_MANAGER, SHORT_GENESIS_BLOCK);
        replica
    }

    /// Replica with managers only; pools are added with [`Self::insert_pool`].
    pub fn empty(long_manager: Manager, short_manager: Manager) -> Self {
        Self {
            long_manager,
            short_manager,
            pools: BTreeMap::new(),
            last_sync_block: BTreeMap::new(),
            locks: LockTable::new(),
        }
    }

    /// Track `pool`, recording `synced_to` as its replay height.
    pub fn insert_pool(&mut self, pool: Pool, synced_to: u64) {
        self.last_sync_block.insert(pool.address(), synced_to);
        self.pools.insert(pool.address(), pool);
    }

    pub(crate) fn replace_manager(&mut self, manager: Manager) {
        match manager.book {
            Book::Long => self.long_manager = manager,
            Book::Short => self.short_manager = manager,
        }
    }

    // ---- queries ----

    pub fn manager(&self, book: Book) -> &Manager {
        match book {
            Book::Long => &self.long_manager,
            Book::Short => &self.short_manager,
        }
    }

    pub fn pool(&self, address: Address) -> Option<&Pool> {
        self.pools.get(&address)
    }

    /// Pools of one book, ordered by address.
    pub fn pools(&self, book: Book) -> impl Iterator<Item = &Pool> {
        self.pools.values().filter(move |p| p.book() == book)
    }

    pub fn all_pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    /// Book an address belongs to, for managers and pools alike.
    pub fn book_of(&self, address: Address) -> Option<Book> {
        if address == self.long_manager.address {
            Some(Book::Long)
        } else if address == self.short_manager.address {
            Some(Book::Short)
        } else {
            self.pools.get(&address).map(|p| p.book())
        }
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    // ---- sync heights ----

    /// Every contract whose logs are replayed.
    pub fn tracked_addresses(&self) -> Vec<Address> {
        self.last_sync_block.keys().copied().collect()
    }

    pub fn last_sync_blocks(&self) -> &BTreeMap<Address, u64> {
        &self.last_sync_block
    }

    pub fn last_synced(&self, address: Address) -> Option<u64> {
        self.last_sync_block.get(&address).copied()
    }

    /// Lowest replay height across tracked contracts.
    pub fn min_synced(&self) -> u64 {
        self.last_sync_block.values().copied().min().unwrap_or(0)
    }

    /// Highest replay height across tracked contracts.
    pub fn max_synced(&self) -> u64 {
        self.last_sync_block.values().copied().max().unwrap_or(0)
    }

    /// Raise every tracked height to `height`; heights never move back.
    pub fn advance_sync_height(&mut self, height: u64) {
        for synced in self.last_sync_block.values_mut() {
            if height > *synced {
                *synced = height;
            }
        }
    }

    pub(crate) fn set_sync_height(&mut self, address: Address, height: u64) {
        self.last_sync_block.insert(address, height);
    }

    // ---- manager events ----

    fn manager_mut(&mut self, address: Address) -> Result<&mut Manager, ReplicaError> {
        if address == self.long_manager.address {
            Ok(&mut self.long_manager)
        } else if address == self.short_manager.address {
            Ok(&mut self.short_manager)
        } else {
            Err(ReplicaError::UnknownManager(address))
        }
    }

    pub fn on_reserve_pool(&mut self, manager: Address, reserve: Address) -> Result<(), ReplicaError> {
        self.manager_mut(manager)?.reserve_pool = reserve;
        Ok(())
    }

    pub fn on_liquidation_expense_ratio(
        &mut self,
        manager: Address,
        ratio: U256,
    ) -> Result<(), ReplicaError> {
        self.manager_mut(manager)?.liquidation_expense_ratio = ratio;
        Ok(())
    }

    pub fn on_redeem_fee_ratio(&mut self, manager: Address, ratio: U256) -> Result<(), ReplicaError> {
        self.manager_mut(manager)?.redeem_fee_ratio = ratio;
        Ok(())
    }

    pub fn on_token_rate(
        &mut self,
        manager: Address,
        token: Address,
        scalar: U256,
        provider: Address,
    ) -> Result<(), ReplicaError> {
        self.manager_mut(manager)?
            .set_token_rate(token, scalar, provider);
        Ok(())
    }

    // ---- pool parameter events ----

    fn pool_mut(&mut self, address: Address) -> Result<&mut Pool, ReplicaError> {
        self.pools
            .get_mut(&address)
            .ok_or(ReplicaError::UnknownPool(address))
    }

    pub fn on_price_oracle(&mut self, pool: Address, oracle: Address) -> Result<(), ReplicaError> {
        self.pool_mut(pool)?.params_mut().price_oracle = oracle;
        Ok(())
    }

    pub fn on_redeem_status(&mut self, pool: Address, status: bool) -> Result<(), ReplicaError> {
        self.pool_mut(pool)?.params_mut().redeem_status = status;
        Ok(())
    }

    pub fn on_max_redeem_ratio(&mut self, pool: Address, ratio: U256) -> Result<(), ReplicaError> {
        self.pool_mut(pool)?.params_mut().max_redeem_ratio_per_tick = ratio;
        Ok(())
    }

    pub fn on_rebalance_ratios(
        &mut self,
        pool: Address,
        debt_ratio: U256,
        bonus_ratio: U256,
    ) -> Result<(), ReplicaError> {
        let params = self.pool_mut(pool)?.params_mut();
        params.rebalance_debt_ratio = debt_ratio;
        params.rebalance_bonus_ratio = bonus_ratio;
        Ok(())
    }

    pub fn on_liquidate_ratios(
        &mut self,
        pool: Address,
        debt_ratio: U256,
        bonus_ratio: U256,
    ) -> Result<(), ReplicaError> {
        let params = self.pool_mut(pool)?.params_mut();
        params.liquidate_debt_ratio = debt_ratio;
        params.liquidate_bonus_ratio = bonus_ratio;
        Ok(())
    }

    pub fn on_debt_index(&mut self, pool: Address, index: U256) -> Result<(), ReplicaError> {
        self.pool_mut(pool)?.set_debt_index(index);
        Ok(())
    }

    pub fn on_collateral_index(&mut self, pool: Address, index: U256) -> Result<(), ReplicaError> {
        self.pool_mut(pool)?.set_coll_index(index);
        Ok(())
    }

    // ---- position and tick events ----

    /// Position `position` now sits on `tick` with the given shares.
    pub fn on_position_snapshot(
        &mut self,
        pool: Address,
        position: u32,
        tick: i32,
        coll_shares: U256,
        debt_shares: U256,
    ) -> Result<Option<Position>, ReplicaError> {
        let shares = Shares {
            colls: coll_shares,
            debts: debt_shares,
        };
        let previous = self
            .pool_mut(pool)?
            .snapshot_position(position as usize, tick, shares)?;

        self.locks.clear(pool, LockKey::Tick(tick));
        if let Some(old) = previous {
            self.locks.clear(pool, LockKey::Tick(old.tick));
        }
        self.locks.clear(pool, LockKey::Position(position));

        debug!(
            pool = %pool,
            position,
            old_tick = previous.map(|p| p.tick),
            new_tick = tick,
            colls = %coll_shares,
            debts = %debt_shares,
            "Position snapshot applied"
        );
        Ok(previous)
    }

    /// Every position on `old_tick` moved to `new_tick`, carrying the given
    /// total shares.
    pub fn on_tick_movement(
        &mut self,
        pool: Address,
        old_tick: i32,
        new_tick: i32,
        coll_shares: U256,
        debt_shares: U256,
    ) -> Result<usize, ReplicaError> {
        let moved = Shares {
            colls: coll_shares,
            debts: debt_shares,
        };
        let touched = self.pool_mut(pool)?.move_tick(old_tick, new_tick, moved)?;

        self.locks.clear(pool, LockKey::Tick(old_tick));
        self.locks.clear(pool, LockKey::Tick(new_tick));
        for index in &touched {
            self.locks.clear(pool, LockKey::Position(*index as u32));
        }

        debug!(
            pool = %pool,
            old_tick,
            new_tick,
            positions = touched.len(),
            colls = %coll_shares,
            debts = %debt_shares,
            "Tick movement applied"
        );
        Ok(touched.len())
    }
}
