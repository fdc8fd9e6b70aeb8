//! Pool, tick and position records.

use alloy::primitives::{Address, U256};

use crate::u256_math::{coll_shares_to_raw, debt_shares_to_raw, E96};

/// Offset between a signed tick and its slot in the tick table.
pub const TICK_OFFSET: i32 = 32768;

/// Number of tick slots per pool.
pub const TICK_SLOTS: usize = 65536;

/// Tick of the sentinel position 0; outside the table so no tick counts it.
pub const SENTINEL_TICK: i32 = -65536;

/// Which protocol deployment a pool or manager belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Book {
    Long,
    Short,
}

impl Book {
    pub fn as_str(&self) -> &'static str {
        match self {
            Book::Long => "long",
            Book::Short => "short",
        }
    }
}

impl std::fmt::Display for Book {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collateral and debt shares, denominated in the pool's rebase indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Shares {
    pub colls: U256,
    pub debts: U256,
}

impl Shares {
    pub fn is_empty(&self) -> bool {
        self.debts.is_zero()
    }

    fn add(&mut self, other: Shares) {
        self.colls += other.colls;
        self.debts += other.debts;
    }

    fn sub(&mut self, other: Shares) {
        self.colls = self.colls.saturating_sub(other.colls);
        self.debts = self.debts.saturating_sub(other.debts);
    }
}

/// One borrower account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub tick: i32,
    pub shares: Shares,
}

impl Position {
    pub fn sentinel() -> Self {
        Self {
            tick: SENTINEL_TICK,
            shares: Shares::default(),
        }
    }
}

/// Risk parameters set by governance events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolParams {
    pub price_oracle: Address,
    pub redeem_status: bool,
    /// 1e9 scale
    pub max_redeem_ratio_per_tick: U256,
    /// 1e18 scale
    pub rebalance_debt_ratio: U256,
    /// 1e9 scale
    pub rebalance_bonus_ratio: U256,
    /// 1e18 scale
    pub liquidate_debt_ratio: U256,
    /// 1e9 scale
    pub liquidate_bonus_ratio: U256,
}

/// Replica of one lending pool. Only [`super::LedgerReplica`] mutates it.
#[derive(Debug, Clone)]
pub struct Pool {
    address: Address,
    book: Book,
    collateral_token: Address,
    coll_index: U256,
    debt_index: U256,
    params: PoolParams,
    ticks: Vec<Shares>,
    positions: Vec<Position>,
}

/// Map a signed tick to its table slot.
#[inline]
pub fn tick_slot(tick: i32) -> Option<usize> {
    let slot = tick.checked_add(TICK_OFFSET)?;
    if (0..TICK_SLOTS as i32).contains(&slot) {
        Some(slot as usize)
    } else {
        None
    }
}

/// Inverse of [`tick_slot`].
#[inline]
pub fn slot_tick(slot: usize) -> i32 {
    slot as i32 - TICK_OFFSET
}

fn rescale(value: U256, moved: U256, before: U256) -> U256 {
    if before.is_zero() {
        U256::ZERO
    } else {
        value * moved / before
    }
}

impl Pool {
    /// Genesis state: unit indices, redeem enabled, zero ratios, sentinel position.
    pub fn genesis(address: Address, book: Book, collateral_token: Address) -> Self {
        Self {
            address,
            book,
            collateral_token,
            coll_index: E96,
            debt_index: E96,
            params: PoolParams {
                redeem_status: true,
                ..Default::default()
            },
            ticks: vec![Shares::default(); TICK_SLOTS],
            positions: vec![Position::sentinel()],
        }
    }

    /// Rebuild from persisted parts. Tick aggregates are taken as stored.
    /// Every tick and every position other than the sentinel must fall
    /// inside the tick table.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        address: Address,
        book: Book,
        collateral_token: Address,
        coll_index: U256,
        debt_index: U256,
        params: PoolParams,
        ticks: impl IntoIterator<Item = (i32, Shares)>,
        positions: Vec<Position>,
    ) -> Result<Self, super::ReplicaError> {
        let mut table = vec![Shares::default(); TICK_SLOTS];
        for (tick, shares) in ticks {
            let slot = tick_slot(tick).ok_or(super::ReplicaError::TickOutOfRange(tick))?;
            table[slot] = shares;
        }
        for (index, position) in positions.iter().enumerate() {
            let sentinel = index == 0 && position.tick == SENTINEL_TICK;
            if !sentinel && tick_slot(position.tick).is_none() {
                return Err(super::ReplicaError::PositionTickOutOfRange {
                    index,
                    tick: position.tick,
                });
            }
        }
        Ok(Self {
            address,
            book,
            collateral_token,
            coll_index,
            debt_index,
            params,
            ticks: table,
            positions,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn book(&self) -> Book {
        self.book
    }

    pub fn collateral_token(&self) -> Address {
        self.collateral_token
    }

    pub fn coll_index(&self) -> U256 {
        self.coll_index
    }

    pub fn debt_index(&self) -> U256 {
        self.debt_index
    }

    pub fn params(&self) -> &PoolParams {
        &self.params
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Aggregate shares of `tick`, zero when outside the table.
    pub fn tick(&self, tick: i32) -> Shares {
        tick_slot(tick)
            .map(|slot| self.ticks[slot])
            .unwrap_or_default()
    }

    /// Slot-ordered tick table.
    pub fn tick_table(&self) -> &[Shares] {
        &self.ticks
    }

    /// Non-empty ticks as `(tick, shares)`, ascending.
    pub fn occupied_ticks(&self) -> impl Iterator<Item = (i32, Shares)> + '_ {
        self.ticks
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.colls.is_zero() || !s.debts.is_zero())
            .map(|(slot, s)| (slot_tick(slot), *s))
    }

    /// `(rawColls, rawDebts)` for a share pair.
    #[inline]
    pub fn to_raw(&self, shares: Shares) -> (U256, U256) {
        (
            coll_shares_to_raw(shares.colls, self.coll_index),
            debt_shares_to_raw(shares.debts, self.debt_index),
        )
    }

    pub(super) fn params_mut(&mut self) -> &mut PoolParams {
        &mut self.params
    }

    pub(super) fn set_coll_index(&mut self, index: U256) {
        self.coll_index = index;
    }

    pub(super) fn set_debt_index(&mut self, index: U256) {
        self.debt_index = index;
    }

    /// Append or overwrite position `index`, moving its contribution between
    /// tick aggregates. Returns the previous record when overwritten.
    pub(super) fn snapshot_position(
        &mut self,
        index: usize,
        tick: i32,
        shares: Shares,
    ) -> Result<Option<Position>, super::ReplicaError> {
        let new_slot = tick_slot(tick).ok_or(super::ReplicaError::TickOutOfRange(tick))?;
        let previous = match index.cmp(&self.positions.len()) {
            std::cmp::Ordering::Equal => {
                self.positions.push(Position { tick, shares });
                None
            }
            std::cmp::Ordering::Less => {
                let old = self.positions[index];
                if let Some(old_slot) = tick_slot(old.tick) {
                    self.ticks[old_slot].sub(old.shares);
                }
                self.positions[index] = Position { tick, shares };
                Some(old)
            }
            std::cmp::Ordering::Greater => {
                return Err(super::ReplicaError::PositionGap {
                    pool: self.address,
                    index,
                    len: self.positions.len(),
                })
            }
        };
        self.ticks[new_slot].add(shares);
        Ok(previous)
    }

    /// Move every position on `old_tick` to `new_tick`, rescaling each by
    /// `moved / aggregate_before` per side. The rounding residue goes to the
    /// last moved position so position sums keep matching the tick.
    /// Returns the indices of moved positions.
    pub(super) fn move_tick(
        &mut self,
        old_tick: i32,
        new_tick: i32,
        moved: Shares,
    ) -> Result<Vec<usize>, super::ReplicaError> {
        let old_slot = tick_slot(old_tick).ok_or(super::ReplicaError::TickOutOfRange(old_tick))?;
        let new_slot = tick_slot(new_tick).ok_or(super::ReplicaError::TickOutOfRange(new_tick))?;

        let before = std::mem::take(&mut self.ticks[old_slot]);
        let mut touched = Vec::new();
        let mut assigned = Shares::default();
        for (index, position) in self.positions.iter_mut().enumerate() {
            if position.tick != old_tick {
                continue;
            }
            position.tick = new_tick;
            position.shares = Shares {
                colls: rescale(position.shares.colls, moved.colls, before.colls),
                debts: rescale(position.shares.debts, moved.debts, before.debts),
            };
            assigned.add(position.shares);
            touched.push(index);
        }
        if let Some(&last) = touched.last() {
            let residue = &mut self.positions[last].shares;
            residue.colls += moved.colls.saturating_sub(assigned.colls);
            residue.debts += moved.debts.saturating_sub(assigned.debts);
        }
        self.ticks[new_slot].add(moved);
        Ok(touched)
    }
}
