//! Short-lived suppression of ticks and positions with a pending action.
//!
//! Locks are in-memory only. They are set after a submission succeeds and
//! cleared as soon as the replica observes an on-chain change for the same
//! tick or position; losing them on restart only risks a duplicate attempt.

use alloy::primitives::Address;
use dashmap::DashMap;
use std::time::Duration;

/// What a lock refers to. Tick and position indices live in separate
/// namespaces, so tick 5 and position 5 never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    Tick(i32),
    Position(u32),
}

/// `(pool, tick-or-position) -> unlock time` in epoch seconds.
#[derive(Debug, Default)]
pub struct LockTable {
    entries: DashMap<(Address, LockKey), u64>,
}

/// Current wall-clock time in epoch seconds.
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `key` until `now + duration`.
    pub fn lock_at(&self, pool: Address, key: LockKey, now: u64, duration: Duration) {
        self.entries
            .insert((pool, key), now.saturating_add(duration.as_secs()));
    }

    /// Lock `key` for `duration` from wall-clock now.
    pub fn lock(&self, pool: Address, key: LockKey, duration: Duration) {
        self.lock_at(pool, key, now_secs(), duration);
    }

    pub fn lock_tick(&self, pool: Address, tick: i32, duration: Duration) {
        self.lock(pool, LockKey::Tick(tick), duration);
    }

    /// Expire `key` immediately, regardless of remaining time.
    pub fn clear(&self, pool: Address, key: LockKey) {
        if let Some(mut entry) = self.entries.get_mut(&(pool, key)) {
            *entry = 0;
        }
    }

    /// True while the unlock time is strictly in the future.
    pub fn is_locked_at(&self, pool: Address, key: LockKey, now: u64) -> bool {
        self.entries
            .get(&(pool, key))
            .is_some_and(|until| *until > now)
    }

    pub fn is_locked(&self, pool: Address, key: LockKey) -> bool {
        self.is_locked_at(pool, key, now_secs())
    }

    /// Drop expired entries.
    pub fn purge_expired(&self, now: u64) {
        self.entries.retain(|_, until| *until > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
