//! Tick and position eligibility scans over a replica snapshot.
//!
//! Ticks are walked from the highest slot down. Along that direction debt
//! ratios are assumed to fall monotonically within a book, so the first
//! healthy tick that is not dust ends the scan. The assumption belongs to
//! the protocol's tick ordering and is not checked here; see
//! [`ticks_to_rebalance`] for the exhaustive variant the keeper uses to
//! cross-check it.

use alloy::primitives::{Address, U256};

use crate::lock_table::{LockKey, LockTable};
use crate::replica::{slot_tick, Pool};
use crate::u256_math::{debt_ratio_at_least, DUST_RAW_DEBT};

/// Which threshold band a scan selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanBand {
    /// Debt ratio at or above `liquidateDebtRatio`.
    Liquidate,
    /// Debt ratio in `[rebalanceDebtRatio, liquidateDebtRatio)`.
    Rebalance,
}

impl ScanBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanBand::Liquidate => "liquidate",
            ScanBand::Rebalance => "rebalance",
        }
    }
}

impl std::fmt::Display for ScanBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tick selected for action, with the ratios it was selected under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleTick {
    pub pool: Address,
    pub token: Address,
    pub tick: i32,
    pub price: U256,
    pub raw_colls: U256,
    pub raw_debts: U256,
    /// 1e18 scale
    pub debt_ratio: U256,
    /// 1e9 scale
    pub bonus_ratio: U256,
}

/// A single position over the liquidation threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligiblePosition {
    pub pool: Address,
    pub token: Address,
    pub position: u32,
    pub price: U256,
    pub raw_colls: U256,
    pub raw_debts: U256,
    pub debt_ratio: U256,
    pub bonus_ratio: U256,
}

enum Verdict {
    Take,
    Skip,
    Stop,
}

fn classify(band: ScanBand, pool: &Pool, raw_colls: U256, raw_debts: U256, price: U256) -> Verdict {
    let params = pool.params();
    let liquidatable =
        debt_ratio_at_least(raw_debts, raw_colls, price, params.liquidate_debt_ratio);
    match band {
        ScanBand::Liquidate => {
            if liquidatable {
                Verdict::Take
            } else if raw_debts < DUST_RAW_DEBT {
                Verdict::Skip
            } else {
                Verdict::Stop
            }
        }
        ScanBand::Rebalance => {
            // handled by the liquidation flow
            if liquidatable || raw_debts < DUST_RAW_DEBT {
                Verdict::Skip
            } else if debt_ratio_at_least(raw_debts, raw_colls, price, params.rebalance_debt_ratio) {
                Verdict::Take
            } else {
                Verdict::Stop
            }
        }
    }
}

fn band_ratios(band: ScanBand, pool: &Pool) -> (U256, U256) {
    let params = pool.params();
    match band {
        ScanBand::Liquidate => (params.liquidate_debt_ratio, params.liquidate_bonus_ratio),
        ScanBand::Rebalance => (params.rebalance_debt_ratio, params.rebalance_bonus_ratio),
    }
}

fn walk(
    pool: &Pool,
    price: U256,
    band: ScanBand,
    locks: &LockTable,
    now: u64,
    early_exit: bool,
) -> Vec<EligibleTick> {
    let (debt_ratio, bonus_ratio) = band_ratios(band, pool);
    let mut out = Vec::new();

    for (slot, shares) in pool.tick_table().iter().enumerate().rev() {
        if shares.is_empty() {
            continue;
        }
        let tick = slot_tick(slot);
        if locks.is_locked_at(pool.address(), LockKey::Tick(tick), now) {
            continue;
        }
        let (raw_colls, raw_debts) = pool.to_raw(*shares);
        match classify(band, pool, raw_colls, raw_debts, price) {
            Verdict::Take => out.push(EligibleTick {
                pool: pool.address(),
                token: pool.collateral_token(),
                tick,
                price,
                raw_colls,
                raw_debts,
                debt_ratio,
                bonus_ratio,
            }),
            Verdict::Skip => continue,
            Verdict::Stop if early_exit => break,
            Verdict::Stop => continue,
        }
    }
    out
}

/// Eligible ticks of `pool` in descending tick order, stopping at the first
/// healthy non-dust tick. Locked ticks are skipped without ending the scan.
pub fn scan_ticks(
    pool: &Pool,
    price: U256,
    band: ScanBand,
    locks: &LockTable,
    now: u64,
) -> Vec<EligibleTick> {
    walk(pool, price, band, locks, now, true)
}

/// Every tick in the rebalance band, without the early exit.
pub fn ticks_to_rebalance(pool: &Pool, price: U256, locks: &LockTable, now: u64) -> Vec<EligibleTick> {
    walk(pool, price, ScanBand::Rebalance, locks, now, false)
}

/// Positions at or above the liquidation threshold. Position 0 is the
/// sentinel and never selected.
pub fn positions_to_liquidate(
    pool: &Pool,
    price: U256,
    locks: &LockTable,
    now: u64,
) -> Vec<EligiblePosition> {
    let params = pool.params();
    pool.positions()
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, p)| !p.shares.is_empty())
        .filter_map(|(index, p)| {
            let position = index as u32;
            if locks.is_locked_at(pool.address(), LockKey::Position(position), now) {
                return None;
            }
            let (raw_colls, raw_debts) = pool.to_raw(p.shares);
            debt_ratio_at_least(raw_debts, raw_colls, price, params.liquidate_debt_ratio).then(|| {
                EligiblePosition {
                    pool: pool.address(),
                    token: pool.collateral_token(),
                    position,
                    price,
                    raw_colls,
                    raw_debts,
                    debt_ratio: params.liquidate_debt_ratio,
                    bonus_ratio: params.liquidate_bonus_ratio,
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::genesis::{POOL_MANAGER, SHORT_POOL_MANAGER, RESERVE_POOL, WSTETH};
    use crate::replica::{Book, LedgerReplica, Manager};
    use std::time::Duration;

    const POOL: Address = Address::repeat_byte(0xaa);

    fn e18(v: u64) -> U256 {
        U256::from(v) * U256::from(10u64).pow(U256::from(18u64))
    }

    fn e17(v: u64) -> U256 {
        U256::from(v) * U256::from(10u64).pow(U256::from(17u64))
    }

    /// Replica holding one long pool with unit indices and the given ratios.
    fn replica(rebalance: U256, liquidate: U256) -> LedgerReplica {
        let mut replica = LedgerReplica::empty(
            Manager::genesis(POOL_MANAGER, Book::Long, RESERVE_POOL),
            Manager::genesis(SHORT_POOL_MANAGER, Book::Short, RESERVE_POOL),
        );
        replica.insert_pool(Pool::genesis(POOL, Book::Long, WSTETH), 0);
        replica
            .on_rebalance_ratios(POOL, rebalance, U256::from(25_000_000u64))
            .unwrap();
        replica
            .on_liquidate_ratios(POOL, liquidate, U256::from(50_000_000u64))
            .unwrap();
        replica
    }

    /// Open a fresh position at `tick`; unit indices make shares equal raw.
    fn open(replica: &mut LedgerReplica, tick: i32, colls: U256, debts: U256) {
        let next = replica.pool(POOL).unwrap().positions().len() as u32;
        replica
            .on_position_snapshot(POOL, next, tick, colls, debts)
            .unwrap();
    }

    #[test]
    fn test_end_to_end_liquidation_pick() {
        let mut replica = replica(e17(7), e17(8));
        open(&mut replica, 100, e18(10), e18(9));

        let pool = replica.pool(POOL).unwrap();
        let found = scan_ticks(pool, e18(1), ScanBand::Liquidate, replica.locks(), 0);

        assert_eq!(found.len(), 1);
        let tick = &found[0];
        assert_eq!(tick.tick, 100);
        assert_eq!(tick.raw_colls, e18(10));
        assert_eq!(tick.raw_debts, e18(9));
        assert_eq!(tick.bonus_ratio, U256::from(50_000_000u64));
        assert_eq!(tick.debt_ratio, e17(8));
        assert_eq!(tick.token, WSTETH);

        // 0.9 is above the liquidation band, so not a rebalance candidate
        assert!(scan_ticks(pool, e18(1), ScanBand::Rebalance, replica.locks(), 0).is_empty());
    }

    #[test]
    fn test_rebalance_band_and_descending_order() {
        let mut replica = replica(e17(7), e17(8));
        open(&mut replica, 300, e18(10), e18(9)); // 0.90, liquidatable
        open(&mut replica, 200, e18(10), e17(75)); // 0.75
        open(&mut replica, 100, e18(10), e17(72)); // 0.72
        open(&mut replica, 50, e18(10), e17(60)); // 0.60, healthy

        let pool = replica.pool(POOL).unwrap();
        let found = scan_ticks(pool, e18(1), ScanBand::Rebalance, replica.locks(), 0);
        let ticks: Vec<i32> = found.iter().map(|t| t.tick).collect();
        assert_eq!(ticks, vec![200, 100]);
        assert!(found.iter().all(|t| t.bonus_ratio == U256::from(25_000_000u64)));
    }

    #[test]
    fn test_non_monotonic_fixture_returns_incomplete_list() {
        let mut replica = replica(e17(7), e17(8));
        open(&mut replica, 300, e18(10), e18(9)); // 0.90, eligible
        open(&mut replica, 200, e18(10), e17(50)); // 0.50, healthy, not dust
        open(&mut replica, 100, e18(10), e18(9)); // 0.90, eligible but below the stop

        let pool = replica.pool(POOL).unwrap();
        let early = scan_ticks(pool, e18(1), ScanBand::Liquidate, replica.locks(), 0);
        assert_eq!(early.iter().map(|t| t.tick).collect::<Vec<_>>(), vec![300]);

        // Same fixture in the rebalance band: the exhaustive walk sees past the stop.
        let mut replica = self::replica(e17(7), e17(8));
        open(&mut replica, 300, e18(10), e17(75));
        open(&mut replica, 200, e18(10), e17(50));
        open(&mut replica, 100, e18(10), e17(75));
        let pool = replica.pool(POOL).unwrap();
        let early = scan_ticks(pool, e18(1), ScanBand::Rebalance, replica.locks(), 0);
        let full = ticks_to_rebalance(pool, e18(1), replica.locks(), 0);
        assert_eq!(early.len(), 1);
        assert_eq!(full.iter().map(|t| t.tick).collect::<Vec<_>>(), vec![300, 100]);
    }

    #[test]
    fn test_dust_does_not_stop_scan() {
        let mut replica = replica(e17(7), e17(8));
        open(&mut replica, 300, e18(10), U256::from(1_000u64)); // healthy dust
        open(&mut replica, 200, e18(10), e18(9));

        let pool = replica.pool(POOL).unwrap();
        let found = scan_ticks(pool, e18(1), ScanBand::Liquidate, replica.locks(), 0);
        assert_eq!(found.iter().map(|t| t.tick).collect::<Vec<_>>(), vec![200]);
    }

    #[test]
    fn test_eligible_dust_is_still_selected_for_liquidation() {
        let mut replica = replica(e17(7), e17(8));
        open(&mut replica, 10, U256::from(100u64), U256::from(90u64));

        let pool = replica.pool(POOL).unwrap();
        let found = scan_ticks(pool, e18(1), ScanBand::Liquidate, replica.locks(), 0);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_lock_suppresses_until_expiry() {
        let mut replica = replica(e17(7), e17(8));
        open(&mut replica, 100, e18(10), e18(9));
        replica
            .locks()
            .lock_at(POOL, LockKey::Tick(100), 1_000, Duration::from_secs(60));

        let pool = replica.pool(POOL).unwrap();
        assert!(scan_ticks(pool, e18(1), ScanBand::Liquidate, replica.locks(), 1_030).is_empty());
        assert_eq!(
            scan_ticks(pool, e18(1), ScanBand::Liquidate, replica.locks(), 1_060).len(),
            1
        );
    }

    #[test]
    fn test_locked_tick_does_not_stop_scan() {
        let mut replica = replica(e17(7), e17(8));
        open(&mut replica, 300, e18(10), e17(50)); // healthy, locked
        open(&mut replica, 200, e18(10), e18(9));
        replica
            .locks()
            .lock_at(POOL, LockKey::Tick(300), 0, Duration::from_secs(60));

        let pool = replica.pool(POOL).unwrap();
        let found = scan_ticks(pool, e18(1), ScanBand::Liquidate, replica.locks(), 10);
        assert_eq!(found.iter().map(|t| t.tick).collect::<Vec<_>>(), vec![200]);
    }

    #[test]
    fn test_event_clears_lock() {
        let mut replica = replica(e17(7), e17(8));
        open(&mut replica, 100, e18(10), e18(9));
        replica
            .locks()
            .lock_at(POOL, LockKey::Tick(100), 0, Duration::from_secs(3_600));
        open(&mut replica, 100, e18(1), e17(9));

        let pool = replica.pool(POOL).unwrap();
        assert_eq!(
            scan_ticks(pool, e18(1), ScanBand::Liquidate, replica.locks(), 10).len(),
            1
        );
    }

    #[test]
    fn test_positions_to_liquidate() {
        let mut replica = replica(e17(7), e17(8));
        open(&mut replica, 100, e18(10), e18(9)); // position 1
        open(&mut replica, 100, e18(10), e17(10)); // position 2, healthy
        open(&mut replica, 50, e18(10), e17(85)); // position 3
        replica
            .locks()
            .lock_at(POOL, LockKey::Position(3), 0, Duration::from_secs(60));

        let pool = replica.pool(POOL).unwrap();
        let found = positions_to_liquidate(pool, e18(1), replica.locks(), 10);
        assert_eq!(found.iter().map(|p| p.position).collect::<Vec<_>>(), vec![1]);

        let found = positions_to_liquidate(pool, e18(1), replica.locks(), 100);
        assert_eq!(found.iter().map(|p| p.position).collect::<Vec<_>>(), vec![1, 3]);
    }
}
