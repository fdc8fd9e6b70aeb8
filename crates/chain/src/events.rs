//! Pool manager and pool events replayed into the ledger replica.
//!
//! Logs are fetched with a single topic-0 allow list across all tracked
//! contracts and decoded into [`ProtocolEvent`]. Unknown topics are dropped.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{bail, Context, Result};

sol! {
    interface IPoolManager {
        event UpdateReservePool(address indexed oldReservePool, address indexed newReservePool);
        event UpdateLiquidationExpenseRatio(uint256 oldRatio, uint256 newRatio);
        event UpdateRedeemFeeRatio(uint256 oldRatio, uint256 newRatio);
        event UpdateTokenRate(address indexed token, uint256 scalar, address provider);
    }

    interface IPool {
        event UpdatePriceOracle(address indexed oldOracle, address indexed newOracle);
        event UpdateRedeemStatus(bool status);
        event UpdateMaxRedeemRatioPerTick(uint256 ratio);
        event UpdateRebalanceRatios(uint256 debtRatio, uint256 bonusRatio);
        event UpdateLiquidateRatios(uint256 debtRatio, uint256 bonusRatio);
        event PositionSnapshot(uint256 indexed position, int16 tick, uint256 collShares, uint256 debtShares, uint256 price);
        event TickMovement(int16 indexed oldTick, int16 indexed newTick, uint256 collShares, uint256 debtShares, uint256 price);
        event DebtIndexSnapshot(uint256 index);
        event CollateralIndexSnapshot(uint256 index);
    }
}

/// Decoded replica event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    ReservePool { new_reserve: Address },
    LiquidationExpenseRatio { ratio: U256 },
    RedeemFeeRatio { ratio: U256 },
    TokenRate { token: Address, scalar: U256, provider: Address },
    PriceOracle { new_oracle: Address },
    RedeemStatus { status: bool },
    MaxRedeemRatioPerTick { ratio: U256 },
    RebalanceRatios { debt_ratio: U256, bonus_ratio: U256 },
    LiquidateRatios { debt_ratio: U256, bonus_ratio: U256 },
    PositionSnapshot { position: u32, tick: i32, coll_shares: U256, debt_shares: U256 },
    TickMovement { old_tick: i32, new_tick: i32, coll_shares: U256, debt_shares: U256 },
    DebtIndex { index: U256 },
    CollateralIndex { index: U256 },
}

impl ProtocolEvent {
    /// Event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::ReservePool { .. } => "UpdateReservePool",
            ProtocolEvent::LiquidationExpenseRatio { .. } => "UpdateLiquidationExpenseRatio",
            ProtocolEvent::RedeemFeeRatio { .. } => "UpdateRedeemFeeRatio",
            ProtocolEvent::TokenRate { .. } => "UpdateTokenRate",
            ProtocolEvent::PriceOracle { .. } => "UpdatePriceOracle",
            ProtocolEvent::RedeemStatus { .. } => "UpdateRedeemStatus",
            ProtocolEvent::MaxRedeemRatioPerTick { .. } => "UpdateMaxRedeemRatioPerTick",
            ProtocolEvent::RebalanceRatios { .. } => "UpdateRebalanceRatios",
            ProtocolEvent::LiquidateRatios { .. } => "UpdateLiquidateRatios",
            ProtocolEvent::PositionSnapshot { .. } => "PositionSnapshot",
            ProtocolEvent::TickMovement { .. } => "TickMovement",
            ProtocolEvent::DebtIndex { .. } => "DebtIndexSnapshot",
            ProtocolEvent::CollateralIndex { .. } => "CollateralIndexSnapshot",
        }
    }
}

/// A decoded event with the log metadata replay needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolLog {
    pub address: Address,
    pub block_number: u64,
    pub tx_hash: Option<B256>,
    pub event: ProtocolEvent,
}

/// Topic-0 allow list for `eth_getLogs`.
pub fn topic_allow_list() -> Vec<B256> {
    vec![
        IPoolManager::UpdateReservePool::SIGNATURE_HASH,
        IPoolManager::UpdateLiquidationExpenseRatio::SIGNATURE_HASH,
        IPoolManager::UpdateRedeemFeeRatio::SIGNATURE_HASH,
        IPoolManager::UpdateTokenRate::SIGNATURE_HASH,
        IPool::UpdatePriceOracle::SIGNATURE_HASH,
        IPool::UpdateRedeemStatus::SIGNATURE_HASH,
        IPool::UpdateMaxRedeemRatioPerTick::SIGNATURE_HASH,
        IPool::UpdateRebalanceRatios::SIGNATURE_HASH,
        IPool::UpdateLiquidateRatios::SIGNATURE_HASH,
        IPool::PositionSnapshot::SIGNATURE_HASH,
        IPool::TickMovement::SIGNATURE_HASH,
        IPool::DebtIndexSnapshot::SIGNATURE_HASH,
        IPool::CollateralIndexSnapshot::SIGNATURE_HASH,
    ]
}

fn decode<E: SolEvent>(log: &Log) -> Result<E> {
    E::decode_log_data(log.data(), true).with_context(|| {
        format!(
            "malformed {} log from {} in tx {:?}",
            E::SIGNATURE,
            log.address(),
            log.transaction_hash
        )
    })
}

/// Decode a raw RPC log. Returns `Ok(None)` for unknown topics and for logs
/// still pending (no block number). An allow-listed log that does not decode
/// is an error.
pub fn decode_log(log: &Log) -> Result<Option<ProtocolLog>> {
    let Some(block_number) = log.block_number else {
        return Ok(None);
    };
    let Some(topic0) = log.topic0().copied() else {
        return Ok(None);
    };

    let event = match topic0 {
        IPoolManager::UpdateReservePool::SIGNATURE_HASH => {
            let e = decode::<IPoolManager::UpdateReservePool>(log)?;
            ProtocolEvent::ReservePool {
                new_reserve: e.newReservePool,
            }
        }
        IPoolManager::UpdateLiquidationExpenseRatio::SIGNATURE_HASH => {
            let e = decode::<IPoolManager::UpdateLiquidationExpenseRatio>(log)?;
            ProtocolEvent::LiquidationExpenseRatio { ratio: e.newRatio }
        }
        IPoolManager::UpdateRedeemFeeRatio::SIGNATURE_HASH => {
            let e = decode::<IPoolManager::UpdateRedeemFeeRatio>(log)?;
            ProtocolEvent::RedeemFeeRatio { ratio: e.newRatio }
        }
        IPoolManager::UpdateTokenRate::SIGNATURE_HASH => {
            let e = decode::<IPoolManager::UpdateTokenRate>(log)?;
            ProtocolEvent::TokenRate {
                token: e.token,
                scalar: e.scalar,
                provider: e.provider,
            }
        }
        IPool::UpdatePriceOracle::SIGNATURE_HASH => {
            let e = decode::<IPool::UpdatePriceOracle>(log)?;
            ProtocolEvent::PriceOracle {
                new_oracle: e.newOracle,
            }
        }
        IPool::UpdateRedeemStatus::SIGNATURE_HASH => {
            let e = decode::<IPool::UpdateRedeemStatus>(log)?;
            ProtocolEvent::RedeemStatus { status: e.status }
        }
        IPool::UpdateMaxRedeemRatioPerTick::SIGNATURE_HASH => {
            let e = decode::<IPool::UpdateMaxRedeemRatioPerTick>(log)?;
            ProtocolEvent::MaxRedeemRatioPerTick { ratio: e.ratio }
        }
        IPool::UpdateRebalanceRatios::SIGNATURE_HASH => {
            let e = decode::<IPool::UpdateRebalanceRatios>(log)?;
            ProtocolEvent::RebalanceRatios {
                debt_ratio: e.debtRatio,
                bonus_ratio: e.bonusRatio,
            }
        }
        IPool::UpdateLiquidateRatios::SIGNATURE_HASH => {
            let e = decode::<IPool::UpdateLiquidateRatios>(log)?;
            ProtocolEvent::LiquidateRatios {
                debt_ratio: e.debtRatio,
                bonus_ratio: e.bonusRatio,
            }
        }
        IPool::PositionSnapshot::SIGNATURE_HASH => {
            let e = decode::<IPool::PositionSnapshot>(log)?;
            if e.position > U256::from(u32::MAX) {
                bail!(
                    "position id {} from {} in tx {:?} exceeds u32",
                    e.position,
                    log.address(),
                    log.transaction_hash
                );
            }
            ProtocolEvent::PositionSnapshot {
                position: e.position.to::<u32>(),
                tick: i32::from(e.tick),
                coll_shares: e.collShares,
                debt_shares: e.debtShares,
            }
        }
        IPool::TickMovement::SIGNATURE_HASH => {
            let e = decode::<IPool::TickMovement>(log)?;
            ProtocolEvent::TickMovement {
                old_tick: i32::from(e.oldTick),
                new_tick: i32::from(e.newTick),
                coll_shares: e.collShares,
                debt_shares: e.debtShares,
            }
        }
        IPool::DebtIndexSnapshot::SIGNATURE_HASH => {
            let e = decode::<IPool::DebtIndexSnapshot>(log)?;
            ProtocolEvent::DebtIndex { index: e.index }
        }
        IPool::CollateralIndexSnapshot::SIGNATURE_HASH => {
            let e = decode::<IPool::CollateralIndexSnapshot>(log)?;
            ProtocolEvent::CollateralIndex { index: e.index }
        }
        _ => return Ok(None),
    };

    Ok(Some(ProtocolLog {
        address: log.address(),
        block_number,
        tx_hash: log.transaction_hash,
        event,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData};

    fn rpc_log(address: Address, data: LogData, block: Option<u64>) -> Log {
        Log {
            inner: alloy::primitives::Log { address, data },
            block_number: block,
            ..Default::default()
        }
    }

    #[test]
    fn test_allow_list_is_distinct() {
        let topics = topic_allow_list();
        let mut deduped = topics.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(topics.len(), 13);
        assert_eq!(deduped.len(), topics.len());
    }

    #[test]
    fn test_decode_position_snapshot() {
        let pool = Address::repeat_byte(0x42);
        let event = IPool::PositionSnapshot {
            position: U256::from(7u64),
            tick: -120,
            collShares: U256::from(1_000u64),
            debtShares: U256::from(500u64),
            price: U256::ZERO,
        };
        let log = rpc_log(pool, event.encode_log_data(), Some(123));

        let decoded = decode_log(&log).unwrap().unwrap();
        assert_eq!(decoded.address, pool);
        assert_eq!(decoded.block_number, 123);
        assert_eq!(
            decoded.event,
            ProtocolEvent::PositionSnapshot {
                position: 7,
                tick: -120,
                coll_shares: U256::from(1_000u64),
                debt_shares: U256::from(500u64),
            }
        );
    }

    #[test]
    fn test_decode_tick_movement() {
        let event = IPool::TickMovement {
            oldTick: 5,
            newTick: -3,
            collShares: U256::from(9u64),
            debtShares: U256::from(4u64),
            price: U256::ZERO,
        };
        let log = rpc_log(Address::ZERO, event.encode_log_data(), Some(1));
        let decoded = decode_log(&log).unwrap().unwrap();
        assert_eq!(decoded.event.name(), "TickMovement");
        assert!(matches!(
            decoded.event,
            ProtocolEvent::TickMovement { old_tick: 5, new_tick: -3, .. }
        ));
    }

    #[test]
    fn test_pending_and_unknown_logs_are_skipped() {
        let event = IPool::DebtIndexSnapshot { index: U256::from(1u64) };
        let pending = rpc_log(Address::ZERO, event.encode_log_data(), None);
        assert!(decode_log(&pending).unwrap().is_none());

        let unknown = LogData::new_unchecked(vec![B256::repeat_byte(0xee)], Default::default());
        assert!(decode_log(&rpc_log(Address::ZERO, unknown, Some(1))).unwrap().is_none());
    }

    #[test]
    fn test_truncated_allow_listed_log_is_an_error() {
        let event = IPool::PositionSnapshot {
            position: U256::from(1u64),
            tick: 10,
            collShares: U256::from(1u64),
            debtShares: U256::from(1u64),
            price: U256::ZERO,
        };
        let full = event.encode_log_data();
        let truncated = LogData::new_unchecked(
            full.topics().to_vec(),
            Bytes::copy_from_slice(&full.data[..64]),
        );
        let err = decode_log(&rpc_log(Address::ZERO, truncated, Some(5))).unwrap_err();
        assert!(err.to_string().contains("PositionSnapshot"));
    }

    #[test]
    fn test_oversized_position_id_is_an_error() {
        let event = IPool::PositionSnapshot {
            position: U256::from(u64::from(u32::MAX) + 1),
            tick: 0,
            collShares: U256::ZERO,
            debtShares: U256::ZERO,
            price: U256::ZERO,
        };
        let log = rpc_log(Address::ZERO, event.encode_log_data(), Some(5));
        assert!(decode_log(&log).is_err());
    }
}
