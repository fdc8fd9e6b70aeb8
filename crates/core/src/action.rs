//! Executor calldata for sized batches.
//!
//! Flash-loan actions carry a one-byte mode ahead of
//! `abi.encode(pool, converter, swapData)`. Long-book modes are
//! `use_fxusd + 2` for liquidation and `use_fxusd` for rebalance; the short
//! book uses 1 and 0.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::{SolCall, SolValue};
use anyhow::{bail, Result};
use fx_keeper_chain::contracts::{
    IFxBatchV2Executor, IFxLongBatchExecutor, IFxShortBatchExecutor, IMultiPathConverter,
};

use crate::eligibility::ScanBand;
use crate::replica::genesis::{FXUSD, USDC};
use crate::route::SwapRoute;
use crate::sizer::{Batch, FundingPath, USDC_SCALAR};
use crate::u256_math::apply_basis_points_up;

/// Executor's own stable balances, used to pick the direct-path asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleBalances {
    pub usdc: U256,
    pub fxusd: U256,
}

impl IdleBalances {
    /// USDC when it holds more (in 6-decimal terms) than fxUSD.
    pub fn settlement_token(&self) -> Address {
        if self.usdc > self.fxusd / USDC_SCALAR {
            USDC
        } else {
            FXUSD
        }
    }
}

/// A fully built executor call plus the ticks to lock once it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub target: Address,
    pub calldata: Bytes,
    pub pool: Address,
    pub ticks: Vec<i32>,
    pub path: FundingPath,
}

/// Encodes batches against one executor deployment.
#[derive(Debug, Clone)]
pub struct ActionEncoder {
    executor: Address,
    converter: Address,
    slippage_bps: u16,
}

impl ActionEncoder {
    pub fn new(executor: Address, converter: Address, slippage_bps: u16) -> Self {
        Self {
            executor,
            converter,
            slippage_bps,
        }
    }

    pub fn executor(&self) -> Address {
        self.executor
    }

    /// Long book. Flash loans borrow the stable amount (6 decimals) and swap
    /// the seized `base_token` back along `route`.
    pub fn encode_long(
        &self,
        batch: &Batch,
        path: FundingPath,
        base_token: Address,
        route: Option<&SwapRoute>,
        idle: IdleBalances,
    ) -> Result<ActionRequest> {
        let calldata = match path {
            FundingPath::FlashLoan { use_fxusd } => {
                let mode = match batch.band {
                    ScanBand::Liquidate => u8::from(use_fxusd) + 2,
                    ScanBand::Rebalance => u8::from(use_fxusd),
                };
                let data = self.flash_data(mode, batch.pool, base_token, route)?;
                IFxLongBatchExecutor::rebalanceOrLiquidateV2WithCreditNoteCall {
                    amountIn: apply_basis_points_up(batch.total_debts / USDC_SCALAR, self.slippage_bps),
                    data,
                }
                .abi_encode()
            }
            FundingPath::Direct => {
                if batch.band == ScanBand::Rebalance {
                    bail!("rebalance of pool {} has no direct path", batch.pool);
                }
                IFxBatchV2Executor::liquidateV2Call {
                    pool: batch.pool,
                    tokenIn: idle.settlement_token(),
                }
                .abi_encode()
            }
        };
        Ok(self.request(batch, path, calldata))
    }

    /// Short book. Flash loans borrow `base_token` and swap fxUSD into it.
    pub fn encode_short(
        &self,
        batch: &Batch,
        path: FundingPath,
        base_token: Address,
        route: Option<&SwapRoute>,
    ) -> Result<ActionRequest> {
        let calldata = match path {
            FundingPath::FlashLoan { .. } => {
                let mode = match batch.band {
                    ScanBand::Liquidate => 1,
                    ScanBand::Rebalance => 0,
                };
                let data = self.flash_data(mode, batch.pool, FXUSD, route)?;
                IFxShortBatchExecutor::shortRebalanceOrLiquidateCall {
                    baseToken: base_token,
                    amountIn: apply_basis_points_up(batch.total_debts, self.slippage_bps),
                    data,
                }
                .abi_encode()
            }
            FundingPath::Direct => {
                if batch.band == ScanBand::Rebalance {
                    bail!("rebalance of pool {} has no direct path", batch.pool);
                }
                IFxShortBatchExecutor::shortLiquidateCall {
                    pool: batch.pool,
                    baseToken: base_token,
                }
                .abi_encode()
            }
        };
        Ok(self.request(batch, path, calldata))
    }

    fn flash_data(
        &self,
        mode: u8,
        pool: Address,
        token_in: Address,
        route: Option<&SwapRoute>,
    ) -> Result<Bytes> {
        let Some(route) = route else {
            bail!("no swap route configured for pool {}", pool);
        };
        let swap_data = IMultiPathConverter::convertCall {
            tokenIn: token_in,
            amount: U256::MAX,
            encoding: route.encoding,
            routes: route.routes.clone(),
        }
        .abi_encode();
        let user_data = (pool, self.converter, Bytes::from(swap_data)).abi_encode_params();

        let mut data = Vec::with_capacity(1 + user_data.len());
        data.push(mode);
        data.extend_from_slice(&user_data);
        Ok(data.into())
    }

    fn request(&self, batch: &Batch, path: FundingPath, calldata: Vec<u8>) -> ActionRequest {
        ActionRequest {
            target: self.executor,
            calldata: calldata.into(),
            pool: batch.pool,
            ticks: batch.ticks.clone(),
            path,
        }
    }
}
