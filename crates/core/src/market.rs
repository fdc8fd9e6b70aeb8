//! Per-cycle market reads: oracle prices, token rates, reserve balances and
//! stable-pool state, fetched in one Multicall3 round trip.
//!
//! Calls are laid out once from the replica and decoded back positionally,
//! so the layout and the decoder can never disagree on order.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::{SolCall, SolValue};
use anyhow::{bail, Context, Result};
use fx_keeper_chain::contracts::{
    ICurveStableSwapNG, IERC20, IFxUSDBasePool, IPriceOracle, IRateProvider,
};
use fx_keeper_chain::{MulticallRequest, ProviderManager};
use std::collections::BTreeMap;
use tracing::debug;

use crate::action::IdleBalances;
use crate::replica::genesis::{FXUSD, USDC};
use crate::replica::{Book, LedgerReplica};
use crate::sizer::USDC_SCALAR;
use crate::stable_math::StablePool;
use crate::u256_math::PRECISION;

/// Contracts read alongside the replica's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketAddresses {
    pub executor: Address,
    pub base_pool: Address,
    pub stable_pool: Address,
}

/// fxUSD base pool holdings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasePool {
    pub fxusd: U256,
    pub usdc: U256,
    /// USDC price with decimal scale folded in
    pub usdc_price: U256,
}

impl BasePool {
    /// Ceiling on a single tick's repayment, in fxUSD units.
    pub fn max_liquidity(&self) -> U256 {
        self.fxusd + self.usdc * self.usdc_price / PRECISION
    }
}

/// Long-book extras.
#[derive(Debug, Clone, Default)]
pub struct LongMarket {
    pub base_pool: BasePool,
    pub stable: StablePool,
    pub idle: IdleBalances,
}

/// Everything the sizer needs for one cycle.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub block: u64,
    /// Pool -> oracle min price
    pub prices: BTreeMap<Address, U256>,
    /// Token -> rate, 1e18 for fixed providers
    pub rates: BTreeMap<Address, U256>,
    /// Token -> reserve pool balance (fxUSD included on the short book)
    pub reserve_balances: BTreeMap<Address, U256>,
    pub long: Option<LongMarket>,
}

impl MarketSnapshot {
    pub fn price(&self, pool: Address) -> Option<U256> {
        self.prices.get(&pool).copied()
    }

    pub fn reserve_balance(&self, token: Address) -> U256 {
        self.reserve_balances.get(&token).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Price(Address),
    Rate(Address),
    ReserveBalance(Address),
    BaseFxusd,
    BaseUsdc,
    BaseUsdcPrice,
    Amp,
    Fee,
    OffpegMultiplier,
    StableBalance(usize),
    IdleUsdc,
    IdleFxusd,
}

/// The call layout for one book.
#[derive(Debug, Clone)]
pub struct MarketQuery {
    book: Book,
    slots: Vec<Slot>,
    requests: Vec<MulticallRequest>,
}

impl MarketQuery {
    /// Lay out the reads for `book` from the replica's current pools and
    /// rate providers.
    pub fn new(replica: &LedgerReplica, book: Book, addresses: &MarketAddresses) -> Self {
        let mut query = Self {
            book,
            slots: Vec::new(),
            requests: Vec::new(),
        };
        let manager = replica.manager(book);

        for pool in replica.pools(book) {
            query.push(
                Slot::Price(pool.address()),
                pool.params().price_oracle,
                IPriceOracle::getPriceCall {}.abi_encode(),
            );
        }
        for provider in &manager.rate_providers {
            if !provider.is_fixed() {
                query.push(
                    Slot::Rate(provider.token),
                    provider.provider,
                    IRateProvider::getRateCall {}.abi_encode(),
                );
            }
            query.push(
                Slot::ReserveBalance(provider.token),
                provider.token,
                IERC20::balanceOfCall {
                    account: manager.reserve_pool,
                }
                .abi_encode(),
            );
        }

        match book {
            Book::Long => {
                let base = addresses.base_pool;
                let stable = addresses.stable_pool;
                query.push(Slot::BaseFxusd, base, IFxUSDBasePool::totalYieldTokenCall {}.abi_encode());
                query.push(Slot::BaseUsdc, base, IFxUSDBasePool::totalStableTokenCall {}.abi_encode());
                query.push(
                    Slot::BaseUsdcPrice,
                    base,
                    IFxUSDBasePool::getStableTokenPriceWithScaleCall {}.abi_encode(),
                );
                query.push(Slot::Amp, stable, ICurveStableSwapNG::A_preciseCall {}.abi_encode());
                query.push(Slot::Fee, stable, ICurveStableSwapNG::feeCall {}.abi_encode());
                query.push(
                    Slot::OffpegMultiplier,
                    stable,
                    ICurveStableSwapNG::offpeg_fee_multiplierCall {}.abi_encode(),
                );
                for index in 0..2usize {
                    query.push(
                        Slot::StableBalance(index),
                        stable,
                        ICurveStableSwapNG::balancesCall {
                            index: U256::from(index),
                        }
                        .abi_encode(),
                    );
                }
                query.push(
                    Slot::IdleUsdc,
                    USDC,
                    IERC20::balanceOfCall {
                        account: addresses.executor,
                    }
                    .abi_encode(),
                );
                query.push(
                    Slot::IdleFxusd,
                    FXUSD,
                    IERC20::balanceOfCall {
                        account: addresses.executor,
                    }
                    .abi_encode(),
                );
            }
            Book::Short => {
                query.push(
                    Slot::ReserveBalance(FXUSD),
                    FXUSD,
                    IERC20::balanceOfCall {
                        account: manager.reserve_pool,
                    }
                    .abi_encode(),
                );
            }
        }
        query
    }

    fn push(&mut self, slot: Slot, target: Address, call_data: Vec<u8>) {
        self.slots.push(slot);
        self.requests.push(MulticallRequest::new(target, call_data));
    }

    pub fn requests(&self) -> &[MulticallRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Decode return data, one entry per request in request order.
    pub fn decode(&self, block: u64, results: &[Bytes]) -> Result<MarketSnapshot> {
        if results.len() != self.slots.len() {
            bail!(
                "multicall returned {} results for {} calls",
                results.len(),
                self.slots.len()
            );
        }

        let mut snapshot = MarketSnapshot {
            block,
            ..Default::default()
        };
        let mut long = LongMarket {
            stable: StablePool {
                balances: vec![U256::ZERO; 2],
                rates: vec![USDC_SCALAR, U256::from(1u64)],
                ..Default::default()
            },
            ..Default::default()
        };

        for (slot, data) in self.slots.iter().zip(results) {
            if let Slot::Price(pool) = slot {
                let price = IPriceOracle::getPriceCall::abi_decode_returns(data, true)
                    .with_context(|| format!("decoding price of pool {pool}"))?;
                snapshot.prices.insert(*pool, price.minPrice);
                continue;
            }
            let value = U256::abi_decode(data, true)
                .with_context(|| format!("decoding market read {slot:?}"))?;
            match *slot {
                Slot::Price(_) => {}
                Slot::Rate(token) => {
                    snapshot.rates.insert(token, value);
                }
                Slot::ReserveBalance(token) => {
                    snapshot.reserve_balances.insert(token, value);
                }
                Slot::BaseFxusd => long.base_pool.fxusd = value,
                Slot::BaseUsdc => long.base_pool.usdc = value,
                Slot::BaseUsdcPrice => long.base_pool.usdc_price = value,
                Slot::Amp => long.stable.amp = value,
                Slot::Fee => long.stable.base_fee = value,
                Slot::OffpegMultiplier => long.stable.offpeg_multiplier = value,
                Slot::StableBalance(index) => long.stable.balances[index] = value,
                Slot::IdleUsdc => long.idle.usdc = value,
                Slot::IdleFxusd => long.idle.fxusd = value,
            }
        }

        if self.book == Book::Long {
            snapshot.long = Some(long);
        }
        debug!(
            book = %self.book,
            block,
            prices = snapshot.prices.len(),
            rates = snapshot.rates.len(),
            "Market snapshot decoded"
        );
        Ok(snapshot)
    }

    /// Run the layout through Multicall3 and decode.
    pub async fn fetch(&self, provider: &ProviderManager) -> Result<MarketSnapshot> {
        let (block, results) = provider.aggregate(self.requests.clone()).await?;
        self.decode(block, &results)
    }
}
