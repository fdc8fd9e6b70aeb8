//! Poll loop for one book and one band.
//!
//! Each pass syncs the replica, pings the heartbeat, and then, only if the
//! chain head has not moved since the sync, reads market state, scans every
//! pool of the book, sizes and encodes at most one action per pool, and
//! submits it. Ticks of a sent action are locked until a replayed event or
//! the lock expiry says otherwise.

use alloy::primitives::{Address, U256};
use anyhow::{bail, Result};
use fx_keeper_chain::{ProviderManager, TransactionSender};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::action::{ActionEncoder, ActionRequest};
use crate::config::{KeeperConfig, SizingConfig};
use crate::eligibility::{
    positions_to_liquidate, scan_ticks, ticks_to_rebalance, EligibleTick, ScanBand,
};
use crate::heartbeat::Heartbeat;
use crate::lock_table::now_secs;
use crate::market::{MarketAddresses, MarketQuery, MarketSnapshot};
use crate::replica::genesis::FXUSD;
use crate::replica::{Book, LedgerReplica, Pool};
use crate::route::{RouteTable, SwapRoute};
use crate::sizer::{
    long_funding, short_funding, size_batch, Batch, FundingPath, Liquidity, Skip, SizingPolicy,
};
use crate::sync::Synchronizer;
use crate::u256_math::{format_units, PRECISION};

/// Which band a keeper process acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Liquidate,
    Rebalance,
}

impl Mode {
    pub fn band(&self) -> ScanBand {
        match self {
            Mode::Liquidate => ScanBand::Liquidate,
            Mode::Rebalance => ScanBand::Rebalance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.band().as_str()
    }
}

/// Turns replica state plus one market snapshot into executor calls.
#[derive(Debug, Clone)]
pub struct Planner {
    encoder: ActionEncoder,
    routes: RouteTable,
    sizing: SizingConfig,
    long_policy: SizingPolicy,
}

impl Planner {
    pub fn new(encoder: ActionEncoder, routes: RouteTable, sizing: SizingConfig) -> Result<Self> {
        let long_policy = sizing.long_policy()?;
        Ok(Self {
            encoder,
            routes,
            sizing,
            long_policy,
        })
    }

    /// At most one action per pool of `book`, in pool address order.
    pub fn plan(
        &self,
        replica: &LedgerReplica,
        market: &MarketSnapshot,
        book: Book,
        band: ScanBand,
        now: u64,
    ) -> Result<Vec<ActionRequest>> {
        let mut actions = Vec::new();
        for pool in replica.pools(book) {
            if let Some(action) = self.plan_pool(replica, pool, market, band, now)? {
                actions.push(action);
            }
        }
        Ok(actions)
    }

    fn plan_pool(
        &self,
        replica: &LedgerReplica,
        pool: &Pool,
        market: &MarketSnapshot,
        band: ScanBand,
        now: u64,
    ) -> Result<Option<ActionRequest>> {
        let address = pool.address();
        let Some(price) = market.price(address) else {
            bail!("no price for pool {}", address);
        };

        let ticks = scan_ticks(pool, price, band, replica.locks(), now);
        match band {
            ScanBand::Rebalance => report_missed_ticks(pool, price, &ticks, replica, now),
            ScanBand::Liquidate => report_liquidatable_positions(pool, price, replica, now),
        }
        if ticks.is_empty() {
            debug!(pool = %address, band = %band, price = %format_units(price, 18), "No eligible ticks");
            return Ok(None);
        }

        let base_token = pool.collateral_token();
        let expense_ratio = replica.manager(pool.book()).liquidation_expense_ratio;
        let route = self.routes.get(address);

        match pool.book() {
            Book::Long => {
                let Some(long) = &market.long else {
                    bail!("market snapshot for block {} has no long-book data", market.block);
                };
                let liquidity = Liquidity::long(
                    market.reserve_balance(base_token),
                    long.base_pool.max_liquidity(),
                );
                let Some(batch) = sized(&ticks, band, &self.long_policy, &liquidity, expense_ratio)
                else {
                    return Ok(None);
                };
                let path = long_funding(&batch, &self.long_policy, &long.stable);
                let Some(path) = routed(&batch, path, route) else {
                    return Ok(None);
                };
                info!(
                    pool = %address,
                    band = %band,
                    ticks = ?batch.ticks,
                    debts = %format_units(batch.total_debts, 18),
                    bonus = %format_units(batch.total_bonus, 18),
                    path = path.as_str(),
                    spot = %long.stable.spot_price().map(|p| format_units(p, 18)).unwrap_or_default(),
                    "Action planned"
                );
                self.encoder
                    .encode_long(&batch, path, base_token, route, long.idle)
                    .map(Some)
            }
            Book::Short => {
                let policy = self.sizing.short_policy(address, base_token)?;
                let scaling = replica
                    .manager(Book::Short)
                    .rate_provider(base_token)
                    .map(|p| p.scaling_factor(market.rates.get(&base_token).copied()))
                    .unwrap_or(PRECISION);
                let liquidity = Liquidity::short(market.reserve_balance(FXUSD), scaling);
                let Some(batch) = sized(&ticks, band, &policy, &liquidity, expense_ratio) else {
                    return Ok(None);
                };
                let path = short_funding(&batch, &policy);
                let Some(path) = routed(&batch, path, route) else {
                    return Ok(None);
                };
                info!(
                    pool = %address,
                    band = %band,
                    ticks = ?batch.ticks,
                    debts = %batch.total_debts,
                    bonus = %batch.total_bonus,
                    path = path.as_str(),
                    "Action planned"
                );
                self.encoder
                    .encode_short(&batch, path, base_token, route)
                    .map(Some)
            }
        }
    }
}

fn sized(
    ticks: &[EligibleTick],
    band: ScanBand,
    policy: &SizingPolicy,
    liquidity: &Liquidity,
    expense_ratio: U256,
) -> Option<Batch> {
    match size_batch(ticks, band, policy, liquidity, expense_ratio) {
        Ok(batch) => Some(batch),
        Err(Skip::NoTicks) => None,
        Err(skip) => {
            let pool = ticks.first().map(|t| t.pool).unwrap_or_default();
            info!(pool = %pool, band = %band, reason = %skip, "Batch skipped");
            None
        }
    }
}

/// A flash loan needs a route. Without one a liquidation falls back to idle
/// balances and a rebalance is dropped.
fn routed(batch: &Batch, path: FundingPath, route: Option<&SwapRoute>) -> Option<FundingPath> {
    if route.is_some() || path == FundingPath::Direct {
        return Some(path);
    }
    match batch.band {
        ScanBand::Liquidate => {
            warn!(pool = %batch.pool, "No swap route, liquidating from idle balances");
            Some(FundingPath::Direct)
        }
        ScanBand::Rebalance => {
            warn!(pool = %batch.pool, "No swap route, skipping rebalance");
            None
        }
    }
}

fn report_missed_ticks(
    pool: &Pool,
    price: U256,
    found: &[EligibleTick],
    replica: &LedgerReplica,
    now: u64,
) {
    let missed: Vec<i32> = ticks_to_rebalance(pool, price, replica.locks(), now)
        .iter()
        .map(|t| t.tick)
        .filter(|tick| !found.iter().any(|f| f.tick == *tick))
        .collect();
    if !missed.is_empty() {
        warn!(pool = %pool.address(), missed = ?missed, "Early-exit scan missed rebalance ticks");
    }
}

fn report_liquidatable_positions(pool: &Pool, price: U256, replica: &LedgerReplica, now: u64) {
    let positions: Vec<u32> = positions_to_liquidate(pool, price, replica.locks(), now)
        .iter()
        .map(|p| p.position)
        .collect();
    if !positions.is_empty() {
        debug!(pool = %pool.address(), positions = ?positions, "Positions past the liquidation threshold");
    }
}

/// Long-running keeper for one book and mode.
pub struct Keeper {
    replica: LedgerReplica,
    sync: Synchronizer<ProviderManager>,
    planner: Planner,
    sender: TransactionSender,
    heartbeat: Heartbeat,
    addresses: MarketAddresses,
    settings: KeeperConfig,
    book: Book,
    mode: Mode,
    dry_run: bool,
}

impl Keeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        replica: LedgerReplica,
        sync: Synchronizer<ProviderManager>,
        planner: Planner,
        sender: TransactionSender,
        heartbeat: Heartbeat,
        addresses: MarketAddresses,
        settings: KeeperConfig,
        book: Book,
        mode: Mode,
        dry_run: bool,
    ) -> Self {
        Self {
            replica,
            sync,
            planner,
            sender,
            heartbeat,
            addresses,
            settings,
            book,
            mode,
            dry_run,
        }
    }

    pub fn replica(&self) -> &LedgerReplica {
        &self.replica
    }

    /// Run forever. Only setup errors escape; everything inside the loop is
    /// logged and retried after a backoff.
    #[instrument(skip(self), fields(book = %self.book, mode = self.mode.as_str()))]
    pub async fn run(&mut self) -> Result<()> {
        info!(
            synced = self.replica.min_synced(),
            pools = self.replica.pools(self.book).count(),
            dry_run = self.dry_run,
            sender = %self.sender.address,
            gas = self.sender.gas_strategy_name(),
            private = self.sender.is_private(),
            "Starting keeper loop"
        );
        loop {
            if let Err(e) = self.sync.sync(&mut self.replica).await {
                warn!(error = %e, "Sync failed, retrying");
                sleep(self.settings.sync_error_backoff()).await;
                continue;
            }
            self.heartbeat.beat().await;

            match self.cycle().await {
                Ok(()) => sleep(self.settings.poll_interval()).await,
                Err(e) => {
                    error!(error = %format!("{e:#}"), "Keeper cycle failed");
                    sleep(self.settings.cycle_error_backoff()).await;
                }
            }
        }
    }

    /// Scan and act once, if the replica is current.
    async fn cycle(&self) -> Result<()> {
        let provider = self.sync.source();
        let head = provider.block_number().await?;
        if !self.sync.is_caught_up(&self.replica, head) {
            debug!(head, synced = self.replica.min_synced(), "Head moved during sync, rescanning");
            return Ok(());
        }

        let now = now_secs();
        self.replica.locks().purge_expired(now);

        let market = MarketQuery::new(&self.replica, self.book, &self.addresses)
            .fetch(provider)
            .await?;
        let actions = self
            .planner
            .plan(&self.replica, &market, self.book, self.mode.band(), now)?;

        submit_each(actions, |action| self.submit(action)).await;
        Ok(())
    }

    async fn submit(&self, action: ActionRequest) -> Result<()> {
        if self.dry_run {
            info!(
                pool = %action.pool,
                target = %action.target,
                ticks = ?action.ticks,
                path = action.path.as_str(),
                calldata = %action.calldata,
                "Dry run, not sending"
            );
            return Ok(());
        }

        let outcome = self.sender.send(action.target, action.calldata.clone()).await?;
        if outcome.was_sent() {
            lock_ticks(&self.replica, action.pool, &action.ticks, self.settings.lock_duration());
        }
        Ok(())
    }
}

/// Submit every action in turn. A failure is logged and does not stop the
/// actions for the remaining pools. Returns the number that failed.
async fn submit_each<F, Fut>(actions: Vec<ActionRequest>, mut submit: F) -> usize
where
    F: FnMut(ActionRequest) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failed = 0;
    for action in actions {
        let pool = action.pool;
        if let Err(e) = submit(action).await {
            failed += 1;
            error!(pool = %pool, error = %format!("{e:#}"), "Action failed, continuing");
        }
    }
    failed
}

fn lock_ticks(replica: &LedgerReplica, pool: Address, ticks: &[i32], duration: Duration) {
    for tick in ticks {
        replica.locks().lock_tick(pool, *tick, duration);
    }
    debug!(pool = %pool, ticks = ?ticks, secs = duration.as_secs(), "Ticks locked");
}

async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{BasePool, LongMarket};
    use crate::replica::genesis::{POOL_MANAGER, RESERVE_POOL, SHORT_POOL_MANAGER, WSTETH};
    use crate::replica::Manager;
    use crate::sizer::USDC_SCALAR;
    use crate::stable_math::StablePool;
    use alloy::sol_types::SolCall;
    use fx_keeper_chain::contracts::{IFxBatchV2Executor, IFxLongBatchExecutor, IFxShortBatchExecutor};

    const LONG_POOL: Address = Address::repeat_byte(0xa1);
    const SHORT_POOL: Address = Address::repeat_byte(0xa2);
    const EXECUTOR: Address = Address::repeat_byte(0xee);
    const CONVERTER: Address = Address::repeat_byte(0xcc);

    fn e18(v: u64) -> U256 {
        U256::from(v) * PRECISION
    }

    fn e17(v: u64) -> U256 {
        U256::from(v) * PRECISION / U256::from(10u64)
    }

    fn replica() -> LedgerReplica {
        let mut replica = LedgerReplica::empty(
            Manager::genesis(POOL_MANAGER, Book::Long, RESERVE_POOL),
            Manager::genesis(SHORT_POOL_MANAGER, Book::Short, RESERVE_POOL),
        );
        replica.insert_pool(Pool::genesis(LONG_POOL, Book::Long, WSTETH), 0);
        replica.insert_pool(Pool::genesis(SHORT_POOL, Book::Short, WSTETH), 0);
        for pool in [LONG_POOL, SHORT_POOL] {
            replica
                .on_rebalance_ratios(pool, e17(7), U256::from(25_000_000u64))
                .unwrap();
            replica
                .on_liquidate_ratios(pool, e17(8), U256::from(50_000_000u64))
                .unwrap();
        }
        replica
            .on_token_rate(SHORT_POOL_MANAGER, WSTETH, U256::from(1u64), Address::ZERO)
            .unwrap();
        replica
    }

    fn open(replica: &mut LedgerReplica, pool: Address, tick: i32, colls: U256, debts: U256) {
        let next = replica.pool(pool).unwrap().positions().len() as u32;
        replica
            .on_position_snapshot(pool, next, tick, colls, debts)
            .unwrap();
    }

    fn market() -> MarketSnapshot {
        let mut market = MarketSnapshot {
            block: 1,
            long: Some(LongMarket {
                base_pool: BasePool {
                    fxusd: e18(1_000_000),
                    usdc: U256::ZERO,
                    usdc_price: PRECISION,
                },
                stable: StablePool {
                    balances: vec![U256::from(10_000_000u64) * U256::from(1_000_000u64), e18(10_000_000)],
                    rates: vec![USDC_SCALAR, U256::from(1u64)],
                    amp: U256::from(50_000u64),
                    base_fee: U256::from(1_000_000u64),
                    offpeg_multiplier: U256::from(50_000_000_000u64),
                },
                idle: Default::default(),
            }),
            ..Default::default()
        };
        market.prices.insert(LONG_POOL, PRECISION);
        market.prices.insert(SHORT_POOL, PRECISION);
        market
    }

    fn route() -> SwapRoute {
        SwapRoute {
            encoding: U256::from(1u64),
            routes: vec![U256::from(2u64)],
        }
    }

    fn planner(with_routes: bool) -> Planner {
        let mut routes = RouteTable::new();
        if with_routes {
            routes.insert(LONG_POOL, route());
            routes.insert(SHORT_POOL, route());
        }
        Planner::new(
            ActionEncoder::new(EXECUTOR, CONVERTER, 1),
            routes,
            SizingConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_mode_band() {
        assert_eq!(Mode::Liquidate.band(), ScanBand::Liquidate);
        assert_eq!(Mode::Rebalance.band(), ScanBand::Rebalance);
    }

    #[test]
    fn test_long_liquidation_uses_flash_loan() {
        let mut replica = replica();
        open(&mut replica, LONG_POOL, 100, e18(10_000), e18(9_000));

        let actions = planner(true)
            .plan(&replica, &market(), Book::Long, ScanBand::Liquidate, 0)
            .unwrap();
        assert_eq!(actions.len(), 1);
        let action = &actions[0];
        assert_eq!(action.target, EXECUTOR);
        assert_eq!(action.pool, LONG_POOL);
        assert_eq!(action.ticks, vec![100]);
        assert_eq!(action.path, FundingPath::FlashLoan { use_fxusd: false });

        let call = IFxLongBatchExecutor::rebalanceOrLiquidateV2WithCreditNoteCall::abi_decode(
            &action.calldata,
            true,
        )
        .unwrap();
        // liquidation settled in USDC
        assert_eq!(call.data[0], 2);
    }

    #[test]
    fn test_missing_route_falls_back_to_direct_liquidation() {
        let mut replica = replica();
        open(&mut replica, LONG_POOL, 100, e18(10_000), e18(9_000));

        let actions = planner(false)
            .plan(&replica, &market(), Book::Long, ScanBand::Liquidate, 0)
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].path, FundingPath::Direct);
        let call = IFxBatchV2Executor::liquidateV2Call::abi_decode(&actions[0].calldata, true).unwrap();
        assert_eq!(call.pool, LONG_POOL);
    }

    #[test]
    fn test_missing_route_drops_rebalance() {
        let mut replica = replica();
        // 0.75 sits in the rebalance band with a bonus well above the minimum
        open(&mut replica, LONG_POOL, 50, e18(40_000), e18(30_000));

        let with_route = planner(true)
            .plan(&replica, &market(), Book::Long, ScanBand::Rebalance, 0)
            .unwrap();
        assert_eq!(with_route.len(), 1);
        assert!(matches!(with_route[0].path, FundingPath::FlashLoan { .. }));

        let without = planner(false)
            .plan(&replica, &market(), Book::Long, ScanBand::Rebalance, 0)
            .unwrap();
        assert!(without.is_empty());
    }

    #[test]
    fn test_healthy_pool_plans_nothing() {
        let mut replica = replica();
        open(&mut replica, LONG_POOL, 10, e18(10), e18(5));
        let actions = planner(true)
            .plan(&replica, &market(), Book::Long, ScanBand::Liquidate, 0)
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_locked_ticks_are_not_replanned() {
        let mut replica = replica();
        open(&mut replica, LONG_POOL, 100, e18(10_000), e18(9_000));
        lock_ticks(&replica, LONG_POOL, &[100], Duration::from_secs(60));

        let actions = planner(true)
            .plan(&replica, &market(), Book::Long, ScanBand::Liquidate, now_secs())
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_short_liquidation() {
        let mut replica = replica();
        open(&mut replica, SHORT_POOL, 7, e18(10), e18(9));

        let actions = planner(true)
            .plan(&replica, &market(), Book::Short, ScanBand::Liquidate, 0)
            .unwrap();
        assert_eq!(actions.len(), 1);
        let call =
            IFxShortBatchExecutor::shortRebalanceOrLiquidateCall::abi_decode(&actions[0].calldata, true)
                .unwrap();
        assert_eq!(call.baseToken, WSTETH);
        assert_eq!(call.data[0], 1);
        assert_eq!(call.amountIn, e18(9) * U256::from(10_001u64) / U256::from(10_000u64));
    }

    #[test]
    fn test_missing_price_is_an_error() {
        let replica = replica();
        let mut market = market();
        market.prices.clear();
        assert!(planner(true)
            .plan(&replica, &market, Book::Long, ScanBand::Liquidate, 0)
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_action_does_not_stop_other_pools() {
        let action = |pool: Address| ActionRequest {
            target: Address::ZERO,
            calldata: Default::default(),
            pool,
            ticks: vec![1],
            path: FundingPath::Direct,
        };
        let actions = vec![action(LONG_POOL), action(SHORT_POOL), action(LONG_POOL)];

        let attempted = parking_lot::Mutex::new(Vec::new());
        let failed = submit_each(actions, |a| {
            attempted.lock().push(a.pool);
            async move {
                if a.pool == LONG_POOL {
                    bail!("execution reverted");
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(failed, 2);
        assert_eq!(*attempted.lock(), vec![LONG_POOL, SHORT_POOL, LONG_POOL]);
    }
}
