//! f(x) protocol keeper
//!
//! Rebalances and liquidates unhealthy ticks of the f(x) long and short
//! pools. One process runs one book in one mode:
//! - Replays pool manager and pool events into a local replica
//! - Persists the replica as a JSON snapshot after every replay window
//! - Scans ticks against oracle prices once the replica is at head
//! - Sends batched executor calls, publicly or through private relays

use std::path::PathBuf;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fx_keeper_chain::gas::Eip1559GasStrategy;
use fx_keeper_chain::{PrivateRelay, ProviderManager, TransactionSenderBuilder};
use fx_keeper_core::config::{ALERT_URL_ENV, LOG_FORMAT_ENV, PRIVATE_KEY_ENV, RPC_URL_ENV};
use fx_keeper_core::{
    ActionEncoder, Book, BotConfig, Heartbeat, Keeper, Mode, Planner, SnapshotStore, Synchronizer,
};

const DEFAULT_RPC_URL: &str = "https://eth.drpc.org";
const DEFAULT_LOG_FILTER: &str = "info,fx_keeper_core=debug,fx_keeper_chain=debug";

#[derive(Debug, Parser)]
#[command(name = "fx-keeper", version, about = "f(x) protocol rebalance and liquidation keeper")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Snapshot directory; defaults to one per book and mode
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[arg(long, global = true, env = RPC_URL_ENV, default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Signer key
    #[arg(long, global = true, env = PRIVATE_KEY_ENV, hide_env_values = true)]
    private: Option<String>,

    /// Plan and log actions without sending them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Send through private relays instead of the public mempool
    #[arg(long, global = true)]
    use_private_tx: bool,

    /// Operate on the short book
    #[arg(long, global = true)]
    short: bool,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Partially repay ticks in the rebalance band
    Rebalance,
    /// Liquidate ticks past the liquidation threshold
    Liquidate,
}

impl Command {
    fn mode(self) -> Mode {
        match self {
            Command::Rebalance => Mode::Rebalance,
            Command::Liquidate => Mode::Liquidate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let cfg = BotConfig::from_env()?;
    cfg.log_config();

    let book = if cli.short { Book::Short } else { Book::Long };
    let mode = cli.command.mode();
    info!(book = %book, mode = mode.as_str(), dry_run = cli.dry_run, "Starting fx keeper");

    let store_dir = cli
        .store
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("store/{}-{}", book, mode.as_str())));
    let store = SnapshotStore::new(&store_dir);
    let replica = store
        .load_or_genesis()
        .with_context(|| format!("loading snapshot from {}", store_dir.display()))?;

    let executor = match cfg.addresses.resolve_executor()? {
        Some(executor) => executor,
        None if cli.dry_run => {
            warn!("No executor configured, dry run encodes against the zero address");
            Address::ZERO
        }
        None => bail!("no executor configured; set EXECUTOR_ADDRESS or [addresses] executor"),
    };

    let private_key = match &cli.private {
        Some(key) => key.clone(),
        None if cli.dry_run => {
            warn!("No signer key, using a throwaway key for the dry run");
            alloy::hex::encode(PrivateKeySigner::random().to_bytes())
        }
        None => bail!("no signer key; pass --private or set PRIVATE_KEY"),
    };

    let provider = ProviderManager::new(&cli.rpc_url)
        .await?
        .with_multicall(cfg.addresses.multicall);

    let mut sender = TransactionSenderBuilder::new(&cli.rpc_url)
        .gas_strategy(Box::new(Eip1559GasStrategy::new(
            cfg.gas.priority_fee_wei,
            cfg.gas.base_fee_multiplier,
        )))
        .receipt_timeout(cfg.gas.confirmation_timeout());
    if cli.use_private_tx {
        let relay = if cfg.gas.relays.is_empty() {
            PrivateRelay::with_default_relays()?
        } else {
            PrivateRelay::new(cfg.gas.relays.clone())?
        };
        info!(relays = ?relay.urls(), "Private relay submission enabled");
        sender = sender.private(relay);
    }
    let sender = sender.build(&private_key)?;

    let heartbeat = Heartbeat::new(std::env::var(ALERT_URL_ENV).ok(), cfg.heartbeat.interval())?;
    if !heartbeat.is_enabled() {
        info!("No {} set, heartbeat disabled", ALERT_URL_ENV);
    }

    let planner = Planner::new(
        ActionEncoder::new(executor, cfg.addresses.converter, cfg.sizing.slippage_bps),
        cfg.route_table()?,
        cfg.sizing.clone(),
    )?;
    let sync = Synchronizer::new(provider, store, cfg.keeper.log_window, cfg.keeper.reorg_margin);

    let mut keeper = Keeper::new(
        replica,
        sync,
        planner,
        sender,
        heartbeat,
        cfg.addresses.market(executor),
        cfg.keeper.clone(),
        book,
        mode,
        cli.dry_run,
    );
    keeper.run().await
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
