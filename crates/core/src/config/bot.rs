//! Keeper configuration.
//!
//! Every field has a serde default, so an empty file (or no file at all)
//! yields the mainnet settings. Token amounts are human decimals such as
//! `"0.01"` and are converted to fixed point when a policy is built.

use alloy::primitives::{address, Address, U256};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::market::MarketAddresses;
use crate::replica::genesis::{WBTC, WSTETH, WSTETH_SHORT_POOL};
use crate::route::{encode_multi_path, parse_hop, RouteTable};
use crate::sizer::SizingPolicy;
use crate::u256_math::parse_units;

/// Path of a TOML file overriding the defaults.
pub const CONFIG_ENV: &str = "KEEPER_CONFIG";
/// Signer key.
pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";
/// RPC endpoint.
pub const RPC_URL_ENV: &str = "RPC_URL";
/// Liveness URL pinged by the heartbeat.
pub const ALERT_URL_ENV: &str = "ALERT_URL";
/// `json` switches the log formatter.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
/// Executor contract, overriding `[addresses] executor`.
pub const EXECUTOR_ENV: &str = "EXECUTOR_ADDRESS";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Poll loop timing
    #[serde(default)]
    pub keeper: KeeperConfig,

    /// Batch caps and thresholds
    #[serde(default)]
    pub sizing: SizingConfig,

    /// Liveness ping
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Transaction pricing
    #[serde(default)]
    pub gas: GasConfig,

    /// Flash-loan swap routes per pool
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// External contract addresses
    #[serde(default)]
    pub addresses: AddressConfig,
}

/// Poll loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Pause between cycles (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Pause after a failed sync (milliseconds)
    #[serde(default = "default_sync_backoff")]
    pub sync_error_backoff_ms: u64,

    /// Pause after a failed scan or submission (milliseconds)
    #[serde(default = "default_cycle_backoff")]
    pub cycle_error_backoff_ms: u64,

    /// How long a submitted tick stays out of scans (seconds)
    #[serde(default = "default_lock_duration")]
    pub lock_duration_secs: u64,

    /// Blocks per log request
    #[serde(default = "default_log_window")]
    pub log_window: u64,

    /// Blocks behind head the replica stops at
    #[serde(default = "default_reorg_margin")]
    pub reorg_margin: u64,
}

fn default_poll_interval() -> u64 {
    2_000
}
fn default_sync_backoff() -> u64 {
    2_000
}
fn default_cycle_backoff() -> u64 {
    10_000
}
fn default_lock_duration() -> u64 {
    60
}
fn default_log_window() -> u64 {
    500
}
fn default_reorg_margin() -> u64 {
    1
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            sync_error_backoff_ms: default_sync_backoff(),
            cycle_error_backoff_ms: default_cycle_backoff(),
            lock_duration_secs: default_lock_duration(),
            log_window: default_log_window(),
            reorg_margin: default_reorg_margin(),
        }
    }
}

impl KeeperConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn sync_error_backoff(&self) -> Duration {
        Duration::from_millis(self.sync_error_backoff_ms)
    }
    pub fn cycle_error_backoff(&self) -> Duration {
        Duration::from_millis(self.cycle_error_backoff_ms)
    }
    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_secs)
    }
}

/// Short-book thresholds for one base token, in the token's decimals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShortTokenConfig {
    pub token: Address,
    pub decimals: u8,
    pub dust: String,
    pub flash_threshold: String,
    pub min_rebalance_bonus: String,
}

/// Short-book debt cap for one pool, 18 decimals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShortPoolConfig {
    pub pool: Address,
    pub max_debt: String,
}

/// Batch caps and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Ticks per action
    #[serde(default = "default_max_ticks")]
    pub max_ticks: usize,

    /// Long-book raw debt cap per action (fxUSD)
    #[serde(default = "default_long_max_debt")]
    pub long_max_debt: String,

    /// Long-book batches below this are dropped (fxUSD)
    #[serde(default = "default_long_dust")]
    pub long_dust: String,

    /// Long-book liquidations from this size use a flash loan (fxUSD)
    #[serde(default = "default_long_flash_threshold")]
    pub long_flash_threshold: String,

    /// Long-book rebalances below this net bonus are dropped (fxUSD)
    #[serde(default = "default_long_min_bonus")]
    pub long_min_rebalance_bonus: String,

    /// Slippage on flash-loan amounts (basis points)
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,

    #[serde(default = "default_short_tokens")]
    pub short_tokens: Vec<ShortTokenConfig>,

    #[serde(default = "default_short_pools")]
    pub short_pools: Vec<ShortPoolConfig>,
}

fn default_max_ticks() -> usize {
    20
}
fn default_long_max_debt() -> String {
    "1000000".to_string()
}
fn default_long_dust() -> String {
    "0.01".to_string()
}
fn default_long_flash_threshold() -> String {
    "1000".to_string()
}
fn default_long_min_bonus() -> String {
    "100".to_string()
}
fn default_slippage_bps() -> u16 {
    1
}
fn default_short_tokens() -> Vec<ShortTokenConfig> {
    vec![
        ShortTokenConfig {
            token: WSTETH,
            decimals: 18,
            dust: "0.000001".to_string(),
            flash_threshold: "0.1".to_string(),
            min_rebalance_bonus: "0.001".to_string(),
        },
        ShortTokenConfig {
            token: WBTC,
            decimals: 8,
            dust: "0.00000001".to_string(),
            flash_threshold: "0.0001".to_string(),
            min_rebalance_bonus: "0.000001".to_string(),
        },
    ]
}
fn default_short_pools() -> Vec<ShortPoolConfig> {
    vec![ShortPoolConfig {
        pool: WSTETH_SHORT_POOL,
        max_debt: "250".to_string(),
    }]
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_ticks: default_max_ticks(),
            long_max_debt: default_long_max_debt(),
            long_dust: default_long_dust(),
            long_flash_threshold: default_long_flash_threshold(),
            long_min_rebalance_bonus: default_long_min_bonus(),
            slippage_bps: default_slippage_bps(),
            short_tokens: default_short_tokens(),
            short_pools: default_short_pools(),
        }
    }
}

fn amount(field: &str, value: &str, decimals: u8) -> Result<U256> {
    parse_units(value, decimals).with_context(|| format!("invalid amount {value:?} for {field}"))
}

impl SizingConfig {
    /// Policy shared by every long-book pool.
    pub fn long_policy(&self) -> Result<SizingPolicy> {
        Ok(SizingPolicy {
            max_ticks: self.max_ticks,
            max_debt: amount("long_max_debt", &self.long_max_debt, 18)?,
            dust: amount("long_dust", &self.long_dust, 18)?,
            flash_threshold: amount("long_flash_threshold", &self.long_flash_threshold, 18)?,
            min_rebalance_bonus: amount(
                "long_min_rebalance_bonus",
                &self.long_min_rebalance_bonus,
                18,
            )?,
        })
    }

    /// Policy for one short-book pool settling in `base_token`. A pool with
    /// no configured cap is uncapped.
    pub fn short_policy(&self, pool: Address, base_token: Address) -> Result<SizingPolicy> {
        let Some(token) = self.short_tokens.iter().find(|t| t.token == base_token) else {
            bail!("no short sizing configured for base token {}", base_token);
        };
        let max_debt = match self.short_pools.iter().find(|p| p.pool == pool) {
            Some(p) => amount("short_pools.max_debt", &p.max_debt, 18)?,
            None => U256::MAX,
        };
        Ok(SizingPolicy {
            max_ticks: self.max_ticks,
            max_debt,
            dust: amount("short_tokens.dust", &token.dust, token.decimals)?,
            flash_threshold: amount("short_tokens.flash_threshold", &token.flash_threshold, token.decimals)?,
            min_rebalance_bonus: amount(
                "short_tokens.min_rebalance_bonus",
                &token.min_rebalance_bonus,
                token.decimals,
            )?,
        })
    }
}

/// Liveness ping settings. The URL itself comes from `ALERT_URL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Minimum time between pings (milliseconds)
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

fn default_heartbeat_interval() -> u64 {
    120_000
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Transaction pricing and confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// `maxFeePerGas = baseFee * multiplier`
    #[serde(default = "default_base_fee_multiplier")]
    pub base_fee_multiplier: u128,

    /// Tip (wei)
    #[serde(default = "default_priority_fee")]
    pub priority_fee_wei: u128,

    /// How long to wait for a receipt (seconds)
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Private relay endpoints; empty means the built-in list
    #[serde(default)]
    pub relays: Vec<String>,
}

fn default_base_fee_multiplier() -> u128 {
    2
}
fn default_priority_fee() -> u128 {
    100_000_000 // 0.1 gwei
}
fn default_confirmation_timeout() -> u64 {
    60
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            base_fee_multiplier: default_base_fee_multiplier(),
            priority_fee_wei: default_priority_fee(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            relays: Vec::new(),
        }
    }
}

impl GasConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Swap route for one pool: `paths[i]` gets `parts[i]` of the input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    pub pool: Address,
    /// Pre-encoded pool hints, hex
    pub paths: Vec<Vec<String>>,
    pub parts: Vec<u64>,
}

/// External contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressConfig {
    /// Arbitrage proxy receiving executor calls
    #[serde(default)]
    pub executor: Option<Address>,

    #[serde(default = "default_converter")]
    pub converter: Address,

    /// USDC/fxUSD stable pool
    #[serde(default = "default_stable_pool")]
    pub stable_pool: Address,

    /// fxUSD base pool
    #[serde(default = "default_base_pool")]
    pub base_pool: Address,

    #[serde(default = "default_multicall")]
    pub multicall: Address,
}

fn default_converter() -> Address {
    address!("12AF4529129303D7FbD2563E242C4a2890525912")
}
fn default_stable_pool() -> Address {
    address!("5018BE882DccE5E3F2f3B0913AE2096B9b3fB61f")
}
fn default_base_pool() -> Address {
    address!("65C9A641afCEB9C0E6034e558A319488FA0FA3be")
}
fn default_multicall() -> Address {
    address!("cA11bde05977b3631167028862bE2a173976CA11")
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            executor: None,
            converter: default_converter(),
            stable_pool: default_stable_pool(),
            base_pool: default_base_pool(),
            multicall: default_multicall(),
        }
    }
}

impl AddressConfig {
    /// Executor from `EXECUTOR_ADDRESS`, falling back to the file.
    pub fn resolve_executor(&self) -> Result<Option<Address>> {
        match std::env::var(EXECUTOR_ENV) {
            Ok(value) if !value.trim().is_empty() => {
                let parsed = value
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid {EXECUTOR_ENV} {value:?}"))?;
                Ok(Some(parsed))
            }
            _ => Ok(self.executor),
        }
    }

    pub fn market(&self, executor: Address) -> MarketAddresses {
        MarketAddresses {
            executor,
            base_pool: self.base_pool,
            stable_pool: self.stable_pool,
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        let config: Self = toml::from_str(&content).with_context(|| format!("parsing config {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `KEEPER_CONFIG` when set, defaults otherwise.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Check every amount and route parses.
    pub fn validate(&self) -> Result<()> {
        self.sizing.long_policy()?;
        for token in &self.sizing.short_tokens {
            self.sizing.short_policy(Address::ZERO, token.token)?;
        }
        for pool in &self.sizing.short_pools {
            amount("short_pools.max_debt", &pool.max_debt, 18)?;
        }
        self.route_table()?;
        Ok(())
    }

    /// Encoded routes keyed by pool.
    pub fn route_table(&self) -> Result<RouteTable> {
        let mut table = RouteTable::new();
        for route in &self.routes {
            let paths = route
                .paths
                .iter()
                .map(|path| path.iter().map(|hop| parse_hop(hop)).collect::<Result<Vec<_>>>())
                .collect::<Result<Vec<_>>>()?;
            let encoded = encode_multi_path(&paths, &route.parts)
                .with_context(|| format!("route for pool {}", route.pool))?;
            table.insert(route.pool, encoded);
        }
        Ok(table)
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(
            poll_ms = self.keeper.poll_interval_ms,
            lock_secs = self.keeper.lock_duration_secs,
            log_window = self.keeper.log_window,
            reorg_margin = self.keeper.reorg_margin,
            "Keeper timing"
        );
        tracing::info!(
            max_ticks = self.sizing.max_ticks,
            long_max_debt = %self.sizing.long_max_debt,
            long_dust = %self.sizing.long_dust,
            long_flash_threshold = %self.sizing.long_flash_threshold,
            slippage_bps = self.sizing.slippage_bps,
            "Sizing limits"
        );
        tracing::info!(
            routes = self.routes.len(),
            executor = ?self.addresses.executor,
            converter = %self.addresses.converter,
            "Addresses"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::u256_math::PRECISION;

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert_eq!(config.keeper.log_window, 500);
        assert_eq!(config.keeper.lock_duration(), Duration::from_secs(60));
        assert_eq!(config.heartbeat.interval(), Duration::from_millis(120_000));
        assert_eq!(config.gas.priority_fee_wei, 100_000_000);

        let long = config.sizing.long_policy().unwrap();
        assert_eq!(long.max_ticks, 20);
        assert_eq!(long.dust, PRECISION / U256::from(100u64));
        assert_eq!(long.flash_threshold, U256::from(1_000u64) * PRECISION);
        assert_eq!(long.min_rebalance_bonus, U256::from(100u64) * PRECISION);
    }

    #[test]
    fn test_short_policies() {
        let sizing = SizingConfig::default();
        let wsteth = sizing.short_policy(WSTETH_SHORT_POOL, WSTETH).unwrap();
        assert_eq!(wsteth.dust, U256::from(1_000_000_000_000u64));
        assert_eq!(wsteth.flash_threshold, PRECISION / U256::from(10u64));
        assert_eq!(wsteth.max_debt, U256::from(250u64) * PRECISION);

        let wbtc = sizing.short_policy(Address::repeat_byte(1), WBTC).unwrap();
        assert_eq!(wbtc.dust, U256::from(1u64));
        assert_eq!(wbtc.flash_threshold, U256::from(10_000u64));
        assert_eq!(wbtc.min_rebalance_bonus, U256::from(100u64));
        assert_eq!(wbtc.max_debt, U256::MAX);

        assert!(sizing.short_policy(WSTETH_SHORT_POOL, Address::ZERO).is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let parsed: BotConfig = toml::from_str(
            r#"
            [keeper]
            poll_interval_ms = 500

            [sizing]
            long_dust = "5"

            [[routes]]
            pool = "0x6Ecfa38FeE8a5277B91eFdA204c235814F0122E8"
            paths = [["0x01", "0x02"]]
            parts = [100]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.keeper.poll_interval(), Duration::from_millis(500));
        assert_eq!(parsed.keeper.reorg_margin, 1);
        assert_eq!(parsed.sizing.long_policy().unwrap().dust, U256::from(5u64) * PRECISION);
        assert_eq!(parsed.sizing.short_tokens.len(), 2);

        let routes = parsed.route_table().unwrap();
        assert_eq!(routes.len(), 1);
        let route = routes
            .get(crate::replica::genesis::WSTETH_POOL)
            .unwrap();
        assert_eq!(route.routes, vec![U256::from(1u64), U256::from(2u64)]);
    }

    #[test]
    fn test_invalid_amount_rejected() {
        let mut config = BotConfig::default();
        config.sizing.long_dust = "lots".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialization() {
        let config = BotConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: BotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.sizing.long_max_debt, "1000000");
        assert_eq!(parsed.addresses.converter, config.addresses.converter);
    }
}
