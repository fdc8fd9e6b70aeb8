//! Configuration for the keeper.
//!
//! This module provides:
//! - Runtime configuration (timing, sizing, gas, routes, addresses)
//! - Environment variable names read at startup

mod bot;

pub use bot::{
    AddressConfig, BotConfig, GasConfig, HeartbeatConfig, KeeperConfig, RouteConfig,
    ShortPoolConfig, ShortTokenConfig, SizingConfig, ALERT_URL_ENV, CONFIG_ENV, EXECUTOR_ENV,
    LOG_FORMAT_ENV, PRIVATE_KEY_ENV, RPC_URL_ENV,
};
