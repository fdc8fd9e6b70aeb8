//! Mainnet deployment addresses and the blocks replay starts from.

use alloy::primitives::{address, Address};

pub const POOL_MANAGER: Address = address!("250893CA4Ba5d05626C785e8da758026928FCD24");
pub const SHORT_POOL_MANAGER: Address = address!("aCDc0AB51178d0Ae8F70c1EAd7d3cF5421FDd66D");
pub const WSTETH_POOL: Address = address!("6Ecfa38FeE8a5277B91eFdA204c235814F0122E8");
pub const WBTC_POOL: Address = address!("AB709e26Fa6B0A30c119D8c55B887DeD24952473");
pub const WSTETH_SHORT_POOL: Address = address!("25707b9e6690B52C60aE6744d711cf9C1dFC1876");
pub const RESERVE_POOL: Address = address!("E93F5DD55eC9bdAbbba5eA88E4b4f3C253ee45Ed");

pub const WSTETH: Address = address!("7f39C581F595B53c5cb19bD0b3f8dA6c935E2Ca0");
pub const WBTC: Address = address!("2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599");
pub const FXUSD: Address = address!("085780639CC2cACd35E474e71f4d000e2405d8f6");
pub const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

/// Deployment blocks; replay starts right after these.
pub const LONG_GENESIS_BLOCK: u64 = 21_529_327;
pub const WBTC_POOL_GENESIS_BLOCK: u64 = 22_067_306;
pub const SHORT_GENESIS_BLOCK: u64 = 22_953_614;
