//! Swap routes for the multi-path converter.
//!
//! A route splits an input across up to eight paths. Each path is a list of
//! pre-encoded 256-bit pool hints; the `encoding` word packs, per path, the
//! hop count and the share of input (out of `0xfffff`) in 32-bit lanes.

use alloy::primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;

/// Full scale of a path's input share.
const RATIO_SCALE: u64 = 0xfffff;

/// Lanes available in the encoding word.
const MAX_PATHS: usize = 8;

/// Converter input: split encoding plus the flattened hop list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRoute {
    pub encoding: U256,
    pub routes: Vec<U256>,
}

/// Pack `paths` weighted by `parts`. Zero-weight paths are left out.
pub fn encode_multi_path(paths: &[Vec<U256>], parts: &[u64]) -> Result<SwapRoute> {
    if paths.len() != parts.len() {
        bail!("mismatch array length: {} paths, {} parts", paths.len(), parts.len());
    }
    let sum: u64 = parts.iter().sum();
    if sum == 0 {
        bail!("route parts sum to zero");
    }

    let mut encoding = U256::ZERO;
    let mut routes = Vec::new();
    let mut offset = 0usize;
    for (path, &part) in paths.iter().zip(parts) {
        if part == 0 {
            continue;
        }
        if offset == MAX_PATHS {
            bail!("more than {} weighted paths", MAX_PATHS);
        }
        let ratio = U256::from(part) * U256::from(RATIO_SCALE) / U256::from(sum);
        let length = U256::from(path.len());
        encoding |= ((length << 20) | ratio) << (32 * offset);
        routes.extend_from_slice(path);
        offset += 1;
    }

    Ok(SwapRoute { encoding, routes })
}

/// Parse a `0x`-prefixed or bare hex pool hint.
pub fn parse_hop(hop: &str) -> Result<U256> {
    let digits = hop.trim().trim_start_matches("0x");
    U256::from_str_radix(digits, 16).with_context(|| format!("invalid route hop {hop:?}"))
}

/// Per-pool swap routes used on the flash-loan path.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<Address, SwapRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pool: Address, route: SwapRoute) {
        self.routes.insert(pool, route);
    }

    pub fn get(&self, pool: Address) -> Option<&SwapRoute> {
        self.routes.get(&pool)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
