//! Pair / Pool record and the canonical token-pair index.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    /// Lowercase hex pool address; the unique key for `address -> Pool`.
    pub address: String,
    pub dex: String,
    pub token0: String,
    pub token1: String,
    pub fee_bps: u32,
    pub reserve0: Decimal,
    pub reserve1: Decimal,
    pub block_number: u64,
    pub last_update_ms: u64,
}

/// Canonicalises a token pair as `min(t0,t1):max(t0,t1)` in lowercase, so
/// `(WETH, USDC)` and `(USDC, WETH)` index to the same bucket.
pub fn canonical_pair_key(token_a: &str, token_b: &str) -> String {
    let a = token_a.to_lowercase();
    let b = token_b.to_lowercase();
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

/// `address -> Pool` plus a read-only, O(1) token-pair -> pool-set index,
/// built once and never scanned linearly on the hot path.
#[derive(Debug, Default)]
pub struct PoolIndex {
    by_address: HashMap<String, Pool>,
    by_pair: HashMap<String, HashSet<String>>,
    by_dex_pair: HashMap<(String, String, String), String>,
}

impl PoolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a pool. Re-canonicalises both indices so address
    /// lookups and pair lookups never diverge.
    pub fn insert(&mut self, pool: Pool) {
        let addr = pool.address.to_lowercase();
        let pair_key = canonical_pair_key(&pool.token0, &pool.token1);
        self.by_pair.entry(pair_key).or_default().insert(addr.clone());
        self.by_dex_pair.insert(
            (pool.dex.clone(), pool.token0.to_lowercase(), pool.token1.to_lowercase()),
            addr.clone(),
        );
        self.by_address.insert(addr, pool);
    }

    pub fn get_by_address(&self, address: &str) -> Option<&Pool> {
        self.by_address.get(&address.to_lowercase())
    }

    /// O(1) lookup of every pool address sharing a token pair.
    pub fn pools_for_pair_iter(&self, token_a: &str, token_b: &str) -> impl Iterator<Item = &String> {
        self.by_pair
            .get(&canonical_pair_key(token_a, token_b))
            .into_iter()
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
