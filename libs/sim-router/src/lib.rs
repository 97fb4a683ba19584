//! Multi-provider simulation facade: health-ranked ordering, fallback unless
//! a revert is definitive, a fingerprinted cache, and request coalescing.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub chain: String,
    pub from: String,
    pub to: String,
    pub data: Vec<u8>,
    pub value: u128,
    pub gas_limit: u64,
    pub block_tag: Option<String>,
    pub state_overrides_hash: Option<String>,
}

impl SimulationRequest {
    /// `(chain, from, to, data, value, gasLimit, blockTag?, stateOverridesHash)`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Keccak256::new();
        hasher.update(self.chain.as_bytes());
        hasher.update(self.from.as_bytes());
        hasher.update(self.to.as_bytes());
        hasher.update(&self.data);
        hasher.update(self.value.to_be_bytes());
        hasher.update(self.gas_limit.to_be_bytes());
        hasher.update(self.block_tag.as_deref().unwrap_or("").as_bytes());
        hasher.update(self.state_overrides_hash.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub would_revert: bool,
    pub revert_reason: Option<String>,
    pub gas_used: Option<u64>,
    pub return_data: Option<Vec<u8>>,
}

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("provider timed out")]
    Timeout,
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("no enabled providers")]
    NoProviders,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderHealthScore {
    pub healthy: bool,
    pub success_rate: f64,
    pub normalized_latency: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderMetrics {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
}

#[async_trait]
pub trait SimulationProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn simulate(&self, request: &SimulationRequest) -> Result<SimulationOutcome, ProviderError>;
    fn get_health(&self) -> ProviderHealthScore;
    fn get_metrics(&self) -> ProviderMetrics;
    async fn health_check(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub latency_weight: f64,
    pub provider_timeout: Duration,
    pub use_fallback: bool,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub min_profit_for_simulation: Decimal,
    pub bypass_for_time_critical: bool,
    pub time_critical_threshold_ms: u64,
    pub provider_priority: HashMap<String, u32>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            latency_weight: 0.5,
            provider_timeout: Duration::from_secs(5),
            use_fallback: true,
            cache_ttl: Duration::from_secs(30),
            cache_capacity: 1_000,
            min_profit_for_simulation: Decimal::ZERO,
            bypass_for_time_critical: false,
            time_critical_threshold_ms: 2_000,
            provider_priority: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouterMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fallback_used: u64,
    pub timeouts: u64,
}

struct CacheEntry {
    outcome: SimulationOutcome,
    inserted_at: Instant,
}

type PendingCell = Arc<OnceCell<SimulationOutcome>>;

pub struct SimulationRouter {
    providers: Vec<Arc<dyn SimulationProvider>>,
    config: RouterConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
    pending: Mutex<HashMap<String, PendingCell>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fallback_used: AtomicU64,
    timeouts: AtomicU64,
}

impl SimulationRouter {
    pub fn new(providers: Vec<Arc<dyn SimulationProvider>>, config: RouterConfig) -> Self {
        Self {
            providers,
            config,
            cache: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            fallback_used: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> RouterMetrics {
        RouterMetrics {
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            cache_misses: self.cache_misses.load(Ordering::SeqCst),
            fallback_used: self.fallback_used.load(Ordering::SeqCst),
            timeouts: self.timeouts.load(Ordering::SeqCst),
        }
    }

    /// `false` when there's no provider, the expected profit can't justify
    /// the round trip, or the opportunity is already stale and time-critical
    /// bypass is enabled.
    pub fn should_simulate(&self, est_profit_usd: Decimal, age_ms: u64) -> bool {
        if self.providers.is_empty() {
            return false;
        }
        if est_profit_usd < self.config.min_profit_for_simulation {
            return false;
        }
        if self.config.bypass_for_time_critical && age_ms > self.config.time_critical_threshold_ms {
            return false;
        }
        true
    }

    fn ranked_providers(&self) -> Vec<Arc<dyn SimulationProvider>> {
        let mut scored: Vec<(f64, u32, Arc<dyn SimulationProvider>)> = self
            .providers
            .iter()
            .map(|p| {
                let health = p.get_health();
                let score = if health.healthy {
                    health.success_rate - self.config.latency_weight * health.normalized_latency
                } else {
                    f64::NEG_INFINITY
                };
                let priority = self.config.provider_priority.get(p.name()).copied().unwrap_or(u32::MAX);
                (score, priority, p.clone())
            })
            .collect();
        // Higher score first; ties broken by lower (more preferred) priority.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, _, p)| p).collect()
    }

    pub async fn simulate(&self, request: SimulationRequest) -> Result<SimulationOutcome, ProviderError> {
        let fingerprint = request.fingerprint();

        if let Some(outcome) = self.cached(&fingerprint) {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            return Ok(outcome);
        }
        self.cache_misses.fetch_add(1, Ordering::SeqCst);

        let cell = {
            let mut pending = self.pending.lock();
            pending.entry(fingerprint.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        let result = cell.get_or_try_init(|| self.route(&request)).await.cloned();
        self.pending.lock().remove(&fingerprint);

        if let Ok(outcome) = &result {
            if !outcome.would_revert {
                self.insert_cache(fingerprint, outcome.clone());
            }
        }
        result
    }

    async fn route(&self, request: &SimulationRequest) -> Result<SimulationOutcome, ProviderError> {
        let ordered = self.ranked_providers();
        if ordered.is_empty() {
            return Err(ProviderError::NoProviders);
        }

        let mut last_error = ProviderError::NoProviders;
        for (i, provider) in ordered.iter().enumerate() {
            if i > 0 {
                self.fallback_used.fetch_add(1, Ordering::SeqCst);
            }
            let call = provider.simulate(request);
            match tokio::time::timeout(self.config.provider_timeout, call).await {
                Ok(Ok(outcome)) => {
                    // A definitive revert is never retried on another provider.
                    return Ok(outcome);
                }
                Ok(Err(e)) => {
                    last_error = e;
                    if !self.config.use_fallback {
                        return Err(last_error);
                    }
                }
                Err(_) => {
                    self.timeouts.fetch_add(1, Ordering::SeqCst);
                    last_error = ProviderError::Timeout;
                    if !self.config.use_fallback {
                        return Err(last_error);
                    }
                }
            }
        }
        Err(last_error)
    }

    fn cached(&self, fingerprint: &str) -> Option<SimulationOutcome> {
        let cache = self.cache.lock();
        let entry = cache.get(fingerprint)?;
        if entry.inserted_at.elapsed() > self.config.cache_ttl {
            return None;
        }
        Some(entry.outcome.clone())
    }

    fn insert_cache(&self, fingerprint: String, outcome: SimulationOutcome) {
        let mut cache = self.cache.lock();
        if cache.len() >= (self.config.cache_capacity * 8) / 10 {
            if let Some(oldest_key) = cache.iter().min_by_key(|(_, v)| v.inserted_at).map(|(k, _)| k.clone()) {
                cache.remove(&oldest_key);
            }
        }
        cache.insert(fingerprint, CacheEntry { outcome, inserted_at: Instant::now() });
        if let Some(e) = warn_if_over_capacity(&cache, self.config.cache_capacity) {
            warn!(size = e, capacity = self.config.cache_capacity, "simulation cache near capacity after eviction");
        }
    }
}

fn warn_if_over_capacity(cache: &HashMap<String, CacheEntry>, capacity: usize) -> Option<usize> {
    if cache.len() >= capacity {
        Some(cache.len())
    } else {
        None
    }
}
