//! Wraps an on-chain multi-path quoter contract when configured, otherwise
//! falls back to sequential per-router `getAmountsOut` calls.

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use types::RollingAverage;

#[derive(Debug, Error)]
pub enum QuoterError {
    #[error("quoter contract call failed: {0}")]
    ContractCall(String),
    #[error("router getAmountsOut failed: {0}")]
    RouterCall(String),
}

/// The on-chain multi-path quoter contract, when one is configured for the chain.
#[async_trait]
pub trait MultiPathQuoterContract: Send + Sync {
    async fn get_batched_quotes(&self, paths: &[Vec<String>], amounts_in: &[Decimal]) -> Result<Vec<Decimal>, QuoterError>;
}

/// A single DEX router's `getAmountsOut(amountIn, path)`.
#[async_trait]
pub trait RouterQuoter: Send + Sync {
    async fn get_amounts_out(&self, router: &str, amount_in: Decimal, path: &[String]) -> Result<Decimal, QuoterError>;
}

#[derive(Debug, Clone, Default)]
pub struct QuoterMetrics {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub fallback_used: u64,
}

struct MetricsInner {
    counters: QuoterMetrics,
    latency: RollingAverage,
}

#[derive(Debug, Clone)]
pub struct ArbitrageSimulation {
    pub success: bool,
    pub final_amount_out: Decimal,
    pub owed: Decimal,
    pub profit: Decimal,
}

/// Wraps a multi-path quoter contract (when configured) with a sequential,
/// per-router fallback path that tolerates individual hop failures.
pub struct BatchQuoter {
    multi_path_contract: Option<Arc<dyn MultiPathQuoterContract>>,
    router_quoter: Arc<dyn RouterQuoter>,
    fallback_routers: Vec<String>,
    metrics: RwLock<MetricsInner>,
}

impl BatchQuoter {
    pub fn new(
        multi_path_contract: Option<Arc<dyn MultiPathQuoterContract>>,
        router_quoter: Arc<dyn RouterQuoter>,
        fallback_routers: Vec<String>,
    ) -> Self {
        Self {
            multi_path_contract,
            router_quoter,
            fallback_routers,
            metrics: RwLock::new(MetricsInner { counters: QuoterMetrics::default(), latency: RollingAverage::new(256) }),
        }
    }

    pub fn metrics(&self) -> QuoterMetrics {
        self.metrics.read().counters.clone()
    }

    fn record(&self, latency_ms: f64, success: bool, used_fallback: bool) {
        let mut metrics = self.metrics.write();
        metrics.counters.total += 1;
        metrics.latency.push(latency_ms);
        if success {
            metrics.counters.successes += 1;
        } else {
            metrics.counters.failures += 1;
        }
        if used_fallback {
            metrics.counters.fallback_used += 1;
        }
    }

    /// One entry per path; `None` marks a path that could not be quoted by
    /// either the contract or any fallback router.
    pub async fn get_batched_quotes(&self, paths: &[Vec<String>], amounts_in: &[Decimal]) -> Vec<Option<Decimal>> {
        let start = std::time::Instant::now();

        if let Some(contract) = &self.multi_path_contract {
            match contract.get_batched_quotes(paths, amounts_in).await {
                Ok(quotes) => {
                    self.record(start.elapsed().as_secs_f64() * 1000.0, true, false);
                    return quotes.into_iter().map(Some).collect();
                }
                Err(e) => {
                    warn!(error = %e, "multi-path quoter contract failed, falling back to sequential router calls");
                }
            }
        }

        let mut results = Vec::with_capacity(paths.len());
        for (path, amount_in) in paths.iter().zip(amounts_in.iter()) {
            results.push(self.quote_via_routers(path, *amount_in).await);
        }
        let any_success = results.iter().any(Option::is_some);
        self.record(start.elapsed().as_secs_f64() * 1000.0, any_success, true);
        results
    }

    /// Tries each configured router in order; individual router failures are
    /// tolerated and the next router is tried.
    async fn quote_via_routers(&self, path: &[String], amount_in: Decimal) -> Option<Decimal> {
        for router in &self.fallback_routers {
            match self.router_quoter.get_amounts_out(router, amount_in, path).await {
                Ok(amount_out) => return Some(amount_out),
                Err(e) => warn!(router, error = %e, "router quote failed, trying next"),
            }
        }
        None
    }

    /// `owed = amount + amount·feeBps/10_000`; `profit = final - owed`,
    /// clamped to zero when any hop fails.
    pub async fn simulate_arbitrage_path(&self, path: &[String], flash_loan_amount: Decimal, fee_bps: u32) -> ArbitrageSimulation {
        let owed = flash_loan_amount + (flash_loan_amount * Decimal::from(fee_bps)) / Decimal::from(10_000u32);
        let final_amount_out = self.quote_via_routers(path, flash_loan_amount).await;

        match final_amount_out {
            Some(amount_out) => {
                let profit = (amount_out - owed).max(Decimal::ZERO);
                ArbitrageSimulation { success: true, final_amount_out: amount_out, owed, profit }
            }
            None => ArbitrageSimulation { success: false, final_amount_out: Decimal::ZERO, owed, profit: Decimal::ZERO },
        }
    }

    pub async fn compare_arbitrage_paths(
        &self,
        paths: &[Vec<String>],
        amounts: &[Decimal],
        fee_bps: u32,
    ) -> Vec<ArbitrageSimulation> {
        let mut results = Vec::with_capacity(paths.len());
        for (path, amount) in paths.iter().zip(amounts.iter()) {
            results.push(self.simulate_arbitrage_path(path, *amount, fee_bps).await);
        }
        results
    }
}
