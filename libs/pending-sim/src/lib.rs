//! Predicts resulting pool reserves for a pending swap intent by replaying
//! it against a forked snapshot.

pub mod calldata;
pub mod logs;

use async_trait::async_trait;
use logs::{parse_swap_logs, ParsedSwap, RawLog};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use types::{CancellableTimeout, PendingSwapIntent, PoolIndex};

const DEFAULT_MAX_SNAPSHOT_POOL_SIZE: usize = 8;
const DEFAULT_MAX_POOLS_PER_CALL: usize = 16;
const DEFAULT_MAX_BATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SimError {
    #[error("executor unavailable: {0}")]
    ExecutorUnavailable(String),
    #[error("snapshot operation failed: {0}")]
    Snapshot(String),
    #[error("calldata encoding failed: {0}")]
    Calldata(String),
}

#[derive(Debug, Clone)]
pub struct ExecutionReceipt {
    pub status: bool,
    pub revert_reason: Option<String>,
    pub logs: Vec<RawLog>,
}

/// Executes one impersonated, mined call against the current fork state.
/// Real implementations impersonate the sender, fund it, send the raw call,
/// mine one block, and read back the receipt.
#[async_trait]
pub trait SimulationExecutor: Send + Sync {
    async fn create_snapshot(&self) -> Result<String, SimError>;
    async fn revert_to_snapshot(&self, id: &str) -> Result<bool, SimError>;
    async fn impersonate_and_send(
        &self,
        sender: &str,
        to: &str,
        calldata: &[u8],
        gas_limit: u64,
    ) -> Result<ExecutionReceipt, SimError>;
    async fn get_pool_reserves(&self, pool: &str) -> Result<(u128, u128), SimError>;
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub success: bool,
    pub execution_price: Option<Decimal>,
    pub amount_out: Option<Decimal>,
    pub reserves: HashMap<String, (u128, u128)>,
    pub revert_reason: Option<String>,
    pub error: Option<String>,
    pub latency_ms: f64,
}

impl SimulationResult {
    fn failure(error: impl Into<String>, revert_reason: Option<String>, latency_ms: f64) -> Self {
        Self {
            success: false,
            execution_price: None,
            amount_out: None,
            reserves: HashMap::new(),
            revert_reason,
            error: Some(error.into()),
            latency_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub per_intent_timeout: Duration,
    pub max_batch_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { per_intent_timeout: Duration::from_secs(2), max_batch_timeout: DEFAULT_MAX_BATCH_TIMEOUT }
    }
}

struct SnapshotPool {
    ids: VecDeque<String>,
    max_size: usize,
}

/// Owns the bounded snapshot pool, the calldata/log pipeline, and the O(1)
/// token-pair -> pool index built once at construction.
pub struct PendingStateSimulator {
    executor: Arc<dyn SimulationExecutor>,
    pool_index: Arc<PoolIndex>,
    snapshot_pool: AsyncMutex<SnapshotPool>,
    max_pools_per_call: usize,
}

impl PendingStateSimulator {
    pub fn new(executor: Arc<dyn SimulationExecutor>, pool_index: Arc<PoolIndex>) -> Self {
        Self {
            executor,
            pool_index,
            snapshot_pool: AsyncMutex::new(SnapshotPool { ids: VecDeque::new(), max_size: DEFAULT_MAX_SNAPSHOT_POOL_SIZE }),
            max_pools_per_call: DEFAULT_MAX_POOLS_PER_CALL,
        }
    }

    /// O(1): every touched pair is a direct index lookup, results accumulate
    /// in a set so duplicate pairs across hops never double-count a pool.
    pub fn detect_affected_pools(&self, intent: &PendingSwapIntent) -> Vec<String> {
        let mut seen = HashSet::new();
        for (a, b) in intent.touched_pairs() {
            for pool in self.pool_index.pools_for_pair_iter(&a, &b) {
                seen.insert(pool.clone());
            }
        }
        seen.into_iter().collect()
    }

    async fn borrow_snapshot(&self) -> Result<String, SimError> {
        let mut pool = self.snapshot_pool.lock().await;
        if let Some(id) = pool.ids.pop_front() {
            return Ok(id);
        }
        drop(pool);
        self.executor.create_snapshot().await
    }

    /// Reverting consumes `id`; refill the pool with a fresh snapshot so the
    /// next caller doesn't pay creation latency, unless the pool is already full.
    async fn release_snapshot(&self, id: &str) {
        match self.executor.revert_to_snapshot(id).await {
            Ok(true) => {}
            Ok(false) => warn!(snapshot = id, "snapshot revert reported no-op, state may be corrupt"),
            Err(e) => {
                warn!(snapshot = id, error = %e, "snapshot revert failed, not returning to pool");
                return;
            }
        }

        let should_refill = {
            let pool = self.snapshot_pool.lock().await;
            pool.ids.len() < pool.max_size
        };
        if should_refill {
            match self.executor.create_snapshot().await {
                Ok(fresh) => self.snapshot_pool.lock().await.ids.push_back(fresh),
                Err(e) => warn!(error = %e, "failed to refill snapshot pool"),
            }
        }
    }

    async fn query_reserves(&self, pools: &[String]) -> HashMap<String, (u128, u128)> {
        let capped = &pools[..pools.len().min(self.max_pools_per_call)];
        let calls = capped.iter().map(|pool| {
            let pool = pool.clone();
            async move {
                let result = self.executor.get_pool_reserves(&pool).await;
                (pool, result)
            }
        });
        let results = futures::future::join_all(calls).await;
        results.into_iter().filter_map(|(pool, r)| r.ok().map(|reserves| (pool, reserves))).collect()
    }

    fn pick_primary_swap(parsed: &[ParsedSwap]) -> Option<&ParsedSwap> {
        parsed.first()
    }

    /// Runs the full seven-step pipeline for a single intent under a
    /// cancellable timeout, cancelling the timer on every exit path.
    pub async fn simulate(&self, intent: &PendingSwapIntent, timeout: Duration) -> SimulationResult {
        let (result, handle) = CancellableTimeout::race(timeout, self.simulate_inner(intent)).await;
        handle.cancel();
        result.unwrap_or_else(|| SimulationResult::failure("simulation timed out", None, timeout.as_secs_f64() * 1000.0))
    }

    async fn simulate_inner(&self, intent: &PendingSwapIntent) -> SimulationResult {
        let start = Instant::now();
        let snapshot_id = match self.borrow_snapshot().await {
            Ok(id) => id,
            Err(e) => return SimulationResult::failure(e.to_string(), None, start.elapsed().as_secs_f64() * 1000.0),
        };

        let calldata = match calldata::encode_for_intent(intent) {
            Ok(data) => data,
            Err(e) => {
                self.release_snapshot(&snapshot_id).await;
                return SimulationResult::failure(e.to_string(), None, start.elapsed().as_secs_f64() * 1000.0);
            }
        };

        let receipt = self.executor.impersonate_and_send(&intent.sender, &intent.router, &calldata, intent.gas_limit).await;
        let receipt = match receipt {
            Ok(r) => r,
            Err(e) => {
                self.release_snapshot(&snapshot_id).await;
                return SimulationResult::failure(e.to_string(), None, start.elapsed().as_secs_f64() * 1000.0);
            }
        };

        if !receipt.status {
            self.release_snapshot(&snapshot_id).await;
            return SimulationResult::failure(
                "execution reverted",
                receipt.revert_reason,
                start.elapsed().as_secs_f64() * 1000.0,
            );
        }

        let parsed = parse_swap_logs(&receipt.logs);
        let primary = Self::pick_primary_swap(&parsed);
        let (execution_price, amount_out) = match primary {
            Some(swap) => (swap.execution_price(), Some(swap.amount_out)),
            None => (None, None),
        };

        let affected_pools = self.detect_affected_pools(intent);
        let reserves = self.query_reserves(&affected_pools).await;

        self.release_snapshot(&snapshot_id).await;

        SimulationResult {
            success: true,
            execution_price,
            amount_out,
            reserves,
            revert_reason: None,
            error: None,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Runs every intent sequentially under one enclosing snapshot so later
    /// intents observe the effects of earlier ones; stale opportunities have
    /// no value, so the whole batch is capped at `max_batch_timeout`.
    pub async fn simulate_batch(&self, intents: &[PendingSwapIntent], opts: BatchOptions) -> Vec<SimulationResult> {
        let total_timeout = std::cmp::min(opts.per_intent_timeout * intents.len() as u32, opts.max_batch_timeout);
        let (results, handle) = CancellableTimeout::race(total_timeout, self.run_batch(intents)).await;
        handle.cancel();
        results.unwrap_or_else(|| {
            intents
                .iter()
                .map(|_| SimulationResult::failure("batch timed out", None, total_timeout.as_secs_f64() * 1000.0))
                .collect()
        })
    }

    async fn run_batch(&self, intents: &[PendingSwapIntent]) -> Vec<SimulationResult> {
        let snapshot_id = match self.borrow_snapshot().await {
            Ok(id) => id,
            Err(e) => {
                return intents.iter().map(|_| SimulationResult::failure(e.to_string(), None, 0.0)).collect();
            }
        };

        let mut results = Vec::with_capacity(intents.len());
        for intent in intents {
            let start = Instant::now();
            let calldata = match calldata::encode_for_intent(intent) {
                Ok(data) => data,
                Err(e) => {
                    results.push(SimulationResult::failure(e.to_string(), None, start.elapsed().as_secs_f64() * 1000.0));
                    continue;
                }
            };
            let receipt = self.executor.impersonate_and_send(&intent.sender, &intent.router, &calldata, intent.gas_limit).await;
            match receipt {
                Ok(r) if r.status => {
                    let parsed = parse_swap_logs(&r.logs);
                    let primary = Self::pick_primary_swap(&parsed);
                    let (execution_price, amount_out) = match primary {
                        Some(swap) => (swap.execution_price(), Some(swap.amount_out)),
                        None => (None, None),
                    };
                    let reserves = self.query_reserves(&self.detect_affected_pools(intent)).await;
                    results.push(SimulationResult {
                        success: true,
                        execution_price,
                        amount_out,
                        reserves,
                        revert_reason: None,
                        error: None,
                        latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                    });
                }
                Ok(r) => {
                    results.push(SimulationResult::failure(
                        "execution reverted",
                        r.revert_reason,
                        start.elapsed().as_secs_f64() * 1000.0,
                    ));
                }
                Err(e) => {
                    results.push(SimulationResult::failure(e.to_string(), None, start.elapsed().as_secs_f64() * 1000.0));
                }
            }
        }

        self.release_snapshot(&snapshot_id).await;
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as TMutex;
    use types::{DexKind, Pool};

    fn pool_index() -> Arc<PoolIndex> {
        let mut idx = PoolIndex::new();
        idx.insert(Pool {
            address: "0xpool1".into(),
            dex: "uniswap_v2".into(),
            token0: "0xaaa".into(),
            token1: "0xbbb".into(),
            fee_bps: 30,
            reserve0: Decimal::ZERO,
            reserve1: Decimal::ZERO,
            block_number: 1,
            last_update_ms: 0,
        });
        Arc::new(idx)
    }

    fn intent() -> PendingSwapIntent {
        PendingSwapIntent {
            tx_hash: "0xdead".into(),
            router: "0x1111111111111111111111111111111111111111".into(),
            dex_kind: DexKind::UniswapV2,
            token_in: "0xaaa".into(),
            token_out: "0xbbb".into(),
            amount_in: Decimal::from(1_000),
            expected_amount_out: Decimal::from(900),
            path: vec![],
            slippage_tolerance_bps: 50,
            deadline: 9_999_999_999,
            sender: "0x4444444444444444444444444444444444444444".into(),
            gas_limit: 300_000,
            gas_price_wei: 30_000_000_000,
            nonce: 0,
            chain_id: 1,
            fee_bps: Some(30),
            is_native_input: Some(false),
        }
    }

    struct FakeExecutor {
        snapshot_counter: AtomicUsize,
        reverted: TMutex<Vec<String>>,
        should_revert_tx: bool,
    }

    impl Default for FakeExecutor {
        fn default() -> Self {
            Self { snapshot_counter: AtomicUsize::new(0), reverted: TMutex::new(vec![]), should_revert_tx: false }
        }
    }

    #[async_trait]
    impl SimulationExecutor for FakeExecutor {
        async fn create_snapshot(&self) -> Result<String, SimError> {
            let id = self.snapshot_counter.fetch_add(1, Ordering::SeqCst).to_string();
            Ok(id)
        }

        async fn revert_to_snapshot(&self, id: &str) -> Result<bool, SimError> {
            self.reverted.lock().await.push(id.to_string());
            Ok(true)
        }

        async fn impersonate_and_send(
            &self,
            _sender: &str,
            _to: &str,
            _calldata: &[u8],
            _gas_limit: u64,
        ) -> Result<ExecutionReceipt, SimError> {
            if self.should_revert_tx {
                return Ok(ExecutionReceipt {
                    status: false,
                    revert_reason: Some("execution reverted: INSUFFICIENT_OUTPUT_AMOUNT".to_string()),
                    logs: vec![],
                });
            }
            let mut data = vec![0u8; 128];
            data[16..32].copy_from_slice(&1_000u128.to_be_bytes());
            data[112..128].copy_from_slice(&900u128.to_be_bytes());
            Ok(ExecutionReceipt {
                status: true,
                revert_reason: None,
                logs: vec![RawLog { address: "0xpool1".into(), topics: vec![logs::V2_SWAP_TOPIC.to_string()], data }],
            })
        }

        async fn get_pool_reserves(&self, _pool: &str) -> Result<(u128, u128), SimError> {
            Ok((10_000, 20_000))
        }
    }

    #[tokio::test]
    async fn successful_simulation_reports_execution_price_and_reserves() {
        let executor = Arc::new(FakeExecutor::default());
        let sim = PendingStateSimulator::new(executor, pool_index());
        let result = sim.simulate(&intent(), Duration::from_secs(1)).await;
        assert!(result.success);
        assert_eq!(result.amount_out, Some(Decimal::from(900)));
        assert!(result.reserves.contains_key("0xpool1"));
    }

    #[tokio::test]
    async fn reverted_transaction_surfaces_structured_reason() {
        let executor = Arc::new(FakeExecutor { should_revert_tx: true, ..FakeExecutor::default() });
        let sim = PendingStateSimulator::new(executor, pool_index());
        let result = sim.simulate(&intent(), Duration::from_secs(1)).await;
        assert!(!result.success);
        assert_eq!(result.revert_reason.as_deref(), Some("execution reverted: INSUFFICIENT_OUTPUT_AMOUNT"));
    }

    #[tokio::test]
    async fn snapshot_is_reverted_and_pool_refilled() {
        let executor = Arc::new(FakeExecutor::default());
        let sim = PendingStateSimulator::new(executor.clone(), pool_index());
        sim.simulate(&intent(), Duration::from_secs(1)).await;
        assert_eq!(executor.reverted.lock().await.len(), 1);
        assert_eq!(sim.snapshot_pool.lock().await.ids.len(), 1);
    }

    #[tokio::test]
    async fn detect_affected_pools_is_order_independent() {
        let executor = Arc::new(FakeExecutor::default());
        let sim = PendingStateSimulator::new(executor, pool_index());
        let pools = sim.detect_affected_pools(&intent());
        assert_eq!(pools, vec!["0xpool1".to_string()]);
    }

    #[tokio::test]
    async fn batch_runs_sequentially_under_one_snapshot() {
        let executor = Arc::new(FakeExecutor::default());
        let sim = PendingStateSimulator::new(executor.clone(), pool_index());
        let intents = vec![intent(), intent()];
        let results = sim.simulate_batch(&intents, BatchOptions::default()).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        // One enclosing snapshot for the whole batch, not one per intent.
        assert_eq!(executor.reverted.lock().await.len(), 1);
    }
}
