//! Lifecycle of a local fork process: spawn, snapshot, revert, reserve reads.

use async_trait::async_trait;
use parking_lot::RwLock as PlRwLock;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};
use types::RollingAverage;

mod process;
pub use process::{HttpRpcClientFactory, ProcessForkLauncher};

const READINESS_SENTINEL: &str = "Listening on";

#[derive(Debug, Error)]
pub enum ForkError {
    #[error("fork process failed to spawn: {0}")]
    SpawnFailed(String),
    #[error("fork did not become ready within the deadline")]
    ReadinessTimeout,
    #[error("fork process exited with status {0}")]
    NonZeroExit(i32),
    #[error("no fork is running")]
    NotRunning,
    #[error("fork rpc error: {0}")]
    Rpc(String),
    #[error("fork did not shut down within the deadline")]
    ShutdownTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkState {
    Stopped,
    Starting,
    Running,
    Error,
}

#[derive(Debug, Clone)]
pub struct ForkConfig {
    pub fork_url: String,
    pub port: u16,
    pub account_count: u32,
    pub fork_block_number: Option<u64>,
    pub memory_limit_bytes: Option<u64>,
}

impl ForkConfig {
    /// Renders the documented CLI invocation for the fork binary.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--fork-url".to_string(),
            self.fork_url.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--accounts".to_string(),
            self.account_count.to_string(),
            "--no-mining".to_string(),
            "--silent".to_string(),
        ];
        if let Some(block) = self.fork_block_number {
            args.push("--fork-block-number".to_string());
            args.push(block.to_string());
        }
        if let Some(limit) = self.memory_limit_bytes {
            args.push("--memory-limit".to_string());
            args.push(limit.to_string());
        }
        args
    }
}

/// A spawned fork process, abstracted so tests can substitute a fake without
/// a real binary. `read_until_sentinel` scans stdout for the readiness line;
/// `try_exit_code` is a non-blocking poll for an already-dead process.
#[async_trait]
pub trait ForkProcess: Send + Sync {
    async fn read_until_sentinel(&mut self, sentinel: &str, timeout: Duration) -> Result<(), ForkError>;
    async fn try_exit_code(&mut self) -> Option<i32>;
    async fn terminate(&mut self) -> Result<(), ForkError>;
    async fn kill(&mut self) -> Result<(), ForkError>;
}

/// Spawns the fork binary. The production implementation shells out via
/// `tokio::process::Command`; tests inject a fake that never touches a process.
#[async_trait]
pub trait ForkLauncher: Send + Sync {
    async fn spawn(&self, config: &ForkConfig) -> Result<Box<dyn ForkProcess>, ForkError>;
}

/// Local JSON-RPC surface against the fork node.
#[async_trait]
pub trait ForkRpcClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ForkError>;
    async fn block_number(&self) -> Result<u64, ForkError>;
    async fn reset_to_block(&self, block: u64) -> Result<(), ForkError>;
    async fn apply_pending_tx(&self, raw_tx: &str) -> Result<(), ForkError>;
    async fn get_pool_reserves(&self, pool_address: &str) -> Result<(u128, u128), ForkError>;
    async fn create_snapshot(&self) -> Result<String, ForkError>;
    /// Consumes `id`: the snapshot cannot be reverted to twice.
    async fn revert_to_snapshot(&self, id: &str) -> Result<bool, ForkError>;
}

#[async_trait]
pub trait RpcClientFactory: Send + Sync {
    async fn connect(&self, port: u16) -> Result<Arc<dyn ForkRpcClient>, ForkError>;
}

#[derive(Debug, Clone, Default)]
pub struct ForkMetrics {
    pub total_operations: u64,
    pub successes: u64,
    pub failures: u64,
    pub snapshots_created: u64,
    pub snapshots_reverted: u64,
}

struct ForkMetricsInner {
    counters: ForkMetrics,
    latency: RollingAverage,
}

/// Extracts a structured revert reason from one of the three documented
/// patterns: `execution reverted[:...]`, `revert ...`, or `reason: ...`.
pub fn extract_revert_reason(message: &str) -> Option<String> {
    let patterns = [
        r"execution reverted:?\s*(.*)",
        r"revert\s+(.*)",
        r"reason:\s*(.*)",
    ];
    for pattern in patterns {
        let re = Regex::new(pattern).expect("static revert-reason pattern is valid");
        if let Some(caps) = re.captures(message) {
            let reason = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if !reason.is_empty() {
                return Some(reason.to_string());
            }
            return Some("execution reverted".to_string());
        }
    }
    None
}

struct RunningFork {
    process: Box<dyn ForkProcess>,
    rpc: Arc<dyn ForkRpcClient>,
    chain_id: u64,
    current_block: u64,
}

/// Owns the lifecycle of a single local fork: scoped acquisition with
/// guaranteed release on every exit path, race-free concurrent starts, and
/// the snapshot/revert/reserve operations that run against it.
pub struct ForkManager {
    config: ForkConfig,
    launcher: Arc<dyn ForkLauncher>,
    rpc_factory: Arc<dyn RpcClientFactory>,
    state: PlRwLock<ForkState>,
    running: PlRwLock<Option<RunningFork>>,
    start_cell: PlRwLock<Arc<OnceCell<()>>>,
    metrics: PlRwLock<ForkMetricsInner>,
}

impl ForkManager {
    pub fn new(config: ForkConfig, launcher: Arc<dyn ForkLauncher>, rpc_factory: Arc<dyn RpcClientFactory>) -> Self {
        Self {
            config,
            launcher,
            rpc_factory,
            state: PlRwLock::new(ForkState::Stopped),
            running: PlRwLock::new(None),
            start_cell: PlRwLock::new(Arc::new(OnceCell::new())),
            metrics: PlRwLock::new(ForkMetricsInner {
                counters: ForkMetrics::default(),
                latency: RollingAverage::new(256),
            }),
        }
    }

    pub fn state(&self) -> ForkState {
        *self.state.read()
    }

    pub fn metrics(&self) -> ForkMetrics {
        self.metrics.read().counters.clone()
    }

    pub fn average_latency_ms(&self) -> Option<f64> {
        self.metrics.read().latency.mean()
    }

    /// Start the fork, sharing one in-flight attempt across concurrent callers.
    pub async fn start_fork(&self, timeout: Duration) -> Result<(), ForkError> {
        if matches!(self.state(), ForkState::Running) {
            return Ok(());
        }
        let cell = self.start_cell.read().clone();
        let result = cell.get_or_try_init(|| self.do_start(timeout)).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failed attempt leaves the OnceCell uninitialised, so a
                // later start_fork() retries cleanly with no manual reset.
                Err(e)
            }
        }
    }

    async fn do_start(&self, timeout: Duration) -> Result<(), ForkError> {
        *self.state.write() = ForkState::Starting;
        let mut process = self.launcher.spawn(&self.config).await.map_err(|e| {
            *self.state.write() = ForkState::Error;
            e
        })?;

        if let Err(e) = process.read_until_sentinel(READINESS_SENTINEL, timeout).await {
            let _ = process.kill().await;
            *self.state.write() = ForkState::Error;
            return Err(e);
        }
        if let Some(code) = process.try_exit_code().await {
            *self.state.write() = ForkState::Error;
            return Err(ForkError::NonZeroExit(code));
        }

        let rpc = self.rpc_factory.connect(self.config.port).await.map_err(|e| {
            *self.state.write() = ForkState::Error;
            e
        })?;
        let chain_id = rpc.chain_id().await?;
        let current_block = rpc.block_number().await?;

        *self.running.write() = Some(RunningFork { process, rpc, chain_id, current_block });
        *self.state.write() = ForkState::Running;
        info!(chain_id, current_block, "fork started");
        Ok(())
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.running.read().as_ref().map(|f| f.chain_id)
    }

    pub fn current_block(&self) -> Option<u64> {
        self.running.read().as_ref().map(|f| f.current_block)
    }

    fn rpc(&self) -> Result<Arc<dyn ForkRpcClient>, ForkError> {
        self.running.read().as_ref().map(|f| f.rpc.clone()).ok_or(ForkError::NotRunning)
    }

    async fn timed<T, F>(&self, op: F) -> Result<T, ForkError>
    where
        F: std::future::Future<Output = Result<T, ForkError>>,
    {
        let start = std::time::Instant::now();
        let result = op.await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let mut metrics = self.metrics.write();
        metrics.counters.total_operations += 1;
        metrics.latency.push(elapsed_ms);
        match &result {
            Ok(_) => metrics.counters.successes += 1,
            Err(_) => metrics.counters.failures += 1,
        }
        result
    }

    pub async fn reset_to_block(&self, block: u64) -> Result<(), ForkError> {
        let rpc = self.rpc()?;
        let result = self.timed(async { rpc.reset_to_block(block).await }).await;
        if result.is_ok() {
            if let Some(fork) = self.running.write().as_mut() {
                fork.current_block = block;
            }
        }
        result
    }

    pub async fn apply_pending_tx(&self, raw_tx: &str) -> Result<(), ForkError> {
        let rpc = self.rpc()?;
        self.timed(async { rpc.apply_pending_tx(raw_tx).await }).await
    }

    pub async fn get_pool_reserves(&self, pool_address: &str) -> Result<(u128, u128), ForkError> {
        let rpc = self.rpc()?;
        self.timed(async { rpc.get_pool_reserves(pool_address).await }).await
    }

    pub async fn create_snapshot(&self) -> Result<String, ForkError> {
        let rpc = self.rpc()?;
        let result = self.timed(async { rpc.create_snapshot().await }).await;
        if result.is_ok() {
            self.metrics.write().counters.snapshots_created += 1;
        }
        result
    }

    /// Reverting consumes `id`; the caller must request a fresh snapshot to
    /// keep a pool of them refilled.
    pub async fn revert_to_snapshot(&self, id: &str) -> Result<bool, ForkError> {
        let rpc = self.rpc()?;
        let result = self.timed(async { rpc.revert_to_snapshot(id).await }).await;
        if matches!(result, Ok(true)) {
            self.metrics.write().counters.snapshots_reverted += 1;
        }
        result
    }

    /// Graceful terminate, force-kill after `timeout`; idempotent and clears
    /// the running provider so a later `start_fork` mints a fresh in-flight cell.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ForkError> {
        let mut running = self.running.write().take();
        let process = match running.as_mut() {
            Some(fork) => &mut fork.process,
            None => {
                *self.state.write() = ForkState::Stopped;
                *self.start_cell.write() = Arc::new(OnceCell::new());
                return Ok(());
            }
        };

        let outcome = tokio::time::timeout(timeout, process.terminate()).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "graceful fork shutdown failed, force killing"),
            Err(_) => warn!("fork shutdown timed out, force killing"),
        }
        if let Err(e) = process.kill().await {
            error!(error = %e, "force-kill of fork process failed");
        }

        *self.state.write() = ForkState::Stopped;
        *self.start_cell.write() = Arc::new(OnceCell::new());
        Ok(())
    }
}
