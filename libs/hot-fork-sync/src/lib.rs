//! Keeps a local fork at the source chain's head via fixed or adaptive
//! scheduling.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use types::RollingAverage;

const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
const MAX_BACKOFF_MULTIPLIER: u32 = 10;
const BLOCK_ARRIVAL_RING_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fork is not running")]
    ForkNotRunning,
    #[error("source chain head lookup failed: {0}")]
    SourceUnavailable(String),
    #[error("fork reset failed: {0}")]
    ResetFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Stopped,
    Starting,
    Running,
    Paused,
    Error,
}

#[async_trait]
pub trait SourceChain: Send + Sync {
    async fn head_block(&self) -> Result<u64, SyncError>;
}

#[async_trait]
pub trait ForkResetter: Send + Sync {
    fn is_running(&self) -> bool;
    async fn reset_to_block(&self, block: u64) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy)]
pub enum SyncMode {
    Fixed { interval: Duration },
    Adaptive { min: Duration, max: Duration },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub mode: SyncMode,
    pub max_consecutive_failures: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Adaptive { min: Duration::from_millis(200), max: Duration::from_secs(5) },
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncMetrics {
    pub last_synced_block: Option<u64>,
    pub consecutive_failures: u32,
    pub average_sync_latency_ms: Option<f64>,
}

struct SharedState {
    state: SyncState,
    last_synced_block: Option<u64>,
    last_block_arrival: Option<Instant>,
    current_interval: Duration,
    backoff_multiplier: u32,
    last_updated: Option<Instant>,
}

/// Single instance responsible for syncing one fork to one source chain's head.
pub struct HotForkSynchronizer {
    source: Arc<dyn SourceChain>,
    resetter: Arc<dyn ForkResetter>,
    config: SyncConfig,
    shared: RwLock<SharedState>,
    block_arrivals: RwLock<RollingAverage>,
    latency: RwLock<RollingAverage>,
    is_syncing: AtomicBool,
    consecutive_failures: AtomicU32,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl HotForkSynchronizer {
    pub fn new(source: Arc<dyn SourceChain>, resetter: Arc<dyn ForkResetter>, config: SyncConfig) -> Self {
        let initial_interval = match config.mode {
            SyncMode::Fixed { interval } => interval,
            SyncMode::Adaptive { min, .. } => min,
        };
        Self {
            source,
            resetter,
            config,
            shared: RwLock::new(SharedState {
                state: SyncState::Stopped,
                last_synced_block: None,
                last_block_arrival: None,
                current_interval: initial_interval,
                backoff_multiplier: 1,
                last_updated: None,
            }),
            block_arrivals: RwLock::new(RollingAverage::new(BLOCK_ARRIVAL_RING_CAPACITY)),
            latency: RwLock::new(RollingAverage::new(128)),
            is_syncing: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            task: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SyncState {
        self.shared.read().state
    }

    pub fn metrics(&self) -> SyncMetrics {
        let shared = self.shared.read();
        SyncMetrics {
            last_synced_block: shared.last_synced_block,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            average_sync_latency_ms: self.latency.read().mean(),
        }
    }

    pub fn last_updated_elapsed(&self) -> Option<Duration> {
        self.shared.read().last_updated.map(|t| t.elapsed())
    }

    /// Starts the scheduling loop. Fails if the fork is not currently running.
    pub fn start(self: &Arc<Self>) -> Result<(), SyncError> {
        if !self.resetter.is_running() {
            return Err(SyncError::ForkNotRunning);
        }
        {
            let mut shared = self.shared.write();
            shared.state = SyncState::Starting;
            shared.state = SyncState::Running;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let interval = this.shared.read().current_interval;
                tokio::time::sleep(interval).await;
                if this.state() == SyncState::Stopped {
                    break;
                }
                this.tick().await;
            }
        });
        *self.task.write() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.write().state = SyncState::Stopped;
        if let Some(handle) = self.task.write().take() {
            handle.abort();
        }
    }

    /// Idempotent outside `running`.
    pub fn pause(&self) {
        let mut shared = self.shared.write();
        if shared.state == SyncState::Running {
            shared.state = SyncState::Paused;
        }
    }

    /// Idempotent outside `paused`.
    pub fn resume(&self) {
        let mut shared = self.shared.write();
        if shared.state == SyncState::Paused {
            shared.state = SyncState::Running;
        }
    }

    /// Triggers an immediate synchronous sync, independent of the scheduler.
    pub async fn force_sync(&self) {
        self.tick().await;
    }

    async fn tick(&self) {
        if self.state() != SyncState::Running {
            return;
        }
        if self.is_syncing.swap(true, Ordering::SeqCst) {
            return; // a sync is already in flight; single-flight guard.
        }

        let result = self.run_sync().await;
        self.is_syncing.store(false, Ordering::SeqCst);

        match result {
            Ok(Some(latency_ms)) => {
                self.latency.write().push(latency_ms);
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.shared.write().backoff_multiplier = 1;
            }
            Ok(None) => {
                // already at head, nothing to do
            }
            Err(e) => self.handle_failure(e),
        }
    }

    async fn run_sync(&self) -> Result<Option<f64>, SyncError> {
        let start = Instant::now();
        let head = self.source.head_block().await?;
        if self.state() != SyncState::Running {
            return Ok(None); // stop() landed while we were awaiting the source.
        }

        let last = self.shared.read().last_synced_block;
        if last.map_or(true, |l| head > l) {
            self.resetter.reset_to_block(head).await?;
            if self.state() != SyncState::Running {
                return Ok(None); // stop() landed while we were awaiting the reset.
            }

            let now = Instant::now();
            let gap_ms = {
                let mut shared = self.shared.write();
                let gap = shared.last_block_arrival.map(|prev| now.duration_since(prev).as_secs_f64() * 1000.0);
                shared.last_block_arrival = Some(now);
                shared.last_synced_block = Some(head);
                shared.last_updated = Some(now);
                gap
            };
            if let Some(gap_ms) = gap_ms {
                self.block_arrivals.write().push(gap_ms);
                self.recompute_adaptive_interval();
            }
            info!(head, "fork synced to new head");
            Ok(Some(start.elapsed().as_secs_f64() * 1000.0))
        } else {
            Ok(None)
        }
    }

    fn recompute_adaptive_interval(&self) {
        if let SyncMode::Adaptive { min, max } = self.config.mode {
            if let Some(avg_block_time_ms) = self.block_arrivals.read().mean() {
                let target_ms = (avg_block_time_ms * 0.8).clamp(min.as_secs_f64() * 1000.0, max.as_secs_f64() * 1000.0);
                self.shared.write().current_interval = Duration::from_secs_f64(target_ms / 1000.0);
            }
        }
    }

    fn handle_failure(&self, error: SyncError) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(error = %error, consecutive_failures = failures, "fork sync tick failed");

        let base_interval = match self.config.mode {
            SyncMode::Fixed { interval } => interval,
            SyncMode::Adaptive { min, .. } => min,
        };
        let mut shared = self.shared.write();
        shared.backoff_multiplier = (shared.backoff_multiplier * 2).min(MAX_BACKOFF_MULTIPLIER);
        shared.current_interval = base_interval * shared.backoff_multiplier;

        if failures >= self.config.max_consecutive_failures {
            shared.state = SyncState::Paused;
            drop(shared);
            error!(consecutive_failures = failures, "fork sync paused after repeated failures");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    struct FakeSource {
        head: AtomicU64,
        fail: AtomicBool,
    }

    #[async_trait]
    impl SourceChain for FakeSource {
        async fn head_block(&self) -> Result<u64, SyncError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(SyncError::SourceUnavailable("rpc down".to_string()))
            } else {
                Ok(self.head.load(Ordering::SeqCst))
            }
        }
    }

    struct FakeResetter {
        running: AtomicBool,
        reset_calls: Mutex<Vec<u64>>,
        fail: AtomicBool,
    }

    impl Default for FakeResetter {
        fn default() -> Self {
            Self { running: AtomicBool::new(true), reset_calls: Mutex::new(vec![]), fail: AtomicBool::new(false) }
        }
    }

    #[async_trait]
    impl ForkResetter for FakeResetter {
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn reset_to_block(&self, block: u64) -> Result<(), SyncError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::ResetFailed("anvil_reset failed".to_string()));
            }
            self.reset_calls.lock().unwrap().push(block);
            Ok(())
        }
    }

    fn config() -> SyncConfig {
        SyncConfig { mode: SyncMode::Fixed { interval: Duration::from_millis(10) }, max_consecutive_failures: 3 }
    }

    #[tokio::test]
    async fn start_fails_when_fork_not_running() {
        let source = Arc::new(FakeSource { head: AtomicU64::new(100), fail: AtomicBool::new(false) });
        let resetter = Arc::new(FakeResetter { running: AtomicBool::new(false), ..FakeResetter::default() });
        let sync = Arc::new(HotForkSynchronizer::new(source, resetter, config()));
        assert!(matches!(sync.start(), Err(SyncError::ForkNotRunning)));
    }

    #[tokio::test]
    async fn force_sync_resets_to_new_head() {
        let source = Arc::new(FakeSource { head: AtomicU64::new(100), fail: AtomicBool::new(false) });
        let resetter = Arc::new(FakeResetter::default());
        let sync = Arc::new(HotForkSynchronizer::new(source, resetter.clone(), config()));
        sync.start().unwrap();
        sync.force_sync().await;
        assert_eq!(resetter.reset_calls.lock().unwrap().as_slice(), &[100]);
        assert_eq!(sync.metrics().last_synced_block, Some(100));
    }

    #[tokio::test]
    async fn no_op_when_already_at_head() {
        let source = Arc::new(FakeSource { head: AtomicU64::new(100), fail: AtomicBool::new(false) });
        let resetter = Arc::new(FakeResetter::default());
        let sync = Arc::new(HotForkSynchronizer::new(source, resetter.clone(), config()));
        sync.start().unwrap();
        sync.force_sync().await;
        sync.force_sync().await;
        assert_eq!(resetter.reset_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pauses_after_max_consecutive_failures() {
        let source = Arc::new(FakeSource { head: AtomicU64::new(100), fail: AtomicBool::new(true) });
        let resetter = Arc::new(FakeResetter::default());
        let sync = Arc::new(HotForkSynchronizer::new(source, resetter, config()));
        sync.start().unwrap();
        sync.force_sync().await;
        sync.force_sync().await;
        sync.force_sync().await;
        assert_eq!(sync.state(), SyncState::Paused);
        assert_eq!(sync.metrics().consecutive_failures, 3);
    }

    #[tokio::test]
    async fn pause_and_resume_are_idempotent() {
        let source = Arc::new(FakeSource { head: AtomicU64::new(100), fail: AtomicBool::new(false) });
        let resetter = Arc::new(FakeResetter::default());
        let sync = Arc::new(HotForkSynchronizer::new(source, resetter, config()));
        sync.start().unwrap();
        sync.pause();
        sync.pause();
        assert_eq!(sync.state(), SyncState::Paused);
        sync.resume();
        sync.resume();
        assert_eq!(sync.state(), SyncState::Running);
    }

    #[tokio::test]
    async fn single_flight_guard_skips_overlapping_ticks() {
        let source = Arc::new(FakeSource { head: AtomicU64::new(100), fail: AtomicBool::new(false) });
        let resetter = Arc::new(FakeResetter::default());
        let sync = Arc::new(HotForkSynchronizer::new(source, resetter.clone(), config()));
        sync.start().unwrap();
        sync.is_syncing.store(true, Ordering::SeqCst);
        sync.tick().await; // should skip because is_syncing is already true
        assert!(resetter.reset_calls.lock().unwrap().is_empty());
    }
}
