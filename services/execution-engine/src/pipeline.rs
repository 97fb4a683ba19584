//! The bounded-concurrency execution pipeline: queue → CB → lock → risk →
//! simulation gate → strategy → ack.

use crate::circuit_breaker::CircuitBreaker;
use crate::strategy::Strategy;
use bus::OpportunityBus;
use lock_store::{LockOutcome, LockStore};
use parking_lot::Mutex;
use risk::RiskOrchestrator;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use types::{BusMessage, CancellableTimeout, ExecutionResult, Opportunity};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent_executions: usize,
    pub max_cb_reenqueue_attempts: u32,
    pub lock_ttl: Duration,
    pub lock_conflict_threshold: u32,
    pub execution_timeout: Duration,
    pub simulation_mode: bool,
    pub instance_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            max_cb_reenqueue_attempts: 3,
            lock_ttl: Duration::from_secs(30),
            lock_conflict_threshold: 3,
            execution_timeout: Duration::from_secs(55),
            simulation_mode: false,
            instance_id: "execution-engine".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub execution_attempts: AtomicU64,
    pub successful_executions: AtomicU64,
    pub failed_executions: AtomicU64,
    pub queue_rejects: AtomicU64,
    pub lock_conflicts: AtomicU64,
    pub stale_lock_recoveries: AtomicU64,
    pub execution_timeouts: AtomicU64,
    pub circuit_breaker_blocks: AtomicU64,
    pub risk_rejections: AtomicU64,
    pub simulation_rejections: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub execution_attempts: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub queue_rejects: u64,
    pub lock_conflicts: u64,
    pub stale_lock_recoveries: u64,
    pub execution_timeouts: u64,
    pub circuit_breaker_blocks: u64,
    pub risk_rejections: u64,
    pub simulation_rejections: u64,
}

impl PipelineStats {
    fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            execution_attempts: self.execution_attempts.load(Ordering::Relaxed),
            successful_executions: self.successful_executions.load(Ordering::Relaxed),
            failed_executions: self.failed_executions.load(Ordering::Relaxed),
            queue_rejects: self.queue_rejects.load(Ordering::Relaxed),
            lock_conflicts: self.lock_conflicts.load(Ordering::Relaxed),
            stale_lock_recoveries: self.stale_lock_recoveries.load(Ordering::Relaxed),
            execution_timeouts: self.execution_timeouts.load(Ordering::Relaxed),
            circuit_breaker_blocks: self.circuit_breaker_blocks.load(Ordering::Relaxed),
            risk_rejections: self.risk_rejections.load(Ordering::Relaxed),
            simulation_rejections: self.simulation_rejections.load(Ordering::Relaxed),
        }
    }
}

/// `Opportunity.kind` is the closest analog to a "strategy name" in this
/// generalized domain; used as the risk tracker's per-strategy key.
fn strategy_key(opportunity: &Opportunity) -> String {
    format!("{:?}", opportunity.kind)
}

pub struct ExecutionPipeline {
    bus: Arc<dyn OpportunityBus>,
    lock_store: Arc<dyn LockStore>,
    circuit_breaker: Arc<CircuitBreaker>,
    strategy: Arc<dyn Strategy>,
    risk: Option<Arc<RiskOrchestrator>>,
    simulation: Option<Arc<crate::simulation::SimulationEnvironment>>,
    config: PipelineConfig,
    stats: Arc<PipelineStats>,
    running: AtomicBool,
    active: AtomicUsize,
    processing: AtomicBool,
    cb_reenqueue_counts: Mutex<HashMap<String, u32>>,
    lock_conflict_counts: Mutex<HashMap<String, u32>>,
}

impl ExecutionPipeline {
    pub fn new(
        bus: Arc<dyn OpportunityBus>,
        lock_store: Arc<dyn LockStore>,
        circuit_breaker: Arc<CircuitBreaker>,
        strategy: Arc<dyn Strategy>,
        risk: Option<Arc<RiskOrchestrator>>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        Self::new_with_simulation(bus, lock_store, circuit_breaker, strategy, risk, None, config)
    }

    /// Same as [`Self::new`], with the pre-execution consult (gas pricing,
    /// quoting, and simulation) wired in.
    #[allow(clippy::too_many_arguments)]
    pub fn new_with_simulation(
        bus: Arc<dyn OpportunityBus>,
        lock_store: Arc<dyn LockStore>,
        circuit_breaker: Arc<CircuitBreaker>,
        strategy: Arc<dyn Strategy>,
        risk: Option<Arc<RiskOrchestrator>>,
        simulation: Option<Arc<crate::simulation::SimulationEnvironment>>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            lock_store,
            circuit_breaker,
            strategy,
            risk,
            simulation,
            config,
            stats: Arc::new(PipelineStats::default()),
            running: AtomicBool::new(true),
            active: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
            cb_reenqueue_counts: Mutex::new(HashMap::new()),
            lock_conflict_counts: Mutex::new(HashMap::new()),
        })
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Drains the queue under the concurrency cap, firing each execution off
    /// as its own task. Re-entrancy-guarded: a call that arrives while the
    /// drain loop is already running is a no-op.
    pub fn process_queue_items<'a>(
        self: &'a Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(self.process_queue_items_inner())
    }

    async fn process_queue_items_inner(self: &Arc<Self>) {
        if self.processing.swap(true, Ordering::SeqCst) {
            return;
        }

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if self.bus.queue_len() == 0 {
                break;
            }
            if self.active.load(Ordering::SeqCst) >= self.config.max_concurrent_executions {
                break;
            }
            let Some(message) = self.bus.dequeue().await else {
                break;
            };

            self.active.fetch_add(1, Ordering::SeqCst);
            let pipeline = self.clone();
            tokio::spawn(async move {
                pipeline.handle_message(message).await;
                pipeline.active.fetch_sub(1, Ordering::SeqCst);

                let follow_up = pipeline.clone();
                tokio::spawn(async move {
                    follow_up.process_queue_items().await;
                });
            });
        }

        self.processing.store(false, Ordering::SeqCst);
    }

    /// Synchronous variant for tests: drains and awaits every spawned
    /// execution inline rather than firing-and-forgetting them.
    pub async fn drain_synchronously(self: &Arc<Self>) {
        while self.bus.queue_len() > 0 {
            let Some(message) = self.bus.dequeue().await else { break };
            self.active.fetch_add(1, Ordering::SeqCst);
            self.handle_message(message).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn handle_message(self: &Arc<Self>, message: BusMessage<Opportunity>) {
        let opportunity = message.payload.clone();

        if !self.circuit_breaker.can_execute(opportunity.buy_chain.as_str()) {
            self.stats.circuit_breaker_blocks.fetch_add(1, Ordering::Relaxed);

            let attempts = {
                let mut counts = self.cb_reenqueue_counts.lock();
                let entry = counts.entry(opportunity.id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };

            if attempts <= self.config.max_cb_reenqueue_attempts {
                self.bus.requeue(message);
            } else {
                self.cb_reenqueue_counts.lock().remove(&opportunity.id);
                warn!(opportunity_id = %opportunity.id, "dropping opportunity after exceeding circuit breaker re-enqueue cap");
                self.stats.queue_rejects.fetch_add(1, Ordering::Relaxed);
            }
            return;
        }

        self.cb_reenqueue_counts.lock().remove(&opportunity.id);
        self.execute_with_lock(message).await;
    }

    async fn execute_with_lock(self: &Arc<Self>, message: BusMessage<Opportunity>) {
        let opportunity = message.payload.clone();
        let resource = format!("opportunity:{}", opportunity.id);
        let holder = self.config.instance_id.as_str();

        self.stats.execution_attempts.fetch_add(1, Ordering::Relaxed);

        match self.lock_store.try_acquire(&resource, holder, self.config.lock_ttl).await {
            Ok(LockOutcome::Acquired) => {
                self.run_locked(&resource, holder, &message).await;
            }
            Ok(LockOutcome::NotAcquired) => {
                self.stats.lock_conflicts.fetch_add(1, Ordering::Relaxed);

                let should_recover = {
                    let mut counts = self.lock_conflict_counts.lock();
                    let entry = counts.entry(opportunity.id.clone()).or_insert(0);
                    *entry += 1;
                    *entry >= self.config.lock_conflict_threshold
                };

                if !should_recover {
                    return;
                }

                self.lock_conflict_counts.lock().remove(&opportunity.id);

                if self.lock_store.force_release(&resource).await.is_err() {
                    return;
                }
                self.stats.stale_lock_recoveries.fetch_add(1, Ordering::Relaxed);

                match self.lock_store.try_acquire(&resource, holder, self.config.lock_ttl).await {
                    Ok(LockOutcome::Acquired) => {
                        self.run_locked(&resource, holder, &message).await;
                    }
                    Ok(LockOutcome::NotAcquired) => {
                        error!(opportunity_id = %opportunity.id, "lock still unavailable after stale-lock force-release");
                        self.stats.failed_executions.fetch_add(1, Ordering::Relaxed);
                        self.bus.ack_message_after_execution(&message.ack_token).await;
                    }
                    Err(e) => {
                        error!(opportunity_id = %opportunity.id, error = %e, "lock store unavailable on recovery retry, not acking");
                    }
                }
            }
            Err(e) => {
                error!(opportunity_id = %opportunity.id, error = %e, "lock store unavailable, not acking");
            }
        }
    }

    async fn run_locked(self: &Arc<Self>, resource: &str, holder: &str, message: &BusMessage<Opportunity>) {
        self.run_opportunity(&message.payload).await;
        let _ = self.lock_store.release(resource, holder).await;
        self.bus.ack_message_after_execution(&message.ack_token).await;
    }

    /// The six-step opportunity-execution procedure, run while holding the
    /// distributed lock.
    async fn run_opportunity(&self, opportunity: &Opportunity) -> ExecutionResult {
        if !opportunity.has_valid_buy_chain() {
            let result = ExecutionResult::failure(opportunity.id.clone(), "Missing required buyChain field");
            self.publish(&result).await;
            self.bus.mark_complete(&opportunity.id);
            return result;
        }

        self.bus.mark_active(&opportunity.id);

        if let Some(risk) = &self.risk {
            if !self.config.simulation_mode {
                let decision = risk.assess(&strategy_key(opportunity));
                if !decision.allowed {
                    self.stats.risk_rejections.fetch_add(1, Ordering::Relaxed);
                    let reason = decision.rejection_code.unwrap_or_else(|| "risk:rejected".to_string());
                    let result = ExecutionResult::failure(opportunity.id.clone(), reason);
                    self.publish(&result).await;
                    self.bus.mark_complete(&opportunity.id);
                    return result;
                }
            }
        }

        if let Some(simulation) = &self.simulation {
            if let Err(reason) = simulation.prepare(opportunity).await {
                self.stats.simulation_rejections.fetch_add(1, Ordering::Relaxed);
                let result = ExecutionResult::failure(opportunity.id.clone(), reason);
                self.publish(&result).await;
                self.bus.mark_complete(&opportunity.id);
                return result;
            }
        }

        let start = Instant::now();
        let (outcome, timeout_handle) =
            CancellableTimeout::race(self.config.execution_timeout, self.strategy.execute(opportunity)).await;
        timeout_handle.cancel();

        let result = match outcome {
            Some(strategy_outcome) if strategy_outcome.success => {
                self.stats.successful_executions.fetch_add(1, Ordering::Relaxed);
                self.circuit_breaker.record_success(opportunity.buy_chain.as_str());
                if let Some(risk) = &self.risk {
                    risk.tracker.record_outcome(&strategy_key(opportunity), true);
                }
                ExecutionResult::success(
                    opportunity.id.clone(),
                    strategy_outcome.actual_profit.unwrap_or_default(),
                    strategy_outcome.gas_cost.unwrap_or_default(),
                )
            }
            Some(strategy_outcome) => {
                self.stats.failed_executions.fetch_add(1, Ordering::Relaxed);
                self.circuit_breaker.record_failure(opportunity.buy_chain.as_str());
                if let Some(risk) = &self.risk {
                    risk.tracker.record_outcome(&strategy_key(opportunity), false);
                }
                ExecutionResult::failure(opportunity.id.clone(), strategy_outcome.error.unwrap_or_else(|| "strategy failed".to_string()))
            }
            None => {
                self.stats.execution_timeouts.fetch_add(1, Ordering::Relaxed);
                self.stats.failed_executions.fetch_add(1, Ordering::Relaxed);
                self.circuit_breaker.record_failure(opportunity.buy_chain.as_str());
                ExecutionResult::failure(opportunity.id.clone(), "execution timed out")
            }
        };

        let elapsed_ms = start.elapsed().as_millis();
        info!(opportunity_id = %opportunity.id, elapsed_ms, success = result.success, "opportunity execution finished");

        self.publish(&result).await;
        self.bus.mark_complete(&opportunity.id);
        result
    }

    async fn publish(&self, result: &ExecutionResult) {
        self.bus.publish_result("execution.results", result).await;
    }
}
