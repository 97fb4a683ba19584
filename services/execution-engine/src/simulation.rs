//! Assembles the gas optimizer, simulation router, and pending-state
//! simulator into the pre-execution gate the pipeline consults before
//! racing a strategy: refreshed gas price, an optional router quote, an
//! optional simulated-revert check, and an optional pending-state replay.
//! Fork-manager, provider-service, hot-fork-sync, and batch-quoter are wired
//! in as the concrete adapters this gate runs against.

use async_trait::async_trait;
use fork_manager::{ForkError, ForkManager, ForkState};
use gas_optimizer::{GasError, GasFeeProvider, GasPriceOptimizer};
use hot_fork_sync::{ForkResetter, SourceChain, SyncError};
use pending_sim::{ExecutionReceipt, PendingStateSimulator, SimError, SimulationExecutor};
use provider_service::ChainProvider;
use sim_router::{
    ProviderError, ProviderHealthScore, ProviderMetrics, SimulationOutcome, SimulationProvider, SimulationRequest,
    SimulationRouter,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;
use types::{DexKind, Opportunity, PathHop, PendingSwapIntent};

/// Backs the pending-state simulator's executor with a real fork: snapshot
/// operations map directly, and `impersonate_and_send`'s calldata is hex
/// encoded into the raw transaction `apply_pending_tx` expects.
pub struct ForkManagerExecutor {
    fork: Arc<ForkManager>,
}

impl ForkManagerExecutor {
    pub fn new(fork: Arc<ForkManager>) -> Self {
        Self { fork }
    }
}

#[async_trait]
impl SimulationExecutor for ForkManagerExecutor {
    async fn create_snapshot(&self) -> Result<String, SimError> {
        self.fork.create_snapshot().await.map_err(|e| SimError::Snapshot(e.to_string()))
    }

    async fn revert_to_snapshot(&self, id: &str) -> Result<bool, SimError> {
        self.fork.revert_to_snapshot(id).await.map_err(|e| SimError::Snapshot(e.to_string()))
    }

    async fn impersonate_and_send(&self, _sender: &str, _to: &str, calldata: &[u8], _gas_limit: u64) -> Result<ExecutionReceipt, SimError> {
        let raw_tx = hex::encode(calldata);
        match self.fork.apply_pending_tx(&raw_tx).await {
            Ok(()) => Ok(ExecutionReceipt { status: true, revert_reason: None, logs: vec![] }),
            Err(ForkError::Rpc(message)) => {
                let reason = fork_manager::extract_revert_reason(&message).or(Some(message));
                Ok(ExecutionReceipt { status: false, revert_reason: reason, logs: vec![] })
            }
            Err(e) => Err(SimError::ExecutorUnavailable(e.to_string())),
        }
    }

    async fn get_pool_reserves(&self, pool: &str) -> Result<(u128, u128), SimError> {
        self.fork.get_pool_reserves(pool).await.map_err(|e| SimError::ExecutorUnavailable(e.to_string()))
    }
}

/// Registers the same fork as one of the simulation router's providers, so
/// there is at least one real provider behind the health-ranked fallback.
pub struct ForkManagerProvider {
    fork: Arc<ForkManager>,
}

impl ForkManagerProvider {
    pub fn new(fork: Arc<ForkManager>) -> Self {
        Self { fork }
    }
}

#[async_trait]
impl SimulationProvider for ForkManagerProvider {
    fn name(&self) -> &str {
        "fork-manager"
    }

    async fn simulate(&self, request: &SimulationRequest) -> Result<SimulationOutcome, ProviderError> {
        let raw_tx = hex::encode(&request.data);
        match self.fork.apply_pending_tx(&raw_tx).await {
            Ok(()) => Ok(SimulationOutcome { would_revert: false, revert_reason: None, gas_used: Some(request.gas_limit), return_data: None }),
            Err(ForkError::Rpc(message)) => {
                let reason = fork_manager::extract_revert_reason(&message).or(Some(message));
                Ok(SimulationOutcome { would_revert: true, revert_reason: reason, gas_used: None, return_data: None })
            }
            Err(e) => Err(ProviderError::Transport(e.to_string())),
        }
    }

    fn get_health(&self) -> ProviderHealthScore {
        let healthy = matches!(self.fork.state(), ForkState::Running);
        ProviderHealthScore {
            healthy,
            success_rate: if healthy { 1.0 } else { 0.0 },
            normalized_latency: self.fork.average_latency_ms().unwrap_or(0.0) / 1_000.0,
        }
    }

    fn get_metrics(&self) -> ProviderMetrics {
        let metrics = self.fork.metrics();
        ProviderMetrics { calls: metrics.total_operations, successes: metrics.successes, failures: metrics.failures }
    }

    async fn health_check(&self) -> bool {
        matches!(self.fork.state(), ForkState::Running)
    }
}

/// Feeds hot-fork-sync the source chain's head block via a registered
/// provider-service client.
pub struct ProviderSourceChain {
    provider: Arc<dyn ChainProvider>,
}

impl ProviderSourceChain {
    pub fn new(provider: Arc<dyn ChainProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SourceChain for ProviderSourceChain {
    async fn head_block(&self) -> Result<u64, SyncError> {
        self.provider.get_block_number().await.map_err(|e| SyncError::SourceUnavailable(e.to_string()))
    }
}

/// Lets hot-fork-sync reset the fork it keeps synced to the source chain's head.
pub struct ForkManagerResetter {
    fork: Arc<ForkManager>,
}

impl ForkManagerResetter {
    pub fn new(fork: Arc<ForkManager>) -> Self {
        Self { fork }
    }
}

#[async_trait]
impl ForkResetter for ForkManagerResetter {
    fn is_running(&self) -> bool {
        matches!(self.fork.state(), ForkState::Running)
    }

    async fn reset_to_block(&self, block: u64) -> Result<(), SyncError> {
        self.fork.reset_to_block(block).await.map_err(|e| SyncError::ResetFailed(e.to_string()))
    }
}

fn dex_kind_for(dex: &str) -> DexKind {
    if dex.contains("v3") {
        DexKind::UniswapV3Single
    } else {
        DexKind::UniswapV2
    }
}

fn hop_token_path(path: &[PathHop]) -> Vec<String> {
    let mut tokens = Vec::with_capacity(path.len() + 1);
    for (i, hop) in path.iter().enumerate() {
        if i == 0 {
            tokens.push(hop.token_in.clone());
        }
        tokens.push(hop.token_out.clone());
    }
    tokens
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// What the consult step decided, carried past `prepare()` so the strategy
/// that ultimately submits the trade can cost against the same gas figure.
#[derive(Debug, Clone, Copy)]
pub struct PreparedExecution {
    pub gas_price_gwei: f64,
}

/// Assembles the gas optimizer, an optional live fee provider, an optional
/// batch quoter, the simulation router, and an optional pending-state
/// simulator into the consult the pipeline runs before racing a strategy.
pub struct SimulationEnvironment {
    gas_optimizer: Arc<GasPriceOptimizer>,
    gas_provider: Option<Arc<dyn GasFeeProvider>>,
    batch_quoter: Option<Arc<batch_quoter::BatchQuoter>>,
    sim_router: Arc<SimulationRouter>,
    pending_sim: Option<Arc<PendingStateSimulator>>,
    pending_sim_timeout: Duration,
}

impl SimulationEnvironment {
    pub fn new(gas_optimizer: Arc<GasPriceOptimizer>, sim_router: Arc<SimulationRouter>) -> Self {
        Self {
            gas_optimizer,
            gas_provider: None,
            batch_quoter: None,
            sim_router,
            pending_sim: None,
            pending_sim_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_gas_provider(mut self, provider: Arc<dyn GasFeeProvider>) -> Self {
        self.gas_provider = Some(provider);
        self
    }

    pub fn with_batch_quoter(mut self, quoter: Arc<batch_quoter::BatchQuoter>) -> Self {
        self.batch_quoter = Some(quoter);
        self
    }

    pub fn with_pending_sim(mut self, simulator: Arc<PendingStateSimulator>, timeout: Duration) -> Self {
        self.pending_sim = Some(simulator);
        self.pending_sim_timeout = timeout;
        self
    }

    /// Gates one opportunity through gas pricing, an optional quote, a
    /// router-level revert check, and pending-state replay, in that order.
    /// `Err` carries the reason to publish as the execution result; `Ok`
    /// carries the gas price the strategy should cost its submission against.
    pub async fn prepare(&self, opportunity: &Opportunity) -> Result<PreparedExecution, String> {
        let chain = opportunity.buy_chain.as_str();

        let gas_price_gwei = self.gas_optimizer.get_optimal_gas_price(chain, self.gas_provider.as_deref()).await;

        if let Some(provider) = &self.gas_provider {
            if let Err(GasError::GasSpike { prev, new, multiplier }) =
                self.gas_optimizer.refresh_for_submission(chain, provider.as_ref(), gas_price_gwei).await
            {
                return Err(format!("ERR_GAS_SPIKE: {new:.2} gwei is >= {multiplier}x the prior {prev:.2} gwei"));
            }
        }

        let Some(hop) = opportunity.path.first() else {
            return Ok(PreparedExecution { gas_price_gwei });
        };

        let quoted_amount_out = if let Some(quoter) = &self.batch_quoter {
            let path = hop_token_path(&opportunity.path);
            let simulation = quoter.simulate_arbitrage_path(&path, opportunity.expected_profit, 30).await;
            if !simulation.success {
                return Err("ERR_QUOTE_UNAVAILABLE: no router could quote the opportunity's path".to_string());
            }
            Some(simulation.final_amount_out)
        } else {
            None
        };

        if self.sim_router.should_simulate(opportunity.expected_profit, opportunity.age_ms(now_ms())) {
            let request = SimulationRequest {
                chain: chain.to_string(),
                from: opportunity.buy_dex.0.clone(),
                to: hop.pool_address.clone(),
                data: Vec::new(),
                value: 0,
                gas_limit: 300_000,
                block_tag: None,
                state_overrides_hash: None,
            };
            match self.sim_router.simulate(request).await {
                Ok(outcome) if outcome.would_revert => {
                    return Err(format!(
                        "ERR_SIMULATED_REVERT: {}",
                        outcome.revert_reason.unwrap_or_else(|| "execution reverted".to_string())
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(opportunity_id = %opportunity.id, error = %e, "simulation router unavailable, proceeding without a pre-check");
                }
            }
        }

        if let Some(pending_sim) = &self.pending_sim {
            let intent = PendingSwapIntent {
                tx_hash: format!("sim-{}", opportunity.id),
                router: hop.pool_address.clone(),
                dex_kind: dex_kind_for(&hop.dex.0),
                token_in: hop.token_in.clone(),
                token_out: hop.token_out.clone(),
                amount_in: opportunity.expected_profit,
                expected_amount_out: quoted_amount_out.unwrap_or(opportunity.expected_profit),
                path: vec![],
                slippage_tolerance_bps: 50,
                deadline: u64::MAX,
                sender: opportunity.buy_dex.0.clone(),
                gas_limit: 300_000,
                gas_price_wei: (gas_price_gwei.max(0.0) * 1e9) as u128,
                nonce: 0,
                chain_id: 0,
                fee_bps: None,
                is_native_input: None,
            };
            let result = pending_sim.simulate(&intent, self.pending_sim_timeout).await;
            if !result.success {
                let reason = result.revert_reason.or(result.error).unwrap_or_else(|| "pending-state simulation failed".to_string());
                return Err(format!("ERR_PENDING_SIM_FAILED: {reason}"));
            }
        }

        Ok(PreparedExecution { gas_price_gwei })
    }
}
