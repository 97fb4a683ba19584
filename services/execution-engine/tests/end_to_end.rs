//! Crate-boundary check that a successful initialization wires cleanly into
//! the execution pipeline: the risk orchestrator produced by
//! `InitializationFacade::initialize` is usable directly by
//! `ExecutionPipeline` without any adaptation.

use async_trait::async_trait;
use bus::{FakeBus, OpportunityBus};
use execution_engine::circuit_breaker::CircuitBreaker;
use execution_engine::config::ExecutionEngineConfig;
use execution_engine::init::InitializationFacade;
use execution_engine::pipeline::{ExecutionPipeline, PipelineConfig};
use execution_engine::simulation::SimulationEnvironment;
use execution_engine::strategy::{Strategy, StrategyOutcome};
use gas_optimizer::{GasFeeProvider, GasPriceOptimizer};
use lock_store::InMemoryLockStore;
use mev::{ChainMevSettings, MevError, MevProvider, MevProviderFactory, MevRegistry, MevStrategy};
use pending_sim::{ExecutionReceipt, PendingStateSimulator, SimError, SimulationExecutor, SimulationResult};
use rust_decimal::Decimal;
use sim_router::{
    ProviderError, ProviderHealthScore, ProviderMetrics, RouterConfig, SimulationOutcome, SimulationProvider,
    SimulationRequest, SimulationRouter,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use types::{AckToken, BusMessage, Chain, Dex, Opportunity, OpportunityKind, PathHop, PoolIndex};

struct FakeMevProvider {
    chain: String,
}

#[async_trait]
impl MevProvider for FakeMevProvider {
    fn chain(&self) -> &str {
        &self.chain
    }
    async fn submit_bundle(&self, _raw_txs: Vec<Vec<u8>>) -> Result<String, MevError> {
        Ok("0xbundle".to_string())
    }
}

struct AlwaysCreatesProvider {
    cached: Mutex<Vec<String>>,
}

#[async_trait]
impl MevProviderFactory for AlwaysCreatesProvider {
    async fn create_provider_async(&self, chain: &str, _strategy: MevStrategy) -> Result<Arc<dyn MevProvider>, MevError> {
        self.cached.lock().unwrap().push(chain.to_string());
        Ok(Arc::new(FakeMevProvider { chain: chain.to_string() }))
    }
    fn is_cached(&self, chain: &str) -> bool {
        self.cached.lock().unwrap().iter().any(|c| c == chain)
    }
}

fn chain_settings(chain: &str) -> ChainMevSettings {
    ChainMevSettings { chain: chain.to_string(), wallet: Some("0xwallet".to_string()), strategy: MevStrategy::Flashbots, enabled: true, in_chain_settings: true }
}

struct SucceedingStrategy {
    calls: AtomicU64,
}

#[async_trait]
impl Strategy for SucceedingStrategy {
    async fn execute(&self, _opportunity: &Opportunity) -> StrategyOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StrategyOutcome::success(Decimal::from(25), Decimal::from(5))
    }
}

fn message(id: &str) -> BusMessage<Opportunity> {
    BusMessage {
        topic: "opportunities".to_string(),
        payload: Opportunity {
            id: id.to_string(),
            kind: OpportunityKind::IntraChain,
            buy_chain: Chain::from("polygon"),
            sell_chain: None,
            buy_dex: Dex::from("uniswap_v3"),
            sell_dex: Dex::from("sushiswap"),
            path: vec![],
            expected_profit: Decimal::new(40, 0),
            created_at_ms: 0,
        },
        ack_token: AckToken(id.to_string()),
    }
}

#[tokio::test]
async fn initialized_risk_orchestrator_feeds_the_pipeline_end_to_end() {
    let facade = InitializationFacade::new();
    let config = ExecutionEngineConfig::default();
    let factory = Arc::new(AlwaysCreatesProvider { cached: Mutex::new(vec![]) });
    let registry = MevRegistry::new();

    let init_result = facade.initialize(&config, &[chain_settings("polygon")], factory, &registry).await.unwrap();
    assert!(init_result.mev.success);
    assert!(init_result.bridge.success);

    let bus = Arc::new(FakeBus::new());
    bus.push(message("opp-e2e-1"));

    let strategy = Arc::new(SucceedingStrategy { calls: AtomicU64::new(0) });
    let lock_store = Arc::new(InMemoryLockStore::new());
    let circuit_breaker = Arc::new(CircuitBreaker::new(5));

    let pipeline = ExecutionPipeline::new(
        bus.clone(),
        lock_store,
        circuit_breaker,
        strategy.clone(),
        init_result.risk.orchestrator.clone(),
        PipelineConfig::default(),
    );

    pipeline.drain_synchronously().await;

    assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.acked().len(), 1);
    let stats = pipeline.stats();
    assert_eq!(stats.successful_executions, 1);
}

struct RecordingGasProvider {
    consulted: AtomicBool,
}

#[async_trait]
impl GasFeeProvider for RecordingGasProvider {
    async fn current_gas_price_gwei(&self) -> Result<Option<f64>, anyhow::Error> {
        self.consulted.store(true, Ordering::SeqCst);
        Ok(Some(30.0))
    }
}

struct RecordingSimulationProvider {
    consulted: AtomicBool,
}

#[async_trait]
impl SimulationProvider for RecordingSimulationProvider {
    fn name(&self) -> &str {
        "recording"
    }
    async fn simulate(&self, _request: &SimulationRequest) -> Result<SimulationOutcome, ProviderError> {
        self.consulted.store(true, Ordering::SeqCst);
        Ok(SimulationOutcome { would_revert: false, revert_reason: None, gas_used: Some(21_000), return_data: None })
    }
    fn get_health(&self) -> ProviderHealthScore {
        ProviderHealthScore { healthy: true, success_rate: 1.0, normalized_latency: 0.0 }
    }
    fn get_metrics(&self) -> ProviderMetrics {
        ProviderMetrics { calls: 1, successes: 1, failures: 0 }
    }
    async fn health_check(&self) -> bool {
        true
    }
}

struct RecordingExecutor {
    consulted: AtomicBool,
}

#[async_trait]
impl SimulationExecutor for RecordingExecutor {
    async fn create_snapshot(&self) -> Result<String, SimError> {
        Ok("snap-1".to_string())
    }
    async fn revert_to_snapshot(&self, _id: &str) -> Result<bool, SimError> {
        Ok(true)
    }
    async fn impersonate_and_send(&self, _sender: &str, _to: &str, _calldata: &[u8], _gas_limit: u64) -> Result<ExecutionReceipt, SimError> {
        self.consulted.store(true, Ordering::SeqCst);
        Ok(ExecutionReceipt { status: true, revert_reason: None, logs: vec![] })
    }
    async fn get_pool_reserves(&self, _pool: &str) -> Result<(u128, u128), SimError> {
        Ok((1_000_000, 1_000_000))
    }
}

/// Proves the full A/F/E consult chain — gas optimizer, simulation router,
/// pending-state simulator — actually fires from a real pipeline run before
/// the strategy executes, not just that the libraries compile into the binary.
#[tokio::test]
async fn simulation_gate_consults_gas_router_and_pending_sim_before_the_strategy_runs() {
    let bus = Arc::new(FakeBus::new());
    let mut opportunity = message("opp-e2e-sim").payload;
    opportunity.path = vec![PathHop {
        dex: Dex::from("uniswap_v2"),
        token_in: "0xaaa".to_string(),
        token_out: "0xbbb".to_string(),
        pool_address: "0xpool1".to_string(),
    }];
    bus.push(BusMessage { topic: "opportunities".to_string(), ack_token: AckToken(opportunity.id.clone()), payload: opportunity });

    let gas_consulted = Arc::new(RecordingGasProvider { consulted: AtomicBool::new(false) });
    let gas_optimizer = Arc::new(GasPriceOptimizer::new());

    let router_consulted = Arc::new(RecordingSimulationProvider { consulted: AtomicBool::new(false) });
    let sim_router = Arc::new(SimulationRouter::new(vec![router_consulted.clone()], RouterConfig::default()));

    let executor_consulted = Arc::new(RecordingExecutor { consulted: AtomicBool::new(false) });
    let pending_sim = Arc::new(PendingStateSimulator::new(executor_consulted.clone(), Arc::new(PoolIndex::new())));

    let simulation = Arc::new(
        SimulationEnvironment::new(gas_optimizer, sim_router)
            .with_gas_provider(gas_consulted.clone())
            .with_pending_sim(pending_sim, std::time::Duration::from_secs(1)),
    );

    let strategy = Arc::new(SucceedingStrategy { calls: AtomicU64::new(0) });
    let lock_store = Arc::new(InMemoryLockStore::new());
    let circuit_breaker = Arc::new(CircuitBreaker::new(5));

    let pipeline = ExecutionPipeline::new_with_simulation(
        bus.clone(),
        lock_store,
        circuit_breaker,
        strategy.clone(),
        None,
        Some(simulation),
        PipelineConfig::default(),
    );

    pipeline.drain_synchronously().await;

    assert!(gas_consulted.consulted.load(Ordering::SeqCst), "gas optimizer was never consulted");
    assert!(router_consulted.consulted.load(Ordering::SeqCst), "simulation router was never consulted");
    assert!(executor_consulted.consulted.load(Ordering::SeqCst), "pending-state simulator was never consulted");
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.acked().len(), 1);
}

#[tokio::test]
async fn second_initialize_call_is_rejected_once_completed() {
    let facade = InitializationFacade::new();
    let config = ExecutionEngineConfig::default();
    let factory = Arc::new(AlwaysCreatesProvider { cached: Mutex::new(vec![]) });
    let registry = MevRegistry::new();

    facade.initialize(&config, &[chain_settings("arbitrum")], factory.clone(), &registry).await.unwrap();
    let second = facade.initialize(&config, &[chain_settings("arbitrum")], factory, &registry).await;
    assert!(second.is_err());
}
