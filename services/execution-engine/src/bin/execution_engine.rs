use anyhow::{Context, Result};
use clap::Parser;
use ethers::providers::{Http, Middleware, Provider};
use execution_engine::circuit_breaker::CircuitBreaker;
use execution_engine::config::ExecutionEngineConfig;
use execution_engine::init::InitializationFacade;
use execution_engine::pipeline::{ExecutionPipeline, PipelineConfig};
use execution_engine::simulation::{ForkManagerExecutor, ForkManagerProvider, ForkManagerResetter, ProviderSourceChain, SimulationEnvironment};
use execution_engine::strategy::{Strategy, StrategyOutcome};
use fork_manager::{ForkConfig, ForkManager, HttpRpcClientFactory, ProcessForkLauncher};
use gas_optimizer::{GasFeeProvider, GasPriceOptimizer};
use hot_fork_sync::{HotForkSynchronizer, SyncConfig};
use mev::{ChainMevSettings, MevError, MevProvider, MevProviderFactory, MevRegistry, MevStrategy};
use pending_sim::PendingStateSimulator;
use provider_service::{ChainProvider, ProviderFactory, ProviderService};
use sim_router::{RouterConfig, SimulationProvider, SimulationRouter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "execution_engine")]
struct Cli {
    /// Optional config file override; environment variables take precedence
    /// per component.
    #[arg(long)]
    config: Option<String>,
}

/// Placeholder factory so the binary starts without a configured MEV relay;
/// real deployments supply a factory wired to the actual relay endpoints.
struct NoopMevFactory;

struct NoopMevProvider {
    chain: String,
}

#[async_trait::async_trait]
impl MevProvider for NoopMevProvider {
    fn chain(&self) -> &str {
        &self.chain
    }
    async fn submit_bundle(&self, _raw_txs: Vec<Vec<u8>>) -> Result<String, MevError> {
        Err(MevError::CreationFailed("no relay configured".to_string()))
    }
}

#[async_trait::async_trait]
impl MevProviderFactory for NoopMevFactory {
    async fn create_provider_async(&self, chain: &str, _strategy: MevStrategy) -> Result<Arc<dyn MevProvider>, MevError> {
        Ok(Arc::new(NoopMevProvider { chain: chain.to_string() }))
    }
    fn is_cached(&self, _chain: &str) -> bool {
        true
    }
}

struct NoopStrategy;

#[async_trait::async_trait]
impl Strategy for NoopStrategy {
    async fn execute(&self, _opportunity: &types::Opportunity) -> StrategyOutcome {
        StrategyOutcome::failure("no strategy wired")
    }
}

/// Wraps an `ethers` HTTP provider so provider-service and gas-optimizer can
/// consult the same live RPC endpoint the fork was seeded from.
struct EthersChainProvider(Provider<Http>);

#[async_trait::async_trait]
impl ChainProvider for EthersChainProvider {
    async fn get_block_number(&self) -> Result<u64> {
        Ok(self.0.get_block_number().await?.as_u64())
    }
}

struct EthersProviderFactory {
    rpc_url: String,
}

#[async_trait::async_trait]
impl ProviderFactory for EthersProviderFactory {
    async fn create(&self, _chain: &str) -> Result<Arc<dyn ChainProvider>> {
        let provider = Provider::<Http>::try_from(self.rpc_url.as_str())?;
        Ok(Arc::new(EthersChainProvider(provider)))
    }
}

struct EthersGasFeeProvider(Provider<Http>);

#[async_trait::async_trait]
impl GasFeeProvider for EthersGasFeeProvider {
    async fn current_gas_price_gwei(&self) -> Result<Option<f64>> {
        let price = self.0.get_gas_price().await?;
        Ok(Some(price.as_u128() as f64 / 1e9))
    }
}

/// Assembles the local fork (C), the live-chain provider (B) it was seeded
/// from, the synchronizer (D) that keeps the fork at the source chain's
/// head, and the gas/simulation/pending-state consult (A/F/E) the pipeline
/// runs before racing a strategy. Returns `None` when no upstream RPC is
/// configured, in which case the pipeline runs without the pre-execution gate.
async fn build_simulation_environment(config: &ExecutionEngineConfig, rpc_url: &str) -> Result<Arc<SimulationEnvironment>> {
    let fork_config = ForkConfig {
        fork_url: rpc_url.to_string(),
        port: config.anvil_port,
        account_count: 10,
        fork_block_number: None,
        memory_limit_bytes: None,
    };
    let fork = Arc::new(ForkManager::new(fork_config, Arc::new(ProcessForkLauncher::default()), Arc::new(HttpRpcClientFactory)));
    fork.start_fork(Duration::from_secs(30)).await.context("failed to start local fork")?;

    let providers = Arc::new(ProviderService::new(Arc::new(EthersProviderFactory { rpc_url: rpc_url.to_string() })));
    providers.add_chain("ethereum", "").await.context("failed to register upstream chain provider")?;
    providers.start_health_loop();

    let source = Arc::new(ProviderSourceChain::new(providers.get_provider("ethereum").expect("just registered")));
    let resetter = Arc::new(ForkManagerResetter::new(fork.clone()));
    let synchronizer = Arc::new(HotForkSynchronizer::new(source, resetter, SyncConfig::default()));
    synchronizer.start().context("failed to start fork synchronizer")?;

    let gas_optimizer = Arc::new(GasPriceOptimizer::new());
    let gas_provider: Arc<dyn GasFeeProvider> = Arc::new(EthersGasFeeProvider(Provider::<Http>::try_from(rpc_url)?));

    let sim_router = Arc::new(SimulationRouter::new(vec![Arc::new(ForkManagerProvider::new(fork.clone())) as Arc<dyn SimulationProvider>], RouterConfig::default()));

    let executor = Arc::new(ForkManagerExecutor::new(fork.clone()));
    let pending_sim = Arc::new(PendingStateSimulator::new(executor, Arc::new(types::PoolIndex::new())));

    let environment = SimulationEnvironment::new(gas_optimizer, sim_router)
        .with_gas_provider(gas_provider)
        .with_pending_sim(pending_sim, Duration::from_secs(5));
    Ok(Arc::new(environment))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        info!(path = %path, "config file override given; environment variables still take precedence per component");
    }

    info!("starting execution engine");

    let config = ExecutionEngineConfig::from_env();

    let facade = InitializationFacade::new();
    let mev_registry = MevRegistry::new();
    let mev_factory: Arc<dyn MevProviderFactory> = Arc::new(NoopMevFactory);
    let mev_chains: Vec<ChainMevSettings> = vec![];

    let init_result = facade
        .initialize(&config, &mev_chains, mev_factory, &mev_registry)
        .await
        .context("execution engine initialization failed")?;

    info!(mev_success = init_result.mev.success, risk_enabled = init_result.risk.enabled, bridge_success = init_result.bridge.success, "initialization complete");

    let bus: Arc<dyn bus::OpportunityBus> = Arc::new(bus::FakeBus::new());
    let lock_store: Arc<dyn lock_store::LockStore> = Arc::new(lock_store::InMemoryLockStore::new());
    let circuit_breaker = Arc::new(CircuitBreaker::new(5));
    let strategy: Arc<dyn Strategy> = Arc::new(NoopStrategy);

    let simulation = match &config.eth_rpc_url {
        Some(rpc_url) => match build_simulation_environment(&config, rpc_url).await {
            Ok(env) => Some(env),
            Err(e) => {
                error!(error = %e, "failed to assemble the fork-backed simulation environment; running without the pre-execution gate");
                None
            }
        },
        None => {
            info!("no eth_rpc_url configured; running without the pre-execution gate");
            None
        }
    };

    let pipeline = ExecutionPipeline::new_with_simulation(
        bus,
        lock_store,
        circuit_breaker,
        strategy,
        init_result.risk.orchestrator.clone(),
        simulation,
        PipelineConfig { max_concurrent_executions: config.max_concurrent_executions, execution_timeout: config.execution_timeout, ..PipelineConfig::default() },
    );

    let mut shutdown = tokio::spawn(wait_for_shutdown_signal());
    let mut tick = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                pipeline.process_queue_items().await;
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "shutdown signal handler task panicked");
                }
                break;
            }
        }
    }

    pipeline.stop();
    info!("execution engine stopped cleanly");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c, shutting down");
    }
}
