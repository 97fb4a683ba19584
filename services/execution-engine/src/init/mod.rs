//! One-time, mutex-guarded startup of MEV / risk / bridge components.
//!
//! Re-entry after a successful init fails synchronously with
//! `already initialized` unless `reset()` (test-only) has run first. A
//! failed sub-step marks the facade as not initialized but preserves the
//! partial results for diagnostics.

pub mod bridge;

use crate::config::ExecutionEngineConfig;
use bridge::{init_bridge, BridgeInitResult};
use mev::{init_mev, ChainMevSettings, MevInitResult, MevProviderFactory, MevRegistry};
use parking_lot::RwLock;
use risk::{init_risk, RiskConfig, RiskInit};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("already initialized")]
    AlreadyInitialized,
    #[error("initialization failed: mev={mev_ok} risk={risk_ok} bridge={bridge_ok}")]
    Failed { mev_ok: bool, risk_ok: bool, bridge_ok: bool },
}

#[derive(Clone)]
pub struct InitResult {
    pub mev: MevInitResult,
    pub risk: Arc<RiskInit>,
    pub bridge: BridgeInitResult,
}

enum FacadeState {
    NotInitialized,
    Completed(Arc<InitResult>),
}

/// Serializes `initialize` calls and tracks whether startup has already
/// completed successfully.
pub struct InitializationFacade {
    guard: AsyncMutex<()>,
    state: RwLock<FacadeState>,
    last_result: RwLock<Option<Arc<InitResult>>>,
}

impl InitializationFacade {
    pub fn new() -> Self {
        Self {
            guard: AsyncMutex::new(()),
            state: RwLock::new(FacadeState::NotInitialized),
            last_result: RwLock::new(None),
        }
    }

    pub fn is_initialization_complete(&self) -> bool {
        matches!(*self.state.read(), FacadeState::Completed(_))
    }

    /// The most recent init attempt's result, whether it succeeded or not.
    pub fn last_result(&self) -> Option<Arc<InitResult>> {
        self.last_result.read().clone()
    }

    /// Test-only: clears completion state so `initialize` can run again.
    pub fn reset(&self) {
        *self.state.write() = FacadeState::NotInitialized;
    }

    pub async fn initialize(
        &self,
        config: &ExecutionEngineConfig,
        mev_chains: &[ChainMevSettings],
        mev_factory: Arc<dyn MevProviderFactory>,
        mev_registry: &MevRegistry,
    ) -> Result<Arc<InitResult>, InitError> {
        let _guard = self.guard.lock().await;

        if self.is_initialization_complete() {
            return Err(InitError::AlreadyInitialized);
        }

        info!("initializing execution engine: mev -> risk -> bridge");

        let mev_result = init_mev(config.mev_protection_enabled, mev_chains, mev_factory, mev_registry).await;

        let risk_config = RiskConfig {
            enabled: config.risk_enabled,
            force_enabled: config.risk_force_enabled,
            is_production: config.is_production,
            ..RiskConfig::default()
        };
        let mut risk_fatal = false;
        let risk_result = match init_risk(&risk_config) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "risk initialization failed fatally in production");
                risk_fatal = true;
                RiskInit { enabled: false, errors: vec![e.to_string()], ..RiskInit::default() }
            }
        };

        let bridge_result = init_bridge(&mev_registry.chains());

        let mev_ok = mev_result.success;
        let risk_ok = !risk_fatal;
        let bridge_ok = bridge_result.success;

        let result = Arc::new(InitResult { mev: mev_result, risk: Arc::new(risk_result), bridge: bridge_result });
        *self.last_result.write() = Some(result.clone());

        if mev_ok && risk_ok && bridge_ok {
            *self.state.write() = FacadeState::Completed(result.clone());
            info!("execution engine initialization complete");
            Ok(result)
        } else {
            error!(mev_ok, risk_ok, bridge_ok, "execution engine initialization failed, partial results preserved");
            Err(InitError::Failed { mev_ok, risk_ok, bridge_ok })
        }
    }
}

impl Default for InitializationFacade {
    fn default() -> Self {
        Self::new()
    }
}
