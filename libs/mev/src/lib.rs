//! Per-chain MEV-protected submission provider registry.
//!
//! Each configured chain gets at most one provider, created asynchronously
//! under a timeout and cached by the factory. Jito is recognized but skipped
//! outright since it targets Solana, not an EVM chain.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const PROVIDER_CREATE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MevError {
    #[error("provider creation failed: {0}")]
    CreationFailed(String),
    #[error("provider creation timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MevStrategy {
    Flashbots,
    Bloxroute,
    Fastlane,
    /// Solana-only; never instantiated by `init_mev`.
    Jito,
}

impl MevStrategy {
    pub fn is_evm(&self) -> bool {
        !matches!(self, MevStrategy::Jito)
    }
}

#[derive(Debug, Clone)]
pub struct ChainMevSettings {
    pub chain: String,
    pub wallet: Option<String>,
    pub strategy: MevStrategy,
    pub enabled: bool,
    pub in_chain_settings: bool,
}

/// A chain-specific MEV-protected submission channel (Flashbots relay,
/// bloXroute private transaction endpoint, Fastlane order flow auction).
#[async_trait]
pub trait MevProvider: Send + Sync {
    fn chain(&self) -> &str;
    async fn submit_bundle(&self, raw_txs: Vec<Vec<u8>>) -> Result<String, MevError>;
}

/// Creates providers and exposes which chains currently have one cached.
#[async_trait]
pub trait MevProviderFactory: Send + Sync {
    async fn create_provider_async(&self, chain: &str, strategy: MevStrategy) -> Result<Arc<dyn MevProvider>, MevError>;
    fn is_cached(&self, chain: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct MevInitResult {
    pub success: bool,
    pub error: Option<String>,
    pub failed_chains: Vec<(String, String)>,
    pub skipped_chains: Vec<String>,
}

/// Holds the per-chain providers created during `init_mev`.
pub struct MevRegistry {
    providers: RwLock<HashMap<String, Arc<dyn MevProvider>>>,
}

impl MevRegistry {
    pub fn new() -> Self {
        Self { providers: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, chain: &str) -> Option<Arc<dyn MevProvider>> {
        self.providers.read().get(chain).cloned()
    }

    fn insert(&self, chain: &str, provider: Arc<dyn MevProvider>) {
        self.providers.write().insert(chain.to_string(), provider);
    }

    pub fn chains(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

impl Default for MevRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// For each chain with a wallet and a provider strategy: skip if absent from
/// chain settings, skip if disabled, skip Jito (non-EVM); otherwise create
/// the provider under a 30s timeout and verify the factory actually cached
/// it. Aggregate failure across every attempted chain surfaces as
/// `mev:all_providers_failed:N_attempted`.
pub async fn init_mev(
    global_enabled: bool,
    chains: &[ChainMevSettings],
    factory: Arc<dyn MevProviderFactory>,
    registry: &MevRegistry,
) -> MevInitResult {
    if !global_enabled {
        return MevInitResult { success: false, error: Some("mev:disabled".to_string()), ..MevInitResult::default() };
    }

    let mut result = MevInitResult::default();
    let mut attempted = 0u32;

    for chain_settings in chains {
        if chain_settings.wallet.is_none() {
            result.skipped_chains.push(chain_settings.chain.clone());
            continue;
        }
        if !chain_settings.in_chain_settings {
            result.skipped_chains.push(chain_settings.chain.clone());
            continue;
        }
        if !chain_settings.enabled {
            result.skipped_chains.push(chain_settings.chain.clone());
            continue;
        }
        if !chain_settings.strategy.is_evm() {
            info!(chain = %chain_settings.chain, "skipping non-EVM MEV strategy");
            result.skipped_chains.push(chain_settings.chain.clone());
            continue;
        }

        attempted += 1;
        let chain = chain_settings.chain.clone();
        let create = factory.create_provider_async(&chain, chain_settings.strategy);
        match tokio::time::timeout(PROVIDER_CREATE_TIMEOUT, create).await {
            Ok(Ok(provider)) => {
                if !factory.is_cached(&chain) {
                    result.failed_chains.push((chain.clone(), format!("mev:{chain}:provider_not_cached")));
                    continue;
                }
                registry.insert(&chain, provider);
            }
            Ok(Err(e)) => {
                warn!(chain = %chain, error = %e, "mev provider creation failed");
                result.failed_chains.push((chain.clone(), format!("mev:{chain}:{e}")));
            }
            Err(_) => {
                warn!(chain = %chain, "mev provider creation timed out");
                result.failed_chains.push((chain.clone(), format!("mev:{chain}:timeout")));
            }
        }
    }

    if attempted > 0 && result.failed_chains.len() as u32 == attempted {
        result.success = false;
        result.error = Some(format!("mev:all_providers_failed:{attempted}_attempted"));
    } else {
        result.success = true;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeProvider {
        chain: String,
    }

    #[async_trait]
    impl MevProvider for FakeProvider {
        fn chain(&self) -> &str {
            &self.chain
        }
        async fn submit_bundle(&self, _raw_txs: Vec<Vec<u8>>) -> Result<String, MevError> {
            Ok("0xbundlehash".to_string())
        }
    }

    struct FakeFactory {
        fail_chains: Vec<String>,
        cached: Mutex<Vec<String>>,
        skip_cache_insert_for: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MevProviderFactory for FakeFactory {
        async fn create_provider_async(&self, chain: &str, _strategy: MevStrategy) -> Result<Arc<dyn MevProvider>, MevError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_chains.contains(&chain.to_string()) {
                return Err(MevError::CreationFailed("relay unreachable".to_string()));
            }
            if !self.skip_cache_insert_for.contains(&chain.to_string()) {
                self.cached.lock().unwrap().push(chain.to_string());
            }
            Ok(Arc::new(FakeProvider { chain: chain.to_string() }))
        }

        fn is_cached(&self, chain: &str) -> bool {
            self.cached.lock().unwrap().iter().any(|c| c == chain)
        }
    }

    fn settings(chain: &str, strategy: MevStrategy) -> ChainMevSettings {
        ChainMevSettings {
            chain: chain.to_string(),
            wallet: Some("0xwallet".to_string()),
            strategy,
            enabled: true,
            in_chain_settings: true,
        }
    }

    #[tokio::test]
    async fn globally_disabled_returns_disabled_error() {
        let factory = Arc::new(FakeFactory { fail_chains: vec![], cached: Mutex::new(vec![]), skip_cache_insert_for: vec![], calls: AtomicUsize::new(0) });
        let registry = MevRegistry::new();
        let result = init_mev(false, &[settings("polygon", MevStrategy::Flashbots)], factory, &registry).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("mev:disabled"));
    }

    #[tokio::test]
    async fn skips_jito_as_non_evm() {
        let factory = Arc::new(FakeFactory { fail_chains: vec![], cached: Mutex::new(vec![]), skip_cache_insert_for: vec![], calls: AtomicUsize::new(0) });
        let registry = MevRegistry::new();
        let result = init_mev(true, &[settings("solana", MevStrategy::Jito)], factory.clone(), &registry).await;
        assert!(result.success);
        assert_eq!(result.skipped_chains, vec!["solana".to_string()]);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skips_chain_without_wallet() {
        let factory = Arc::new(FakeFactory { fail_chains: vec![], cached: Mutex::new(vec![]), skip_cache_insert_for: vec![], calls: AtomicUsize::new(0) });
        let registry = MevRegistry::new();
        let mut chain = settings("polygon", MevStrategy::Flashbots);
        chain.wallet = None;
        let result = init_mev(true, &[chain], factory, &registry).await;
        assert!(result.success);
        assert_eq!(result.skipped_chains, vec!["polygon".to_string()]);
    }

    #[tokio::test]
    async fn records_provider_not_cached_error() {
        let factory = Arc::new(FakeFactory {
            fail_chains: vec![],
            cached: Mutex::new(vec![]),
            skip_cache_insert_for: vec!["polygon".to_string()],
            calls: AtomicUsize::new(0),
        });
        let registry = MevRegistry::new();
        let result = init_mev(true, &[settings("polygon", MevStrategy::Flashbots)], factory, &registry).await;
        assert!(!result.success);
        assert_eq!(result.failed_chains, vec![("polygon".to_string(), "mev:polygon:provider_not_cached".to_string())]);
        assert_eq!(result.error.as_deref(), Some("mev:all_providers_failed:1_attempted"));
    }

    #[tokio::test]
    async fn partial_failure_still_succeeds_with_per_chain_lists() {
        let factory = Arc::new(FakeFactory {
            fail_chains: vec!["arbitrum".to_string()],
            cached: Mutex::new(vec![]),
            skip_cache_insert_for: vec![],
            calls: AtomicUsize::new(0),
        });
        let registry = MevRegistry::new();
        let result = init_mev(
            true,
            &[settings("polygon", MevStrategy::Flashbots), settings("arbitrum", MevStrategy::Bloxroute)],
            factory,
            &registry,
        )
        .await;
        assert!(result.success);
        assert_eq!(result.failed_chains.len(), 1);
        assert_eq!(result.failed_chains[0].0, "arbitrum");
        assert!(registry.get("polygon").is_some());
        assert!(registry.get("arbitrum").is_none());
    }

    #[tokio::test]
    async fn all_chains_failing_reports_aggregate_error() {
        let factory = Arc::new(FakeFactory {
            fail_chains: vec!["polygon".to_string(), "arbitrum".to_string()],
            cached: Mutex::new(vec![]),
            skip_cache_insert_for: vec![],
            calls: AtomicUsize::new(0),
        });
        let registry = MevRegistry::new();
        let result = init_mev(
            true,
            &[settings("polygon", MevStrategy::Flashbots), settings("arbitrum", MevStrategy::Bloxroute)],
            factory,
            &registry,
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("mev:all_providers_failed:2_attempted"));
    }
}
