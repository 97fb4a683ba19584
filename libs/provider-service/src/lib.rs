//! Per-chain RPC client registry with health checks and auto-reconnect.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use types::ProviderHealth;

const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_FAILURE_THRESHOLD: u32 = 3;

/// Abstraction over an RPC client good enough to validate connectivity; real
/// chain-specific clients (ethers `Provider<Http>`/`Provider<Ws>`, a Solana
/// RPC client, ...) implement this.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn get_block_number(&self) -> anyhow::Result<u64>;
}

/// Builds a fresh `ChainProvider` for a chain, used on reconnect.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create(&self, chain: &str) -> anyhow::Result<Arc<dyn ChainProvider>>;
}

/// Subscriber notified when a chain's provider is replaced after a
/// reconnect. The nonce manager is the canonical consumer — it must reset
/// its per-chain nonce cache whenever the underlying client changes.
pub trait ReconnectSubscriber: Send + Sync {
    fn on_reconnect(&self, chain: &str);
}

struct ChainEntry {
    provider: Arc<dyn ChainProvider>,
    wallet: String,
    health: ProviderHealth,
}

pub struct ProviderService {
    factory: Arc<dyn ProviderFactory>,
    chains: Arc<RwLock<HashMap<String, ChainEntry>>>,
    subscribers: Arc<RwLock<Vec<Arc<dyn ReconnectSubscriber>>>>,
    health_interval: Duration,
    reconnections: AtomicU64,
    health_task: RwLock<Option<JoinHandle<()>>>,
}

impl ProviderService {
    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            factory,
            chains: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            health_interval: DEFAULT_HEALTH_INTERVAL,
            reconnections: AtomicU64::new(0),
            health_task: RwLock::new(None),
        }
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn subscribe_reconnect(&self, subscriber: Arc<dyn ReconnectSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Validate connectivity for `chain` (a block-number read) and register
    /// its provider/wallet.
    pub async fn add_chain(&self, chain: &str, wallet: &str) -> anyhow::Result<()> {
        let provider = self.factory.create(chain).await?;
        provider.get_block_number().await?;
        self.chains.write().insert(
            chain.to_string(),
            ChainEntry {
                provider,
                wallet: wallet.to_string(),
                health: ProviderHealth::default(),
            },
        );
        Ok(())
    }

    pub fn get_provider(&self, chain: &str) -> Option<Arc<dyn ChainProvider>> {
        self.chains.read().get(chain).map(|e| e.provider.clone())
    }

    pub fn get_wallet(&self, chain: &str) -> Option<String> {
        self.chains.read().get(chain).map(|e| e.wallet.clone())
    }

    pub fn get_health(&self, chain: &str) -> Option<ProviderHealth> {
        self.chains.read().get(chain).map(|e| e.health.clone())
    }

    pub fn get_healthy_count(&self) -> usize {
        self.chains.read().values().filter(|e| e.health.healthy).count()
    }

    pub fn reconnection_count(&self) -> u64 {
        self.reconnections.load(Ordering::SeqCst)
    }

    /// Spawn the periodic health loop. Each tick reads the current block
    /// number per chain; after `RECONNECT_FAILURE_THRESHOLD` consecutive
    /// failures it rebuilds the client and, on success, resets the
    /// failure counter, bumps `reconnections`, and notifies subscribers.
    pub fn start_health_loop(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.health_interval);
            loop {
                interval.tick().await;
                this.run_health_tick().await;
            }
        });
        *self.health_task.write() = Some(handle);
    }

    async fn run_health_tick(self: &Arc<Self>) {
        let chain_names: Vec<String> = self.chains.read().keys().cloned().collect();
        for chain in chain_names {
            let provider = match self.chains.read().get(&chain).map(|e| e.provider.clone()) {
                Some(p) => p,
                None => continue,
            };

            match provider.get_block_number().await {
                Ok(_) => {
                    if let Some(entry) = self.chains.write().get_mut(&chain) {
                        entry.health.healthy = true;
                        entry.health.consecutive_failures = 0;
                    }
                }
                Err(e) => {
                    warn!(chain = %chain, error = %e, "provider health check failed");
                    let should_reconnect = {
                        let mut chains = self.chains.write();
                        if let Some(entry) = chains.get_mut(&chain) {
                            entry.health.consecutive_failures += 1;
                            entry.health.healthy = entry.health.consecutive_failures < RECONNECT_FAILURE_THRESHOLD;
                            entry.health.consecutive_failures >= RECONNECT_FAILURE_THRESHOLD
                        } else {
                            false
                        }
                    };

                    if should_reconnect {
                        self.reconnect(&chain).await;
                    }
                }
            }
        }
    }

    async fn reconnect(self: &Arc<Self>, chain: &str) {
        match self.factory.create(chain).await {
            Ok(fresh) => match fresh.get_block_number().await {
                Ok(_) => {
                    if let Some(entry) = self.chains.write().get_mut(chain) {
                        entry.provider = fresh;
                        entry.health.healthy = true;
                        entry.health.consecutive_failures = 0;
                    }
                    self.reconnections.fetch_add(1, Ordering::SeqCst);
                    info!(chain, "provider reconnected");
                    for sub in self.subscribers.read().iter() {
                        sub.on_reconnect(chain);
                    }
                }
                Err(e) => error!(chain, error = %e, "reconnect probe failed"),
            },
            Err(e) => error!(chain, error = %e, "reconnect failed to create client"),
        }
    }

    /// Cancel the health loop and drop all registered providers/wallets.
    pub fn shutdown(&self) {
        if let Some(handle) = self.health_task.write().take() {
            handle.abort();
        }
        self.chains.write().clear();
    }
}
