//! Provider health: the provider service's view of one chain's RPC client.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub last_check_ms: u64,
    pub consecutive_failures: u32,
    pub average_latency_ms: f64,
    pub success_rate: f64,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            last_check_ms: 0,
            consecutive_failures: 0,
            average_latency_ms: 0.0,
            success_rate: 1.0,
        }
    }
}
