//! Environment-driven configuration, loaded once at startup.

use std::env;
use std::time::Duration;

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Feature flags gating optional strategy families.
#[derive(Debug, Clone)]
pub struct FeatureFlags {
    pub solana_execution: bool,
    pub statistical_arb: bool,
    pub backrun_strategy: bool,
    pub use_flash_loan_aggregator: bool,
    pub use_dest_chain_flash_loan: bool,
    pub uniswapx_filler: bool,
}

impl FeatureFlags {
    pub fn from_env() -> Self {
        Self {
            solana_execution: env_flag("FEATURE_SOLANA_EXECUTION", false),
            statistical_arb: env_flag("FEATURE_STATISTICAL_ARB", false),
            backrun_strategy: env_flag("FEATURE_BACKRUN_STRATEGY", false),
            use_flash_loan_aggregator: env_flag("FEATURE_USE_FLASH_LOAN_AGGREGATOR", false),
            use_dest_chain_flash_loan: env_flag("FEATURE_USE_DEST_CHAIN_FLASH_LOAN", false),
            uniswapx_filler: env_flag("FEATURE_UNISWAPX_FILLER", false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionEngineConfig {
    pub anvil_port: u16,
    pub eth_rpc_url: Option<String>,
    pub max_concurrent_executions: usize,
    pub execution_timeout: Duration,
    pub max_cb_reenqueue_attempts: u32,
    pub lock_ttl: Duration,
    pub lock_conflict_threshold: u32,
    pub mev_protection_enabled: bool,
    pub risk_enabled: bool,
    pub risk_force_enabled: bool,
    pub is_production: bool,
    pub features: FeatureFlags,
}

impl ExecutionEngineConfig {
    pub fn from_env() -> Self {
        Self {
            anvil_port: env::var("ANVIL_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8546),
            eth_rpc_url: env::var("ETH_RPC_URL").ok(),
            max_concurrent_executions: env_usize("MAX_CONCURRENT_EXECUTIONS", 10),
            execution_timeout: Duration::from_secs(env_u64("EXECUTION_TIMEOUT_SECS", 55)),
            max_cb_reenqueue_attempts: 3,
            lock_ttl: Duration::from_secs(env_u64("LOCK_TTL_SECS", 30)),
            lock_conflict_threshold: env_u64("LOCK_CONFLICT_THRESHOLD", 3) as u32,
            mev_protection_enabled: env_flag("MEV_PROTECTION_ENABLED", true),
            risk_enabled: env_flag("RISK_ENABLED", true),
            risk_force_enabled: env_flag("RISK_FORCE_ENABLED", false),
            is_production: env_flag("IS_PRODUCTION", false),
            features: FeatureFlags::from_env(),
        }
    }
}

impl Default for ExecutionEngineConfig {
    fn default() -> Self {
        Self {
            anvil_port: 8546,
            eth_rpc_url: None,
            max_concurrent_executions: 10,
            execution_timeout: Duration::from_secs(55),
            max_cb_reenqueue_attempts: 3,
            lock_ttl: Duration::from_secs(30),
            lock_conflict_threshold: 3,
            mev_protection_enabled: true,
            risk_enabled: true,
            risk_force_enabled: false,
            is_production: false,
            features: FeatureFlags {
                solana_execution: false,
                statistical_arb: false,
                backrun_strategy: false,
                use_flash_loan_aggregator: false,
                use_dest_chain_flash_loan: false,
                uniswapx_filler: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = ExecutionEngineConfig::default();
        assert_eq!(config.anvil_port, 8546);
        assert_eq!(config.execution_timeout, Duration::from_secs(55));
        assert_eq!(config.max_cb_reenqueue_attempts, 3);
    }
}
