//! Bridge router initialization: the final ordered sub-initializer, built
//! from the provider map assembled by MEV init.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeProtocol {
    NativeBridge,
    Aggregator,
}

#[derive(Debug, Clone, Default)]
pub struct BridgeInitResult {
    pub success: bool,
    pub available_protocols: Vec<BridgeProtocol>,
    pub chain_keys: Vec<String>,
    pub error: Option<String>,
}

/// Requires at least one provider chain; otherwise fails with
/// `bridge-router:no_providers`.
pub fn init_bridge(provider_chains: &[String]) -> BridgeInitResult {
    if provider_chains.is_empty() {
        return BridgeInitResult { success: false, error: Some("bridge-router:no_providers".to_string()), ..BridgeInitResult::default() };
    }

    BridgeInitResult {
        success: true,
        available_protocols: vec![BridgeProtocol::NativeBridge, BridgeProtocol::Aggregator],
        chain_keys: provider_chains.to_vec(),
        error: None,
    }
}
