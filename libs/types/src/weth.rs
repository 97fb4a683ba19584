//! Per-chain native-wrapper ("WETH") registry.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct WethRegistry {
    by_chain: HashMap<String, String>,
}

impl WethRegistry {
    pub fn new() -> Self {
        let mut by_chain = HashMap::new();
        by_chain.insert("ethereum".to_string(), "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".to_string());
        by_chain.insert("polygon".to_string(), "0x0d500b1d8e8ef31e21c99d1db9a6444d3adf1270".to_string());
        by_chain.insert("arbitrum".to_string(), "0x82af49447d8a07e3bd95bd0d56f35241523fbab1".to_string());
        by_chain.insert("optimism".to_string(), "0x4200000000000000000000000000000000000006".to_string());
        by_chain.insert("base".to_string(), "0x4200000000000000000000000000000000000006".to_string());
        Self { by_chain }
    }

    pub fn native_wrapper(&self, chain: &str) -> Option<&str> {
        self.by_chain.get(chain).map(|s| s.as_str())
    }

    pub fn register(&mut self, chain: impl Into<String>, address: impl Into<String>) {
        self.by_chain.insert(chain.into(), address.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chains_resolve() {
        let reg = WethRegistry::new();
        assert!(reg.native_wrapper("ethereum").is_some());
        assert!(reg.native_wrapper("made_up_chain").is_none());
    }
}
