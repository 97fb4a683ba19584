//! The `Opportunity` entity: a candidate arbitrage emitted by a detector.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of arbitrage opportunity, as emitted by the detector layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    IntraChain,
    CrossChain,
    FlashLoan,
    Backrun,
    UniswapX,
    Statistical,
    Simulation,
}

/// A chain identifier. Kept as a newtype over `String` rather than an enum
/// so new chains can be onboarded purely through configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Chain(pub String);

impl Chain {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for Chain {
    fn from(s: &str) -> Self {
        Chain(s.to_string())
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A DEX identifier (e.g. `uniswap_v3`, `sushiswap`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dex(pub String);

impl From<&str> for Dex {
    fn from(s: &str) -> Self {
        Dex(s.to_string())
    }
}

/// One hop of an opportunity's trade path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathHop {
    pub dex: Dex,
    pub token_in: String,
    pub token_out: String,
    pub pool_address: String,
}

/// Candidate arbitrage, owned by the execution pipeline only for the
/// duration of execution; destroyed after the bus message is acked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub kind: OpportunityKind,
    pub buy_chain: Chain,
    pub sell_chain: Option<Chain>,
    pub buy_dex: Dex,
    pub sell_dex: Dex,
    pub path: Vec<PathHop>,
    pub expected_profit: Decimal,
    pub created_at_ms: u64,
}

impl Opportunity {
    /// An empty buy chain is the one universally-rejected shape: reject
    /// before touching any strategy or lock.
    pub fn has_valid_buy_chain(&self) -> bool {
        !self.buy_chain.is_empty()
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opp(buy_chain: &str) -> Opportunity {
        Opportunity {
            id: "opp-1".into(),
            kind: OpportunityKind::IntraChain,
            buy_chain: Chain::from(buy_chain),
            sell_chain: None,
            buy_dex: Dex::from("uniswap_v3"),
            sell_dex: Dex::from("sushiswap"),
            path: vec![],
            expected_profit: Decimal::new(100, 0),
            created_at_ms: 0,
        }
    }

    #[test]
    fn empty_buy_chain_is_invalid() {
        assert!(!opp("").has_valid_buy_chain());
        assert!(opp("ethereum").has_valid_buy_chain());
    }

    #[test]
    fn age_is_monotonic_against_now() {
        let o = opp("ethereum");
        assert_eq!(o.age_ms(500), 500);
    }
}
