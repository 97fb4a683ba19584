//! Pending swap intent consumed by the pending-state simulator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DexKind {
    UniswapV2,
    UniswapV3Single,
    UniswapV3Multi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSwapIntent {
    pub tx_hash: String,
    pub router: String,
    pub dex_kind: DexKind,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub expected_amount_out: Decimal,
    /// For `UniswapV3Multi`, alternating `token(20) | fee(3) | token(20) | ...`.
    pub path: Vec<String>,
    pub slippage_tolerance_bps: u32,
    pub deadline: u64,
    pub sender: String,
    pub gas_limit: u64,
    pub gas_price_wei: u128,
    pub nonce: u64,
    pub chain_id: u64,
    pub fee_bps: Option<u32>,
    pub is_native_input: Option<bool>,
}

impl PendingSwapIntent {
    /// The token pairs this swap touches; a multi-hop V3 path touches every
    /// consecutive pair along the route, a single-hop swap touches exactly
    /// `(token_in, token_out)`.
    pub fn touched_pairs(&self) -> Vec<(String, String)> {
        if self.path.len() >= 2 {
            self.path
                .windows(2)
                .map(|w| (w[0].clone(), w[1].clone()))
                .collect()
        } else {
            vec![(self.token_in.clone(), self.token_out.clone())]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(path: Vec<&str>) -> PendingSwapIntent {
        PendingSwapIntent {
            tx_hash: "0xdead".into(),
            router: "0xrouter".into(),
            dex_kind: DexKind::UniswapV2,
            token_in: "WETH".into(),
            token_out: "USDC".into(),
            amount_in: Decimal::ONE,
            expected_amount_out: Decimal::ONE,
            path: path.into_iter().map(String::from).collect(),
            slippage_tolerance_bps: 50,
            deadline: 0,
            sender: "0xsender".into(),
            gas_limit: 300_000,
            gas_price_wei: 30_000_000_000,
            nonce: 0,
            chain_id: 1,
            fee_bps: Some(30),
            is_native_input: Some(false),
        }
    }

    #[test]
    fn single_hop_falls_back_to_token_in_out() {
        let i = intent(vec![]);
        assert_eq!(i.touched_pairs(), vec![("WETH".into(), "USDC".into())]);
    }

    #[test]
    fn multi_hop_yields_consecutive_pairs() {
        let i = intent(vec!["A", "B", "C"]);
        assert_eq!(
            i.touched_pairs(),
            vec![("A".into(), "B".into()), ("B".into(), "C".into())]
        );
    }
}
