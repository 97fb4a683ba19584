//! Gas baseline entry retained in the gas-price optimizer's ring buffer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasBaselineEntry {
    pub price_gwei: f64,
    pub timestamp_ms: u64,
}
