//! Execution result: the outcome reported back to the bus.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub opportunity_id: String,
    pub success: bool,
    pub actual_profit: Option<Decimal>,
    pub gas_cost: Option<Decimal>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failure(opportunity_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            opportunity_id: opportunity_id.into(),
            success: false,
            actual_profit: None,
            gas_cost: None,
            error: Some(error.into()),
        }
    }

    pub fn success(
        opportunity_id: impl Into<String>,
        actual_profit: Decimal,
        gas_cost: Decimal,
    ) -> Self {
        Self {
            opportunity_id: opportunity_id.into(),
            success: true,
            actual_profit: Some(actual_profit),
            gas_cost: Some(gas_cost),
            error: None,
        }
    }
}
