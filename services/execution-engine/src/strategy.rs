//! The external strategy interface the pipeline delegates trade construction
//! and submission to: strategy-specific logic is an external collaborator,
//! and the pipeline only races it against a timeout and records the outcome.

use async_trait::async_trait;
use rust_decimal::Decimal;
use types::Opportunity;

#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub success: bool,
    pub actual_profit: Option<Decimal>,
    pub gas_cost: Option<Decimal>,
    pub error: Option<String>,
}

impl StrategyOutcome {
    pub fn success(actual_profit: Decimal, gas_cost: Decimal) -> Self {
        Self { success: true, actual_profit: Some(actual_profit), gas_cost: Some(gas_cost), error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, actual_profit: None, gas_cost: None, error: Some(error.into()) }
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    async fn execute(&self, opportunity: &Opportunity) -> StrategyOutcome;
}
