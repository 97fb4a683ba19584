//! Per-chain risk state: drawdown machine, loss streak, win-probability
//! histogram. The histogram and streak live here as plain data; the state
//! machine transitions themselves are owned by `libs/risk`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawdownState {
    Normal,
    Caution,
    Halt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub drawdown: DrawdownState,
    pub consecutive_losses: u32,
    /// Per-strategy win histogram: strategy name -> (wins, total), bounded
    /// and time-windowed by the owning component.
    pub win_histogram: HashMap<String, (u32, u32)>,
}

impl Default for RiskState {
    fn default() -> Self {
        Self {
            drawdown: DrawdownState::Normal,
            consecutive_losses: 0,
            win_histogram: HashMap::new(),
        }
    }
}

impl RiskState {
    pub fn record_outcome(&mut self, strategy: &str, won: bool) {
        let entry = self.win_histogram.entry(strategy.to_string()).or_insert((0, 0));
        entry.1 += 1;
        if won {
            entry.0 += 1;
            self.consecutive_losses = 0;
        } else {
            self.consecutive_losses += 1;
        }
    }

    pub fn win_probability(&self, strategy: &str) -> Option<f64> {
        self.win_histogram
            .get(strategy)
            .filter(|(_, total)| *total > 0)
            .map(|(wins, total)| *wins as f64 / *total as f64)
    }
}
