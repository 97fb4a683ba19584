//! Capital-risk components, each independently constructed so a partial
//! initialization failure still yields a usable set.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use types::{DrawdownState, RiskState};

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("invalid risk config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub enabled: bool,
    pub force_enabled: bool,
    pub is_production: bool,
    pub max_position_pct: Decimal,
    pub caution_drawdown_pct: Decimal,
    pub halt_drawdown_pct: Decimal,
    pub max_consecutive_losses: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            force_enabled: false,
            is_production: false,
            max_position_pct: Decimal::new(10, 0),
            caution_drawdown_pct: Decimal::new(5, 0),
            halt_drawdown_pct: Decimal::new(15, 0),
            max_consecutive_losses: 5,
        }
    }
}

fn validate_config(config: &RiskConfig) -> Result<(), RiskError> {
    if config.max_position_pct <= Decimal::ZERO || config.max_position_pct > Decimal::from(100) {
        return Err(RiskError::InvalidConfig("max_position_pct must be in (0, 100]".to_string()));
    }
    if config.caution_drawdown_pct >= config.halt_drawdown_pct {
        return Err(RiskError::InvalidConfig("caution_drawdown_pct must be less than halt_drawdown_pct".to_string()));
    }
    Ok(())
}

/// Per-strategy win/total histogram, backed by `types::RiskState`.
pub struct ProbabilityTracker {
    state: RwLock<RiskState>,
}

impl ProbabilityTracker {
    pub fn new() -> Self {
        Self { state: RwLock::new(RiskState::default()) }
    }

    pub fn record_outcome(&self, strategy: &str, won: bool) {
        self.state.write().record_outcome(strategy, won);
    }

    pub fn win_probability(&self, strategy: &str) -> Option<f64> {
        self.state.read().win_probability(strategy)
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.state.read().consecutive_losses
    }
}

impl Default for ProbabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// `EV = winProb * expectedProfit - (1 - winProb) * expectedLoss`, falling
/// back to a configured prior when a strategy has no recorded history.
pub struct EvCalculator {
    tracker: Arc<ProbabilityTracker>,
    prior_win_probability: f64,
}

impl EvCalculator {
    pub fn new(tracker: Arc<ProbabilityTracker>, prior_win_probability: f64) -> Self {
        Self { tracker, prior_win_probability }
    }

    pub fn expected_value(&self, strategy: &str, expected_profit: Decimal, expected_loss: Decimal) -> Decimal {
        let win_probability = self.tracker.win_probability(strategy).unwrap_or(self.prior_win_probability);
        let win_probability = Decimal::from_f64_retain(win_probability).unwrap_or(Decimal::new(5, 1));
        let lose_probability = Decimal::ONE - win_probability;
        win_probability * expected_profit - lose_probability * expected_loss
    }
}

/// Caps position size at a fraction of available capital, optionally
/// scaled down for unfavourable expected value.
pub struct PositionSizer {
    max_position_pct: Decimal,
}

impl PositionSizer {
    pub fn new(max_position_pct: Decimal) -> Self {
        Self { max_position_pct }
    }

    pub fn size_for(&self, available_capital: Decimal, expected_value: Decimal) -> Decimal {
        let cap = available_capital * self.max_position_pct / Decimal::from(100);
        if expected_value <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            cap
        }
    }
}

/// Tracks drawdown percentage and consecutive losses, escalating from
/// `Normal` to `Caution` to `Halt`.
pub struct DrawdownBreaker {
    caution_threshold: Decimal,
    halt_threshold: Decimal,
    max_consecutive_losses: u32,
    state: RwLock<DrawdownState>,
}

impl DrawdownBreaker {
    pub fn new(caution_threshold: Decimal, halt_threshold: Decimal, max_consecutive_losses: u32) -> Self {
        Self { caution_threshold, halt_threshold, max_consecutive_losses, state: RwLock::new(DrawdownState::Normal) }
    }

    pub fn state(&self) -> DrawdownState {
        *self.state.read()
    }

    pub fn update(&self, drawdown_pct: Decimal, consecutive_losses: u32) -> DrawdownState {
        let new_state = if drawdown_pct >= self.halt_threshold || consecutive_losses >= self.max_consecutive_losses {
            DrawdownState::Halt
        } else if drawdown_pct >= self.caution_threshold {
            DrawdownState::Caution
        } else {
            DrawdownState::Normal
        };
        *self.state.write() = new_state;
        new_state
    }
}

#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub allowed: bool,
    pub rejection_code: Option<String>,
}

impl RiskDecision {
    pub fn allow() -> Self {
        Self { allowed: true, rejection_code: None }
    }

    pub fn reject(code: impl Into<String>) -> Self {
        Self { allowed: false, rejection_code: Some(code.into()) }
    }
}

/// The four independently-constructed risk components, wired together for
/// the execution pipeline's per-opportunity assessment.
pub struct RiskOrchestrator {
    pub tracker: Arc<ProbabilityTracker>,
    pub ev_calculator: Arc<EvCalculator>,
    pub position_sizer: Arc<PositionSizer>,
    pub drawdown_breaker: Arc<DrawdownBreaker>,
}

impl RiskOrchestrator {
    pub fn assess(&self, strategy: &str) -> RiskDecision {
        if self.drawdown_breaker.state() == DrawdownState::Halt {
            return RiskDecision::reject("risk:halted");
        }
        if self.tracker.consecutive_losses() >= self.drawdown_breaker.max_consecutive_losses {
            return RiskDecision::reject("risk:max_consecutive_losses");
        }
        let _ = strategy;
        RiskDecision::allow()
    }
}

#[derive(Default)]
pub struct RiskInit {
    pub enabled: bool,
    pub tracker: Option<Arc<ProbabilityTracker>>,
    pub ev_calculator: Option<Arc<EvCalculator>>,
    pub position_sizer: Option<Arc<PositionSizer>>,
    pub drawdown_breaker: Option<Arc<DrawdownBreaker>>,
    pub orchestrator: Option<Arc<RiskOrchestrator>>,
    pub errors: Vec<String>,
}

/// Initializes the four risk components independently: a failure in one
/// does not prevent the others from becoming usable.
pub fn init_risk(config: &RiskConfig) -> Result<RiskInit, RiskError> {
    if !config.enabled && !config.force_enabled {
        return Ok(RiskInit { enabled: false, ..RiskInit::default() });
    }

    let mut config = config.clone();
    if let Err(e) = validate_config(&config) {
        if config.is_production {
            return Err(e);
        }
        warn!(error = %e, "risk config validation failed, continuing with defaults outside production");
        config.max_position_pct = RiskConfig::default().max_position_pct;
        config.caution_drawdown_pct = RiskConfig::default().caution_drawdown_pct;
        config.halt_drawdown_pct = RiskConfig::default().halt_drawdown_pct;
    }

    let mut init = RiskInit { enabled: true, ..RiskInit::default() };

    let tracker = Arc::new(ProbabilityTracker::new());
    init.tracker = Some(tracker.clone());

    init.ev_calculator = Some(Arc::new(EvCalculator::new(tracker.clone(), 0.5)));

    init.position_sizer = Some(Arc::new(PositionSizer::new(config.max_position_pct)));

    let breaker = Arc::new(DrawdownBreaker::new(config.caution_drawdown_pct, config.halt_drawdown_pct, config.max_consecutive_losses));
    init.drawdown_breaker = Some(breaker.clone());

    if let (Some(tracker), Some(ev_calculator), Some(position_sizer)) =
        (init.tracker.clone(), init.ev_calculator.clone(), init.position_sizer.clone())
    {
        init.orchestrator = Some(Arc::new(RiskOrchestrator { tracker, ev_calculator, position_sizer, drawdown_breaker: breaker }));
    }

    Ok(init)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_risk_yields_no_components() {
        let config = RiskConfig { enabled: false, force_enabled: false, ..RiskConfig::default() };
        let init = init_risk(&config).unwrap();
        assert!(!init.enabled);
        assert!(init.tracker.is_none());
    }

    #[test]
    fn production_rejects_invalid_config() {
        let config = RiskConfig { is_production: true, max_position_pct: Decimal::from(200), ..RiskConfig::default() };
        assert!(matches!(init_risk(&config), Err(RiskError::InvalidConfig(_))));
    }

    #[test]
    fn non_production_warns_and_continues_with_defaults() {
        let config = RiskConfig { is_production: false, max_position_pct: Decimal::from(200), ..RiskConfig::default() };
        let init = init_risk(&config).unwrap();
        assert!(init.enabled);
        assert!(init.position_sizer.is_some());
    }

    #[test]
    fn probability_tracker_tracks_win_rate_per_strategy() {
        let tracker = ProbabilityTracker::new();
        tracker.record_outcome("flash_arb", true);
        tracker.record_outcome("flash_arb", false);
        assert_eq!(tracker.win_probability("flash_arb"), Some(0.5));
    }

    #[test]
    fn ev_calculator_uses_prior_when_no_history() {
        let tracker = Arc::new(ProbabilityTracker::new());
        let ev = EvCalculator::new(tracker, 0.6);
        let value = ev.expected_value("new_strategy", Decimal::from(100), Decimal::from(50));
        // 0.6 * 100 - 0.4 * 50 = 40
        assert_eq!(value, Decimal::from(40));
    }

    #[test]
    fn position_sizer_returns_zero_for_non_positive_ev() {
        let sizer = PositionSizer::new(Decimal::from(10));
        assert_eq!(sizer.size_for(Decimal::from(1_000), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(sizer.size_for(Decimal::from(1_000), Decimal::from(1)), Decimal::from(100));
    }

    #[test]
    fn drawdown_breaker_escalates_through_states() {
        let breaker = DrawdownBreaker::new(Decimal::from(5), Decimal::from(15), 5);
        assert_eq!(breaker.update(Decimal::from(2), 0), DrawdownState::Normal);
        assert_eq!(breaker.update(Decimal::from(7), 0), DrawdownState::Caution);
        assert_eq!(breaker.update(Decimal::from(20), 0), DrawdownState::Halt);
    }

    #[test]
    fn drawdown_breaker_halts_on_consecutive_losses_even_without_drawdown() {
        let breaker = DrawdownBreaker::new(Decimal::from(5), Decimal::from(15), 3);
        assert_eq!(breaker.update(Decimal::ZERO, 3), DrawdownState::Halt);
    }

    #[test]
    fn orchestrator_rejects_when_halted() {
        let config = RiskConfig::default();
        let init = init_risk(&config).unwrap();
        init.drawdown_breaker.as_ref().unwrap().update(Decimal::from(100), 0);
        let decision = init.orchestrator.unwrap().assess("flash_arb");
        assert!(!decision.allowed);
        assert_eq!(decision.rejection_code.as_deref(), Some("risk:halted"));
    }
}
