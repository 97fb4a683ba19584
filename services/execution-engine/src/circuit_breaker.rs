//! Per-chain circuit breaker gate consulted before locking.

use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    Closed,
    Open,
}

struct ChainCounters {
    state: ChainState,
    consecutive_failures: u32,
}

impl Default for ChainCounters {
    fn default() -> Self {
        Self { state: ChainState::Closed, consecutive_failures: 0 }
    }
}

/// Opens after `failure_threshold` consecutive failures on a chain; a single
/// success closes it again. This is deliberately simple: the execution
/// pipeline is the thing under test, not breaker tuning.
pub struct CircuitBreaker {
    failure_threshold: u32,
    chains: RwLock<HashMap<String, ChainCounters>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32) -> Self {
        Self { failure_threshold, chains: RwLock::new(HashMap::new()) }
    }

    pub fn can_execute(&self, chain: &str) -> bool {
        self.chains.read().get(chain).map(|c| c.state == ChainState::Closed).unwrap_or(true)
    }

    pub fn record_success(&self, chain: &str) {
        let mut chains = self.chains.write();
        let counters = chains.entry(chain.to_string()).or_default();
        counters.consecutive_failures = 0;
        counters.state = ChainState::Closed;
    }

    pub fn record_failure(&self, chain: &str) {
        let mut chains = self.chains.write();
        let counters = chains.entry(chain.to_string()).or_default();
        counters.consecutive_failures += 1;
        if counters.consecutive_failures >= self.failure_threshold {
            counters.state = ChainState::Open;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(3);
        assert!(cb.can_execute("ethereum"));
        cb.record_failure("ethereum");
        cb.record_failure("ethereum");
        assert!(cb.can_execute("ethereum"));
        cb.record_failure("ethereum");
        assert!(!cb.can_execute("ethereum"));
    }

    #[test]
    fn success_closes_the_breaker() {
        let cb = CircuitBreaker::new(2);
        cb.record_failure("ethereum");
        cb.record_failure("ethereum");
        assert!(!cb.can_execute("ethereum"));
        cb.record_success("ethereum");
        assert!(cb.can_execute("ethereum"));
    }
}
