//! Promise-valued standby-to-active activation, triggered by the external
//! coordinator's failover signal.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

#[async_trait]
pub trait LeadershipService: Send + Sync {
    async fn acquire_leadership(&self) -> Result<bool, String>;
    fn clear_standby(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationOutcome {
    pub became_leader: bool,
    pub error: Option<String>,
}

impl ActivationOutcome {
    fn rejected(reason: &str) -> Self {
        Self { became_leader: false, error: Some(reason.to_string()) }
    }
}

/// Coalesces concurrent activation attempts into one in-flight call; later
/// callers await the same outcome as the first.
pub struct StandbyActivation {
    is_leader: AtomicBool,
    in_standby: AtomicBool,
    capable_of_leading: AtomicBool,
    in_flight: RwLock<Option<Arc<OnceCell<ActivationOutcome>>>>,
}

impl StandbyActivation {
    pub fn new(in_standby: bool, capable_of_leading: bool) -> Self {
        Self {
            is_leader: AtomicBool::new(false),
            in_standby: AtomicBool::new(in_standby),
            capable_of_leading: AtomicBool::new(capable_of_leading),
            in_flight: RwLock::new(None),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub async fn activate(&self, leadership: Arc<dyn LeadershipService>) -> ActivationOutcome {
        if self.is_leader.load(Ordering::SeqCst) {
            return ActivationOutcome::rejected("standby:already_leader");
        }
        if !self.in_standby.load(Ordering::SeqCst) {
            return ActivationOutcome::rejected("standby:not_in_standby");
        }
        if !self.capable_of_leading.load(Ordering::SeqCst) {
            return ActivationOutcome::rejected("standby:not_capable");
        }

        let cell = {
            let mut guard = self.in_flight.write();
            if guard.is_none() {
                *guard = Some(Arc::new(OnceCell::new()));
            }
            guard.as_ref().unwrap().clone()
        };

        let outcome = cell
            .get_or_init(|| async {
                match leadership.acquire_leadership().await {
                    Ok(true) => {
                        self.is_leader.store(true, Ordering::SeqCst);
                        self.in_standby.store(false, Ordering::SeqCst);
                        leadership.clear_standby();
                        ActivationOutcome { became_leader: true, error: None }
                    }
                    Ok(false) => ActivationOutcome::rejected("standby:leadership_not_granted"),
                    Err(e) => ActivationOutcome::rejected(&format!("standby:{e}")),
                }
            })
            .await
            .clone();

        *self.in_flight.write() = None;

        outcome
    }
}
