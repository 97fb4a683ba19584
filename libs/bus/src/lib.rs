//! Streaming bus consumer/producer abstraction.
//!
//! The execution core only ever sees this trait: opportunities arrive via
//! `dequeue`, liveness is reported via `mark_active`/`mark_complete`, and the
//! message is finally acknowledged via `ack_message_after_execution` once the
//! lock result is determined. Detector wiring, transport, and serialization
//! on the wire are out of scope — this crate models only the consumer
//! contract the pipeline depends on.

mod fake;

pub use fake::FakeBus;

use async_trait::async_trait;
use serde::Serialize;
use types::{AckToken, BusMessage, Opportunity};

#[async_trait]
pub trait OpportunityBus: Send + Sync {
    /// Pop the next opportunity message, if any, without blocking.
    async fn dequeue(&self) -> Option<BusMessage<Opportunity>>;

    /// Number of messages currently queued (used by the pipeline's
    /// `processQueueItems` drain condition).
    fn queue_len(&self) -> usize;

    fn mark_active(&self, opportunity_id: &str);
    fn mark_complete(&self, opportunity_id: &str);

    /// Ack the underlying message after the lock result is determined
    /// (success, execution_error, or crash-recovery retry completion). Never
    /// called on `redis_error`.
    async fn ack_message_after_execution(&self, token: &AckToken);

    async fn publish_result(&self, topic: &str, payload: &(dyn erased_serde::Serialize + Sync));

    /// Re-enqueue an opportunity, used by the circuit-breaker gate.
    fn requeue(&self, message: BusMessage<Opportunity>);
}

/// Minimal object-safe serialize trait so `publish_result` can take any
/// payload type without making `OpportunityBus` generic (object-safety is
/// required since the pipeline holds a `dyn OpportunityBus`).
pub mod erased_serde {
    pub trait Serialize {
        fn to_json(&self) -> serde_json::Value;
    }

    impl<T: super::Serialize> Serialize for T {
        fn to_json(&self) -> serde_json::Value {
            serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
        }
    }
}
