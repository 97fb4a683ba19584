//! In-process bus double used by execution-pipeline tests.

use crate::OpportunityBus;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use types::{AckToken, BusMessage, Opportunity};

#[derive(Default)]
struct Inner {
    queue: VecDeque<BusMessage<Opportunity>>,
    active: Vec<String>,
    complete: Vec<String>,
    acked: Vec<AckToken>,
    published: Vec<(String, serde_json::Value)>,
}

/// Records every call so tests can assert on exactly-once ack / exactly-one
/// strategy-call style invariants.
#[derive(Default)]
pub struct FakeBus {
    inner: Mutex<Inner>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: BusMessage<Opportunity>) {
        self.inner.lock().unwrap().queue.push_back(message);
    }

    pub fn acked(&self) -> Vec<AckToken> {
        self.inner.lock().unwrap().acked.clone()
    }

    pub fn active_calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().active.clone()
    }

    pub fn complete_calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().complete.clone()
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.inner.lock().unwrap().published.clone()
    }
}

#[async_trait]
impl OpportunityBus for FakeBus {
    async fn dequeue(&self) -> Option<BusMessage<Opportunity>> {
        self.inner.lock().unwrap().queue.pop_front()
    }

    fn queue_len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    fn mark_active(&self, opportunity_id: &str) {
        self.inner.lock().unwrap().active.push(opportunity_id.to_string());
    }

    fn mark_complete(&self, opportunity_id: &str) {
        self.inner.lock().unwrap().complete.push(opportunity_id.to_string());
    }

    async fn ack_message_after_execution(&self, token: &AckToken) {
        self.inner.lock().unwrap().acked.push(token.clone());
    }

    async fn publish_result(&self, topic: &str, payload: &(dyn crate::erased_serde::Serialize + Sync)) {
        self.inner
            .lock()
            .unwrap()
            .published
            .push((topic.to_string(), payload.to_json()));
    }

    fn requeue(&self, message: BusMessage<Opportunity>) {
        self.inner.lock().unwrap().queue.push_back(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{OpportunityKind, Chain, Dex};
    use rust_decimal::Decimal;

    fn msg(id: &str) -> BusMessage<Opportunity> {
        BusMessage {
            topic: "opportunities".into(),
            payload: Opportunity {
                id: id.to_string(),
                kind: OpportunityKind::IntraChain,
                buy_chain: Chain::from("ethereum"),
                sell_chain: None,
                buy_dex: Dex::from("uniswap_v3"),
                sell_dex: Dex::from("sushiswap"),
                path: vec![],
                expected_profit: Decimal::new(100, 0),
                created_at_ms: 0,
            },
            ack_token: AckToken(id.to_string()),
        }
    }

    #[tokio::test]
    async fn dequeue_is_fifo() {
        let bus = FakeBus::new();
        bus.push(msg("opp-1"));
        bus.push(msg("opp-2"));
        assert_eq!(bus.dequeue().await.unwrap().payload.id, "opp-1");
        assert_eq!(bus.dequeue().await.unwrap().payload.id, "opp-2");
        assert!(bus.dequeue().await.is_none());
    }
}
