//! An in-process lock store used by unit/integration tests to exercise the
//! execution pipeline's locking behaviour without a live Redis instance.

use crate::{LockOutcome, LockStore, LockStoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use types::LockRecord;

struct Entry {
    holder: String,
    acquired_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }
}

/// Single-writer-discipline in-memory lock table. Optionally simulates a
/// store outage so tests can exercise the `redis_error` path.
pub struct InMemoryLockStore {
    locks: Mutex<HashMap<String, Entry>>,
    simulate_outage: std::sync::atomic::AtomicBool,
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            simulate_outage: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_outage(&self, outage: bool) {
        self.simulate_outage
            .store(outage, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn snapshot(&self, resource: &str) -> Option<LockRecord> {
        let locks = self.locks.lock().unwrap();
        locks.get(resource).map(|e| LockRecord {
            resource: resource.to_string(),
            holder: e.holder.clone(),
            acquired_at_ms: 0,
            ttl_ms: e.ttl.as_millis() as u64,
        })
    }

    fn outage(&self) -> bool {
        self.simulate_outage.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(
        &self,
        resource: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LockOutcome, LockStoreError> {
        if self.outage() {
            return Err(LockStoreError::StoreUnavailable("simulated outage".into()));
        }
        let mut locks = self.locks.lock().unwrap();
        if let Some(existing) = locks.get(resource) {
            if !existing.is_expired() {
                return Ok(LockOutcome::NotAcquired);
            }
        }
        locks.insert(
            resource.to_string(),
            Entry {
                holder: holder.to_string(),
                acquired_at: Instant::now(),
                ttl,
            },
        );
        Ok(LockOutcome::Acquired)
    }

    async fn release(&self, resource: &str, holder: &str) -> Result<(), LockStoreError> {
        if self.outage() {
            return Err(LockStoreError::StoreUnavailable("simulated outage".into()));
        }
        let mut locks = self.locks.lock().unwrap();
        if let Some(existing) = locks.get(resource) {
            if existing.holder == holder {
                locks.remove(resource);
            }
        }
        Ok(())
    }

    async fn force_release(&self, resource: &str) -> Result<(), LockStoreError> {
        if self.outage() {
            return Err(LockStoreError::StoreUnavailable("simulated outage".into()));
        }
        self.locks.lock().unwrap().remove(resource);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_is_rejected_until_expiry_or_release() {
        let store = InMemoryLockStore::new();
        let outcome1 = store
            .try_acquire("opportunity:opp-1", "instance-a", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome1, LockOutcome::Acquired);

        let outcome2 = store
            .try_acquire("opportunity:opp-1", "instance-b", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome2, LockOutcome::NotAcquired);

        store.release("opportunity:opp-1", "instance-a").await.unwrap();

        let outcome3 = store
            .try_acquire("opportunity:opp-1", "instance-b", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome3, LockOutcome::Acquired);
    }

    #[tokio::test]
    async fn force_release_clears_any_holder() {
        let store = InMemoryLockStore::new();
        store
            .try_acquire("opportunity:opp-1", "instance-a", Duration::from_secs(5))
            .await
            .unwrap();
        store.force_release("opportunity:opp-1").await.unwrap();
        let outcome = store
            .try_acquire("opportunity:opp-1", "instance-b", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, LockOutcome::Acquired);
    }

    #[tokio::test]
    async fn outage_surfaces_as_store_unavailable() {
        let store = InMemoryLockStore::new();
        store.set_outage(true);
        let err = store
            .try_acquire("opportunity:opp-1", "instance-a", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LockStoreError::StoreUnavailable(_)));
    }
}
