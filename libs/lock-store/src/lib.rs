//! Distributed lock store: SET-NX-style lock with
//! TTL and force-release, backing the execution pipeline's at-most-once
//! guarantee across instances.

mod memory;
mod redis_store;

pub use memory::InMemoryLockStore;
pub use redis_store::RedisLockStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a lock acquisition attempt, mirrored 1:1 onto the discriminants
/// the execution pipeline's lock-guard step switches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    NotAcquired,
}

#[derive(Debug, Error)]
pub enum LockStoreError {
    /// The lock store itself is unreachable. The pipeline must not ack and
    /// must not execute when it sees this: treat `redis_error` uniformly
    /// as do not ack, do not execute.
    #[error("lock store unavailable: {0}")]
    StoreUnavailable(String),
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Acquire `resource` for `holder` with `ttl`, zero retries.
    async fn try_acquire(
        &self,
        resource: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LockOutcome, LockStoreError>;

    /// Release `resource` only if currently held by `holder`.
    async fn release(&self, resource: &str, holder: &str) -> Result<(), LockStoreError>;

    /// Force-release regardless of holder, used for stale-lock crash
    /// recovery.
    async fn force_release(&self, resource: &str) -> Result<(), LockStoreError>;
}
