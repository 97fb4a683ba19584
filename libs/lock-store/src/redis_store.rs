//! Redis-backed lock store: `SET resource holder NX PX ttl` for acquisition,
//! a compare-and-delete Lua script for holder-scoped release, and a plain
//! `DEL` for force-release (crash recovery never needs to check the holder).

use crate::{LockOutcome, LockStore, LockStoreError};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

const RELEASE_IF_HOLDER_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisLockStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisLockStore {
    pub async fn connect(redis_url: &str) -> Result<Self, LockStoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| LockStoreError::StoreUnavailable(e.to_string()))?;
        let manager = client
            .get_tokio_connection_manager()
            .await
            .map_err(|e| LockStoreError::StoreUnavailable(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_acquire(
        &self,
        resource: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LockOutcome, LockStoreError> {
        let mut conn = self.manager.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(resource)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockStoreError::StoreUnavailable(e.to_string()))?;

        Ok(match result {
            Some(_) => LockOutcome::Acquired,
            None => LockOutcome::NotAcquired,
        })
    }

    async fn release(&self, resource: &str, holder: &str) -> Result<(), LockStoreError> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(RELEASE_IF_HOLDER_SCRIPT);
        script
            .key(resource)
            .arg(holder)
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| LockStoreError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn force_release(&self, resource: &str) -> Result<(), LockStoreError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(resource)
            .await
            .map_err(|e| LockStoreError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}
