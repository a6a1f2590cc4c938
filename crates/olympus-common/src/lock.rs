//! Distributed locks with a bounded lease.
//!
//! A lease is never extended: once its TTL passes, another holder may
//! acquire the same key even if the first one is still working.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis;
use rand::Rng;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{AppError, AppResult};
use crate::utils::random_hex;

/// Proof of ownership of a lock key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub token: String,
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Wait until `key` can be owned, holding it for at most `ttl`
    async fn acquire(&self, key: &str, ttl: Duration) -> AppResult<LockLease>;

    /// Give up a lease. Releasing an expired lease is a no-op.
    async fn release(&self, lease: LockLease) -> AppResult<()>;
}

/// Run `f` while holding `key`.
///
/// The lease is released once `f` completes. A failing release is only
/// logged, the TTL reclaims the key in that case.
pub async fn with_lock<L, F, Fut, T>(lock: &L, key: &str, ttl: Duration, f: F) -> AppResult<T>
where
    L: DistributedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let lease = lock.acquire(key, ttl).await?;
    tracing::trace!("Acquired lock {}", key);

    let value = f().await;

    if let Err(e) = lock.release(lease).await {
        tracing::warn!("Failed to release lock {}: {}", key, e);
    }
    Ok(value)
}

/// Compare-and-delete, so a holder whose lease expired cannot free someone
/// else's lock.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock held in Redis with `SET NX PX`
#[derive(Clone)]
pub struct RedisLock {
    pool: deadpool_redis::Pool,
    retry_count: u32,
    retry_delay: Duration,
    retry_jitter: Duration,
}

impl RedisLock {
    pub fn new(pool: deadpool_redis::Pool, retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            pool,
            retry_count,
            retry_delay,
            retry_jitter: retry_delay / 2,
        }
    }

    fn lock_key(key: &str) -> String {
        format!("lock:{}", key)
    }

    fn backoff(&self) -> Duration {
        let jitter_ms = self.retry_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.retry_delay + Duration::from_millis(jitter)
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> AppResult<LockLease> {
        let lock_key = Self::lock_key(key);
        let token = random_hex(16);

        for attempt in 0..=self.retry_count {
            let mut conn = self.pool.get().await?;
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&lock_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(&mut *conn)
                .await?;
            drop(conn);

            if acquired.is_some() {
                return Ok(LockLease {
                    key: lock_key,
                    token,
                });
            }

            if attempt < self.retry_count {
                tokio::time::sleep(self.backoff()).await;
            }
        }

        Err(AppError::LockError(format!(
            "Could not acquire {} after {} attempts",
            key,
            self.retry_count + 1
        )))
    }

    async fn release(&self, lease: LockLease) -> AppResult<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("EVAL")
            .arg(RELEASE_SCRIPT)
            .arg(1)
            .arg(&lease.key)
            .arg(&lease.token)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }
}

/// In-process lock for a single daemon or for tests.
///
/// TTLs are not enforced; the lease lasts until released.
#[derive(Default, Clone)]
pub struct LocalLock {
    keys: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    held: Arc<Mutex<HashMap<String, OwnedMutexGuard<()>>>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn acquire(&self, key: &str, _ttl: Duration) -> AppResult<LockLease> {
        let mutex = {
            let mut keys = self.keys.lock().await;
            keys.entry(key.to_string()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;

        let token = random_hex(16);
        self.held.lock().await.insert(token.clone(), guard);
        Ok(LockLease {
            key: key.to_string(),
            token,
        })
    }

    async fn release(&self, lease: LockLease) -> AppResult<()> {
        let guard = self.held.lock().await.remove(&lease.token);
        drop(guard);

        // forget the key once nobody holds or waits for it
        let mut keys = self.keys.lock().await;
        if keys
            .get(&lease.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            keys.remove(&lease.key);
        }
        Ok(())
    }
}
