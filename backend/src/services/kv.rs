//! KV abstraction over Redis with an in-process fallback.
//!
//! Rate limits, login lockouts, and token revocation all go through this
//! seam. The Redis implementation is authoritative in multi-node
//! deployments; `MemoryKv` keeps a single node functional without Redis.

use async_trait::async_trait;
use bb8_redis::redis::AsyncCommands;
#[cfg(test)]
use mockall::automock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::db::redis::RedisPool;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increments a counter, attaching `ttl` when the key is
    /// created. Returns the post-increment value.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> anyhow::Result<i64>;
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
    /// Remaining TTL, `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> anyhow::Result<Option<Duration>>;
}

/// Counter increments are the only KV calls retried internally: bounded
/// attempts with exponential backoff and jitter, then the error surfaces.
pub async fn incr_with_retry(
    kv: &dyn KvStore,
    key: &str,
    ttl: Duration,
) -> anyhow::Result<i64> {
    const MAX_ATTEMPTS: u32 = 3;
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match kv.incr_with_ttl(key, ttl).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(key, attempt, "KV increment failed: {err:#}");
                last_err = Some(err);
                if attempt + 1 < MAX_ATTEMPTS {
                    let base = 50u64 << attempt;
                    let jitter = rand::thread_rng().gen_range(0..25);
                    tokio::time::sleep(Duration::from_millis(base + jitter)).await;
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt"))
}

pub struct RedisKv {
    pool: RedisPool,
}

impl RedisKv {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> anyhow::Result<i64> {
        let mut conn = self.pool.get().await?;
        let value: i64 = conn.incr(key, 1i64).await?;
        if value == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        }
        Ok(value)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn ttl(&self, key: &str) -> anyhow::Result<Option<Duration>> {
        let mut conn = self.pool.get().await?;
        let remaining: i64 = conn.ttl(key).await?;
        if remaining < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(remaining as u64)))
        }
    }
}

#[derive(Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-process KV with the same TTL semantics as the Redis implementation.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(entries: &mut HashMap<String, MemoryEntry>, now: Instant) {
        entries.retain(|_, entry| !entry.is_expired(now));
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> anyhow::Result<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge_expired(&mut entries, now);

        match entries.get_mut(key) {
            Some(entry) => {
                let current: i64 = entry.value.parse().unwrap_or(0);
                entry.value = (current + 1).to_string();
                Ok(current + 1)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: "1".to_string(),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge_expired(&mut entries, now);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn ttl(&self, key: &str) -> anyhow::Result<Option<Duration>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge_expired(&mut entries, now);
        Ok(entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}
