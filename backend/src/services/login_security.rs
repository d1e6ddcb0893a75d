//! Failed-login accounting and lockout windows, backed by KV counters.

use std::sync::Arc;
use std::time::Duration;

use crate::services::kv::{incr_with_retry, KvStore};

pub struct LoginSecurity {
    kv: Arc<dyn KvStore>,
    threshold: u32,
    window: Duration,
}

fn identity_key(identity: &str) -> String {
    format!("attempts:{}", identity.to_ascii_lowercase())
}

fn origin_key(ip: &str) -> String {
    format!("attempts_ip:{}", ip)
}

impl LoginSecurity {
    pub fn new(kv: Arc<dyn KvStore>, threshold: u32, window: Duration) -> Self {
        Self {
            kv,
            threshold: threshold.max(1),
            window,
        }
    }

    /// Records a failed attempt against both the identity and the origin IP.
    /// Returns the identity's attempt count inside the current window.
    pub async fn record_failure(&self, identity: &str, ip: &str) -> anyhow::Result<i64> {
        let attempts =
            incr_with_retry(self.kv.as_ref(), &identity_key(identity), self.window).await?;
        incr_with_retry(self.kv.as_ref(), &origin_key(ip), self.window).await?;
        if attempts >= self.threshold as i64 {
            tracing::warn!(identity, attempts, "login lockout engaged");
        }
        Ok(attempts)
    }

    /// When locked, returns the retry-after interval (remaining window TTL).
    pub async fn is_locked(&self, identity: &str) -> anyhow::Result<Option<u64>> {
        let key = identity_key(identity);
        let attempts: i64 = self
            .kv
            .get(&key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if attempts < self.threshold as i64 {
            return Ok(None);
        }
        let retry_after = self
            .kv
            .ttl(&key)
            .await?
            .map(|ttl| ttl.as_secs())
            .unwrap_or_else(|| self.window.as_secs())
            .max(1);
        Ok(Some(retry_after))
    }

    /// On successful login both counters are dropped.
    pub async fn clear(&self, identity: &str, ip: &str) -> anyhow::Result<()> {
        self.kv.del(&identity_key(identity)).await?;
        self.kv.del(&origin_key(ip)).await?;
        Ok(())
    }
}
