//! Token revocation set. Revoked JTIs are tombstoned in the KV for the
//! remainder of the token's natural lifetime, after which the expiry check
//! makes the tombstone redundant.

use std::sync::Arc;
use std::time::Duration;

use crate::services::kv::KvStore;

pub struct RevocationService {
    kv: Arc<dyn KvStore>,
}

fn revoked_key(jti: &str) -> String {
    format!("revoked:{}", jti)
}

impl RevocationService {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn revoke(&self, jti: &str, ttl: Duration) -> anyhow::Result<()> {
        let span = tracing::debug_span!("kv_revoke_token", jti);
        let _enter = span.enter();
        // A zero TTL would be an immediate no-op key; pin a floor of 1s so
        // tokens revoked in their final second still hit the tombstone.
        let ttl = ttl.max(Duration::from_secs(1));
        self.kv.set_ex(&revoked_key(jti), "1", ttl).await
    }

    pub async fn is_revoked(&self, jti: &str) -> anyhow::Result<bool> {
        self.kv.exists(&revoked_key(jti)).await
    }
}
