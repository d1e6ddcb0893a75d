//! Refresh session models. One row per live refresh token.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct RefreshSession {
    /// JTI of the currently valid refresh token for this session. Replaced in
    /// place on rotation.
    pub jti: String,
    pub user_id: UserId,
    /// sha256 of user-agent + client IP captured at login.
    pub client_fingerprint: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Listing view returned by `GET /api/auth/sessions`.
pub struct SessionResponse {
    pub jti: String,
    pub client_fingerprint: String,
    pub issued_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<RefreshSession> for SessionResponse {
    fn from(session: RefreshSession) -> Self {
        SessionResponse {
            jti: session.jti,
            client_fingerprint: session.client_fingerprint,
            issued_at: session.issued_at,
            last_used_at: session.last_used_at,
            expires_at: session.expires_at,
        }
    }
}
