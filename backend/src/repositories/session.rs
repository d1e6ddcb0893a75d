use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::session::RefreshSession;
use crate::types::UserId;

const SELECT_COLUMNS: &str =
    "jti, user_id, client_fingerprint, issued_at, expires_at, last_used_at, revoked_at";

pub async fn insert(pool: &PgPool, session: &RefreshSession) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO refresh_sessions \
            (jti, user_id, client_fingerprint, issued_at, expires_at, last_used_at, revoked_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&session.jti)
    .bind(session.user_id)
    .bind(&session.client_fingerprint)
    .bind(session.issued_at)
    .bind(session.expires_at)
    .bind(session.last_used_at)
    .bind(session.revoked_at)
    .execute(pool)
    .await
    .map(|_| ())
}

/// Fetches a session that is neither revoked nor expired.
pub async fn find_valid(
    pool: &PgPool,
    jti: &str,
    now: DateTime<Utc>,
) -> Result<Option<RefreshSession>, sqlx::Error> {
    sqlx::query_as::<_, RefreshSession>(&format!(
        "SELECT {SELECT_COLUMNS} FROM refresh_sessions \
         WHERE jti = $1 AND revoked_at IS NULL AND expires_at > $2"
    ))
    .bind(jti)
    .bind(now)
    .fetch_optional(pool)
    .await
}

/// Swaps the session onto a new jti in one statement, refreshing its
/// bookkeeping. Returns `false` when the old jti was already rotated,
/// revoked, or expired; the caller treats that as an invalid token.
pub async fn rotate(
    pool: &PgPool,
    old_jti: &str,
    new_jti: &str,
    client_fingerprint: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE refresh_sessions \
         SET jti = $2, client_fingerprint = $3, last_used_at = $4, expires_at = $5 \
         WHERE jti = $1 AND revoked_at IS NULL AND expires_at > $4",
    )
    .bind(old_jti)
    .bind(new_jti)
    .bind(client_fingerprint)
    .bind(now)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn revoke(pool: &PgPool, jti: &str, now: DateTime<Utc>) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE refresh_sessions SET revoked_at = $2 WHERE jti = $1 AND revoked_at IS NULL",
    )
    .bind(jti)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Revokes one session only when it belongs to the given user; keeps the
/// sessions API from revoking across accounts.
pub async fn revoke_for_user(
    pool: &PgPool,
    jti: &str,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE refresh_sessions SET revoked_at = $3 \
         WHERE jti = $1 AND user_id = $2 AND revoked_at IS NULL",
    )
    .bind(jti)
    .bind(user_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Revokes all of a user's sessions; returns the affected jtis so the caller
/// can tombstone them in the KV.
pub async fn revoke_all_for_user(
    pool: &PgPool,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "UPDATE refresh_sessions SET revoked_at = $2 \
         WHERE user_id = $1 AND revoked_at IS NULL \
         RETURNING jti",
    )
    .bind(user_id)
    .bind(now)
    .fetch_all(pool)
    .await
}

pub async fn list_active_for_user(
    pool: &PgPool,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<Vec<RefreshSession>, sqlx::Error> {
    sqlx::query_as::<_, RefreshSession>(&format!(
        "SELECT {SELECT_COLUMNS} FROM refresh_sessions \
         WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2 \
         ORDER BY last_used_at DESC, jti DESC"
    ))
    .bind(user_id)
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Purges rows that no longer gate anything: expired, or revoked long ago.
pub async fn delete_defunct(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM refresh_sessions \
         WHERE expires_at <= $1 OR revoked_at < $1 - INTERVAL '30 days'",
    )
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
