use chrono::Utc;
use sqlx::PgPool;

use crate::models::user::{CompanyScope, User};
use crate::types::{CompanyId, UserId};

const SELECT_COLUMNS: &str =
    "id, company_id, email, password_hash, name, role, is_active, created_at, updated_at";

/// Finds a user by their email (the login identity).
pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {SELECT_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await
}

/// Finds a user by their ID.
pub async fn find_by_id(pool: &PgPool, user_id: UserId) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {SELECT_COLUMNS} FROM users WHERE id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Finds a user visible under the caller's tenancy scope.
pub async fn find_scoped(
    pool: &PgPool,
    user_id: UserId,
    scope: CompanyScope,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {SELECT_COLUMNS} FROM users WHERE id = $1 \
         AND ($2::uuid IS NULL OR company_id = $2)"
    ))
    .bind(user_id)
    .bind(scope.company_id())
    .fetch_optional(pool)
    .await
}

pub async fn insert(pool: &PgPool, user: &User) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, company_id, email, password_hash, name, role, is_active, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {SELECT_COLUMNS}"
    ))
    .bind(user.id)
    .bind(user.company_id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.name)
    .bind(user.role)
    .bind(user.is_active)
    .bind(user.created_at)
    .bind(user.updated_at)
    .fetch_one(pool)
    .await
}

/// Lists users under the caller's scope, newest first.
pub async fn list_scoped(pool: &PgPool, scope: CompanyScope) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {SELECT_COLUMNS} FROM users \
         WHERE ($1::uuid IS NULL OR company_id = $1) \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(scope.company_id())
    .fetch_all(pool)
    .await
}

/// Soft-deactivates a user within the caller's scope. Returns `false` when no
/// visible row matched.
pub async fn deactivate_scoped(
    pool: &PgPool,
    user_id: UserId,
    scope: CompanyScope,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users SET is_active = FALSE, updated_at = $3 \
         WHERE id = $1 AND ($2::uuid IS NULL OR company_id = $2)",
    )
    .bind(user_id)
    .bind(scope.company_id())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Replaces the stored hash; used for the transparent re-hash on login when
/// hashing parameters have been raised.
pub async fn update_password_hash(
    pool: &PgPool,
    user_id: UserId,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3")
        .bind(password_hash)
        .bind(Utc::now())
        .bind(user_id)
        .execute(pool)
        .await
        .map(|_| ())
}

/// Seat count used to enforce the company's `max_users` limit.
pub async fn count_in_company(pool: &PgPool, company_id: CompanyId) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE company_id = $1")
        .bind(company_id)
        .fetch_one(pool)
        .await
}
