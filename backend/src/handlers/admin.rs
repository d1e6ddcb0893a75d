//! Company-scoped user administration. Routed behind the admin guard.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use validator::Validate;

use crate::error::AppError;
use crate::middleware::auth::AuthedUser;
use crate::models::user::{CreateUserRequest, User, UserResponse, UserRole};
use crate::repositories;
use crate::services::authority;
use crate::services::broadcast::CloseReason;
use crate::state::AppState;
use crate::types::UserId;
use crate::utils::password::{hash_password, validate_password_strength};

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    payload.validate().map_err(|errors| {
        AppError::Validation(
            errors
                .field_errors()
                .keys()
                .map(|field| format!("{} is invalid", field))
                .collect(),
        )
    })?;

    if payload.role == UserRole::SuperAdmin {
        authority::require_super_admin(&authed.user)?;
    }

    // Everyone but a super admin creates inside their own company.
    let company_id = if authed.user.is_super_admin() {
        payload.company_id
    } else {
        authed.user.company_id
    };
    if payload.role != UserRole::SuperAdmin && company_id.is_none() {
        return Err(AppError::InvariantViolation(
            "A company is required for this role".to_string(),
        ));
    }

    if let Some(company_id) = company_id {
        let company = repositories::company::find_by_id(&state.pool, company_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Company not found".to_string()))?;
        if !company.is_operational() {
            return Err(AppError::InvariantViolation(
                "Company is not operational".to_string(),
            ));
        }
        let seats = repositories::user::count_in_company(&state.pool, company_id).await?;
        if seats >= company.max_users as i64 {
            return Err(AppError::InvariantViolation(
                "Company user limit reached".to_string(),
            ));
        }
    }

    validate_password_strength(&payload.password, state.config.password_min_length)
        .map_err(AppError::WeakPassword)?;
    let password_hash = hash_password(&payload.password)?;

    let user = User::new(
        company_id,
        payload.email.to_ascii_lowercase(),
        password_hash,
        payload.name,
        payload.role,
    );
    let created = repositories::user::insert(&state.pool, &user)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                AppError::InvariantViolation("Email is already registered".to_string())
            } else {
                AppError::from(err)
            }
        })?;

    tracing::info!(user_id = %created.id, by = %authed.user.id, "user created");
    Ok(Json(UserResponse::from(created)))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let users = repositories::user::list_scoped(&state.pool, authed.scope).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Soft-deactivation: the account keeps its history but can no longer
/// authenticate. All refresh sessions are revoked and live connections are
/// closed immediately.
pub async fn deactivate_user(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Value>, AppError> {
    if user_id == authed.user.id {
        return Err(AppError::InvariantViolation(
            "Cannot deactivate your own account".to_string(),
        ));
    }

    let deactivated =
        repositories::user::deactivate_scoped(&state.pool, user_id, authed.scope).await?;
    if !deactivated {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    let now = Utc::now();
    let jtis = repositories::session::revoke_all_for_user(&state.pool, user_id, now).await?;
    for jti in jtis {
        state
            .revocation
            .revoke(&jti, Duration::from_secs(state.config.refresh_ttl_seconds))
            .await
            .map_err(AppError::Transient)?;
    }
    state
        .broadcaster
        .close_user(user_id, CloseReason::Revoked);

    tracing::info!(%user_id, by = %authed.user.id, "user deactivated");
    Ok(Json(json!({ "message": "User deactivated" })))
}
