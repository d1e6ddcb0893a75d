use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use validator::Validate;

use crate::{
    error::AppError,
    middleware::auth::AuthedUser,
    models::session::{RefreshSession, SessionResponse},
    models::user::{LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, UserResponse},
    repositories,
    state::AppState,
    utils::{
        jwt::{issue_pair, verify_token, TokenKind},
        password::{password_needs_rehash, verify_password},
        security::ClientMeta,
    },
};

fn bad_credentials() -> AppError {
    AppError::Unauthenticated("Invalid email or password".to_string())
}

fn invalid_refresh() -> AppError {
    AppError::Unauthenticated("Invalid or expired refresh token".to_string())
}

fn validation_errors(errors: validator::ValidationErrors) -> AppError {
    AppError::Validation(
        errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors
                    .iter()
                    .map(move |error| format!("{}: {}", field, error.code))
            })
            .collect(),
    )
}

pub async fn login(
    State(state): State<AppState>,
    client: ClientMeta,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    payload.validate().map_err(validation_errors)?;

    if let Some(retry_after) = state
        .login_security
        .is_locked(&payload.email)
        .await
        .map_err(AppError::Transient)?
    {
        return Err(AppError::AccountLocked { retry_after });
    }

    let user = repositories::user::find_by_email(&state.pool, &payload.email).await?;
    let Some(user) = user.filter(|u| u.is_active) else {
        state
            .login_security
            .record_failure(&payload.email, &client.ip)
            .await
            .map_err(AppError::Transient)?;
        return Err(bad_credentials());
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        let attempts = state
            .login_security
            .record_failure(&payload.email, &client.ip)
            .await
            .map_err(AppError::Transient)?;
        tracing::info!(user_id = %user.id, attempts, "failed login attempt");
        return Err(bad_credentials());
    }

    if let Some(company_id) = user.company_id {
        let company = repositories::company::find_by_id(&state.pool, company_id)
            .await?
            .ok_or_else(bad_credentials)?;
        if !company.is_operational() {
            return Err(AppError::Forbidden("Account unavailable".to_string()));
        }
    }

    if password_needs_rehash(&user.password_hash) {
        match crate::utils::password::hash_password(&payload.password) {
            Ok(new_hash) => {
                repositories::user::update_password_hash(&state.pool, user.id, &new_hash).await?;
            }
            Err(err) => tracing::warn!(user_id = %user.id, "password re-hash failed: {err:#}"),
        }
    }

    state
        .login_security
        .clear(&payload.email, &client.ip)
        .await
        .map_err(AppError::Transient)?;

    let pair = issue_pair(
        &user,
        &state.config.signing_key,
        state.config.access_ttl_seconds,
        state.config.refresh_ttl_seconds,
    )?;

    let now = Utc::now();
    let session = RefreshSession {
        jti: pair.refresh_claims.jti.clone(),
        user_id: user.id,
        client_fingerprint: client.fingerprint(),
        issued_at: now,
        expires_at: Utc
            .timestamp_opt(pair.refresh_claims.exp, 0)
            .single()
            .unwrap_or(now),
        last_used_at: now,
        revoked_at: None,
    };
    repositories::session::insert(&state.pool, &session).await?;

    tracing::info!(user_id = %user.id, "login succeeded");
    Ok(Json(LoginResponse {
        access_token: pair.access,
        refresh_token: pair.refresh,
        user: UserResponse::from(user),
    }))
}

/// Rotation: the old refresh jti is tombstoned for its remaining lifetime and
/// the session row swaps onto the new jti in one statement. A second use of
/// the old token fails both checks.
pub async fn refresh(
    State(state): State<AppState>,
    client: ClientMeta,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let claims = verify_token(
        &payload.refresh_token,
        &state.config.signing_key,
        TokenKind::Refresh,
    )
    .map_err(|_| invalid_refresh())?;

    if state
        .revocation
        .is_revoked(&claims.jti)
        .await
        .map_err(AppError::Transient)?
    {
        return Err(invalid_refresh());
    }

    let user = repositories::user::find_by_id(&state.pool, claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(invalid_refresh)?;

    let pair = issue_pair(
        &user,
        &state.config.signing_key,
        state.config.access_ttl_seconds,
        state.config.refresh_ttl_seconds,
    )?;

    let now = Utc::now();
    let new_expiry = Utc
        .timestamp_opt(pair.refresh_claims.exp, 0)
        .single()
        .unwrap_or(now);
    let rotated = repositories::session::rotate(
        &state.pool,
        &claims.jti,
        &pair.refresh_claims.jti,
        &client.fingerprint(),
        now,
        new_expiry,
    )
    .await?;
    if !rotated {
        return Err(invalid_refresh());
    }

    state
        .revocation
        .revoke(&claims.jti, Duration::from_secs(claims.remaining_ttl()))
        .await
        .map_err(AppError::Transient)?;

    Ok(Json(LoginResponse {
        access_token: pair.access,
        refresh_token: pair.refresh,
        user: UserResponse::from(user),
    }))
}

/// Revokes the presented access token and the caller's refresh session(s).
/// Live connections carrying the access jti fall on the next heartbeat tick.
pub async fn logout(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Json(payload): Json<LogoutRequest>,
) -> Result<Json<Value>, AppError> {
    let now = Utc::now();
    state
        .revocation
        .revoke(
            &authed.claims.jti,
            Duration::from_secs(authed.claims.remaining_ttl()),
        )
        .await
        .map_err(AppError::Transient)?;

    match payload.refresh_token.as_deref() {
        Some(refresh_token) => {
            let claims = verify_token(
                refresh_token,
                &state.config.signing_key,
                TokenKind::Refresh,
            )
            .map_err(|_| invalid_refresh())?;
            if claims.sub != authed.user.id {
                return Err(invalid_refresh());
            }
            repositories::session::revoke_for_user(&state.pool, &claims.jti, authed.user.id, now)
                .await?;
            state
                .revocation
                .revoke(&claims.jti, Duration::from_secs(claims.remaining_ttl()))
                .await
                .map_err(AppError::Transient)?;
        }
        None => {
            let jtis =
                repositories::session::revoke_all_for_user(&state.pool, authed.user.id, now)
                    .await?;
            for jti in jtis {
                state
                    .revocation
                    .revoke(
                        &jti,
                        Duration::from_secs(state.config.refresh_ttl_seconds),
                    )
                    .await
                    .map_err(AppError::Transient)?;
            }
        }
    }

    Ok(Json(json!({ "message": "Logged out" })))
}

pub async fn me(Extension(authed): Extension<AuthedUser>) -> Json<UserResponse> {
    Json(UserResponse::from(authed.user))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
) -> Result<Json<Vec<SessionResponse>>, AppError> {
    let sessions =
        repositories::session::list_active_for_user(&state.pool, authed.user.id, Utc::now())
            .await?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedUser>,
    Path(jti): Path<String>,
) -> Result<Json<Value>, AppError> {
    let revoked =
        repositories::session::revoke_for_user(&state.pool, &jti, authed.user.id, Utc::now())
            .await?;
    if !revoked {
        return Err(AppError::NotFound("Session not found".to_string()));
    }
    state
        .revocation
        .revoke(&jti, Duration::from_secs(state.config.refresh_ttl_seconds))
        .await
        .map_err(AppError::Transient)?;
    Ok(Json(json!({ "message": "Session revoked" })))
}
