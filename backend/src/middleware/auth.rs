use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::models::user::{CompanyScope, User};
use crate::repositories;
use crate::state::AppState;
use crate::utils::jwt::{verify_token, Claims, TokenKind};

/// Resolved caller attached to the request after the guard runs. Handlers
/// read the scope from here; they never re-derive it.
#[derive(Clone)]
pub struct AuthedUser {
    pub user: User,
    pub claims: Claims,
    pub scope: CompanyScope,
}

fn bearer_token(request: &Request) -> Result<&str, AppError> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("Missing bearer token".to_string()))
}

/// Resolves the caller from the access token. Every failure collapses to
/// `Unauthenticated`; callers never learn which check rejected them.
pub async fn resolve_caller(state: &AppState, token: &str) -> Result<AuthedUser, AppError> {
    let claims = verify_token(token, &state.config.signing_key, TokenKind::Access)
        .map_err(|_| AppError::Unauthenticated("Invalid token".to_string()))?;

    if state
        .revocation
        .is_revoked(&claims.jti)
        .await
        .map_err(AppError::Transient)?
    {
        return Err(AppError::Unauthenticated("Invalid token".to_string()));
    }

    let user = repositories::user::find_by_id(&state.pool, claims.sub)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| AppError::Unauthenticated("Invalid token".to_string()))?;

    let scope = user.company_scope();
    Ok(AuthedUser {
        user,
        claims,
        scope,
    })
}

pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)?;
    let authed = resolve_caller(&state, token).await?;
    request.extensions_mut().insert(authed);
    Ok(next.run(request).await)
}

/// Guard for admin-only routes: auth plus an admin-role check.
pub async fn auth_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)?;
    let authed = resolve_caller(&state, token).await?;
    if !authed.user.is_admin() {
        return Err(AppError::Forbidden(
            "Administrator role required".to_string(),
        ));
    }
    request.extensions_mut().insert(authed);
    Ok(next.run(request).await)
}
