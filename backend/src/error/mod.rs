use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Domain error taxonomy. Components return these; the boundary maps them to
/// HTTP statuses. Internal details are logged, never surfaced.
#[derive(Debug)]
pub enum AppError {
    /// No valid caller could be resolved from the request.
    Unauthenticated(String),
    /// Caller resolved but lacks authority or tenant scope.
    Forbidden(String),
    /// Target entity absent or invisible under the caller's scope.
    NotFound(String),
    /// A running entry already exists for the user.
    TimerAlreadyRunning,
    /// No running entry exists for the user.
    NoRunningTimer,
    /// Request would break a data-model invariant.
    InvariantViolation(String),
    /// Candidate password fails the strength policy.
    WeakPassword(Vec<String>),
    /// Too many failed logins; carries the remaining lock window in seconds.
    AccountLocked { retry_after: u64 },
    /// Request budget exceeded; carries the window remainder in seconds.
    RateLimited { retry_after: u64 },
    /// A derived duration came out negative.
    ClockSkew,
    /// Upstream store/KV failure that is safe to retry at the caller.
    Transient(anyhow::Error),
    BadRequest(String),
    Validation(Vec<String>),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code, details, retry_after) = match self {
            AppError::Unauthenticated(msg) => (
                StatusCode::UNAUTHORIZED,
                msg,
                "UNAUTHENTICATED".to_string(),
                None,
                None,
            ),
            AppError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, msg, "FORBIDDEN".to_string(), None, None)
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, msg, "NOT_FOUND".to_string(), None, None)
            }
            AppError::TimerAlreadyRunning => (
                StatusCode::CONFLICT,
                "A timer is already running for this user".to_string(),
                "TIMER_ALREADY_RUNNING".to_string(),
                None,
                None,
            ),
            AppError::NoRunningTimer => (
                StatusCode::CONFLICT,
                "No running timer for this user".to_string(),
                "NO_RUNNING_TIMER".to_string(),
                None,
                None,
            ),
            AppError::InvariantViolation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                "INVARIANT_VIOLATION".to_string(),
                None,
                None,
            ),
            AppError::WeakPassword(problems) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Password does not meet the strength policy".to_string(),
                "WEAK_PASSWORD".to_string(),
                Some(serde_json::json!({ "problems": problems })),
                None,
            ),
            AppError::AccountLocked { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Account temporarily locked after repeated failures".to_string(),
                "ACCOUNT_LOCKED".to_string(),
                Some(serde_json::json!({ "retry_after": retry_after })),
                Some(retry_after),
            ),
            AppError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please try again later.".to_string(),
                "RATE_LIMITED".to_string(),
                Some(serde_json::json!({ "retry_after": retry_after })),
                Some(retry_after),
            ),
            AppError::ClockSkew => {
                tracing::error!("Clock skew detected: derived duration is negative");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "CLOCK_SKEW".to_string(),
                    None,
                    None,
                )
            }
            AppError::Transient(err) => {
                tracing::warn!("Transient upstream error: {:?}", err);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Upstream temporarily unavailable".to_string(),
                    "TRANSIENT".to_string(),
                    None,
                    None,
                )
            }
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                msg,
                "BAD_REQUEST".to_string(),
                None,
                None,
            ),
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                "VALIDATION_ERROR".to_string(),
                Some(serde_json::json!({ "errors": errors })),
                None,
            ),
            AppError::InternalServerError(err) => {
                tracing::error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_SERVER_ERROR".to_string(),
                    None,
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code,
            details,
        });

        let mut response = (status, body).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => AppError::Transient(err.into()),
            _ => AppError::InternalServerError(err.into()),
        }
    }
}
