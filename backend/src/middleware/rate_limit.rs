//! Per-origin request budgets backed by KV counters.
//!
//! Each budget is a counter keyed by `(bucket, ip, minute-window)` with a TTL
//! one window long. The `auth` bucket guards login/refresh; everything else
//! shares the `general` bucket.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AppError;
use crate::state::AppState;
use crate::utils::time::{minute_window, seconds_until_next_window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    General,
    Auth,
}

impl Bucket {
    fn as_str(&self) -> &'static str {
        match self {
            Bucket::General => "general",
            Bucket::Auth => "auth",
        }
    }

    fn budget(&self, state: &AppState) -> u32 {
        match self {
            Bucket::General => state.config.rate_limit_general_per_min,
            Bucket::Auth => state.config.rate_limit_auth_per_min,
        }
    }
}

/// Best-effort client address: proxy headers first, then the socket peer.
pub fn client_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        })
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

async fn enforce(state: &AppState, ip: &str, bucket: Bucket) -> Result<(), AppError> {
    let now = Utc::now();
    let key = format!(
        "ratelimit:{}:{}:{}",
        bucket.as_str(),
        ip,
        minute_window(now)
    );

    let count = match crate::services::kv::incr_with_retry(
        state.kv.as_ref(),
        &key,
        Duration::from_secs(60),
    )
    .await
    {
        Ok(count) => count,
        Err(err) => {
            // KV outage: admit the request rather than taking the API down.
            tracing::warn!(%ip, bucket = bucket.as_str(), "rate limit KV unavailable: {err:#}");
            return Ok(());
        }
    };

    let budget = bucket.budget(state).max(1) as i64;
    if count > budget {
        return Err(AppError::RateLimited {
            retry_after: seconds_until_next_window(now).max(1),
        });
    }
    Ok(())
}

pub async fn general_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(&request);
    enforce(&state, &ip, Bucket::General).await?;
    Ok(next.run(request).await)
}

pub async fn auth_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(&request);
    enforce(&state, &ip, Bucket::Auth).await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    fn request_with_header(name: &str, value: &str) -> Request {
        HttpRequest::builder()
            .uri("/")
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let request = request_with_header("x-forwarded-for", "203.0.113.7, 10.0.0.1");
        assert_eq!(client_ip(&request), "203.0.113.7");
    }

    #[test]
    fn real_ip_is_a_fallback() {
        let request = request_with_header("x-real-ip", "198.51.100.2");
        assert_eq!(client_ip(&request), "198.51.100.2");
    }

    #[test]
    fn missing_ip_sources_collapse_to_unknown() {
        let request = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_ip(&request), "unknown");
    }

    #[test]
    fn connect_info_is_used_when_headers_are_absent() {
        let mut request = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("192.0.2.5:443".parse().unwrap()));
        assert_eq!(client_ip(&request), "192.0.2.5");
    }
}
