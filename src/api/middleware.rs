//! API middleware for rate limiting and host filtering.

use crate::api::extract::authenticate;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Extensions, HeaderMap, HeaderValue, Request, header::HOST},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Header name for API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Authenticated callers get this multiple of the anonymous limit.
const AUTHENTICATED_LIMIT_FACTOR: u32 = 4;

/// Anonymous key prefix for rate limiting unauthenticated requests.
const ANONYMOUS_KEY_PREFIX: &str = "anon_";

/// Paths that are never rate limited.
const EXEMPT_PATHS: &[&str] = &["/health", "/api/v1/ws/health"];

/// Rate limiting middleware.
///
/// Authenticated callers are limited per user, everyone else per client
/// address. Returns 429 Too Many Requests when the one-minute window is
/// full and adds rate limit headers to every other response.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let anonymous_limit = state.config.server.rate_limit_per_minute;
    let (key_id, rate_limit) = match authenticate(&state, request.headers()) {
        Ok(user) => (
            format!("user_{}", user.id),
            anonymous_limit.saturating_mul(AUTHENTICATED_LIMIT_FACTOR),
        ),
        Err(_) => (
            format!(
                "{}{}",
                ANONYMOUS_KEY_PREFIX,
                client_ip(
                    request.headers(),
                    peer_addr(request.extensions()),
                    state.config.server.trust_proxy_headers,
                )
                .unwrap_or_else(|| "unknown".to_string())
            ),
            anonymous_limit,
        ),
    };

    let reset = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + 60;

    let Some(remaining) = state.rate_limiter.check_and_record(&key_id, rate_limit) else {
        return ApiError::RateLimitExceeded {
            limit: rate_limit,
            remaining: 0,
            reset,
            retry_after: 60,
        }
        .into_response();
    };

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(rate_limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(reset));
    response
}

/// Rejects requests whose `Host` header is not in `server.allowed_hosts`.
///
/// An empty list accepts every host. Ports are ignored.
pub async fn allowed_hosts_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let allowed = &state.config.server.allowed_hosts;
    if allowed.is_empty() || allowed.iter().any(|h| h == "*") {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_ascii_lowercase());
    match host {
        Some(host) if allowed.iter().any(|a| a.eq_ignore_ascii_case(&host)) => {
            next.run(request).await
        }
        _ => ApiError::InvalidRequest("host not allowed".to_string()).into_response(),
    }
}

/// Socket address of the connected peer, when the server records it.
pub fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Client address used for rate limiting and audit records.
///
/// Proxy headers are honoured only when `trust_proxy` is set; otherwise the
/// peer address is used so clients cannot pick their own key.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy: bool,
) -> Option<String> {
    if trust_proxy && let Some(ip) = forwarded_ip(headers) {
        return Some(ip);
    }
    peer.map(|addr| addr.ip().to_string())
}

/// Client address from `X-Forwarded-For` or `X-Real-IP`.
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("X-Forwarded-For")
        && let Ok(value) = forwarded.to_str()
        && let Some(ip) = value.split(',').next()
        && !ip.trim().is_empty()
    {
        return Some(ip.trim().to_string());
    }

    if let Some(real_ip) = headers.get("X-Real-IP")
        && let Ok(value) = real_ip.to_str()
    {
        return Some(value.trim().to_string());
    }

    None
}
