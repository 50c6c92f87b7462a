//! Request extractors for authenticated users and client addresses.

use crate::api::middleware::{API_KEY_HEADER, client_ip, peer_addr};
use crate::db::{User, UserRole};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::convert::Infallible;
use std::sync::Arc;

/// Bearer token of the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Value of the `X-API-Key` header.
pub fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// Resolves the caller from a bearer session token or an API key.
///
/// # Errors
/// Returns `Unauthorized` when no valid credential is present.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    if let Some(token) = bearer_token(headers) {
        return state.accounts.authenticate_session(token);
    }
    if let Some(key) = api_key(headers) {
        return state.accounts.authenticate_api_key(key);
    }
    Err(ApiError::Unauthorized(
        "missing bearer token or X-API-Key header".to_string(),
    ))
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    /// Fails unless the caller is an admin.
    ///
    /// # Errors
    /// Returns `Forbidden` for non-admins.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.role == UserRole::Admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden("admin role required".to_string()))
        }
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers).map(AuthUser)
    }
}

/// Client address: the peer socket, or proxy headers when trusted.
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub Option<String>);

impl FromRequestParts<Arc<AppState>> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(
            &parts.headers,
            peer_addr(&parts.extensions),
            state.config.server.trust_proxy_headers,
        )))
    }
}
