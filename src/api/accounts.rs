//! Registration, login and profile handlers.

use crate::api::extract::{AuthUser, ClientIp, authenticate};
use crate::audit::{AuditEvent, actions};
use crate::db::{User, UserRole};
use crate::error::ApiError;
use crate::models::{
    ApiKeyResponse, LoginRequest, LoginResponse, MessageResponse, RegisterRequest,
    UpdateProfileRequest,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Authentication
// ============================================================================

/// Register a new account.
///
/// The first account may register as admin; afterwards only an admin may
/// create admin accounts.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = User),
        (status = 400, description = "Invalid fields"),
        (status = 409, description = "Username or email taken")
    ),
    tag = "Auth"
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    if request.role == Some(UserRole::Admin) && state.store.user_count() > 0 {
        let caller = authenticate(&state, &headers)?;
        AuthUser(caller).require_admin()?;
    }

    let user = state.accounts.register(request).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::REGISTER, "user")
                .user(user.id)
                .resource(user.id)
                .details(json!({ "username": user.username, "role": user.role }))
                .ip(ip),
        )
        .await;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Log in and receive a session token.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 423, description = "Account locked")
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    match state.accounts.login(&request.username, &request.password).await {
        Ok(session) => {
            state
                .audit
                .record(
                    AuditEvent::new(actions::LOGIN, "user")
                        .user(session.user.id)
                        .resource(session.user.id)
                        .ip(ip),
                )
                .await;
            Ok(Json(LoginResponse {
                token: session.token,
                expires_at: session.expires_at,
                user: session.user,
            }))
        }
        Err(err) => {
            let action = match &err {
                ApiError::AccountLocked(_) => actions::ACCOUNT_LOCKED,
                _ => actions::LOGIN_FAILED,
            };
            let known = state
                .store
                .find_user(|u| u.username == request.username)
                .map(|u| u.id);
            let mut event = AuditEvent::new(action, "user")
                .details(json!({ "username": request.username }))
                .ip(ip);
            if let Some(user_id) = known {
                event = event.user(user_id).resource(user_id);
            }
            state.audit.record(event).await;
            Err(err)
        }
    }
}

/// End the current session.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "Auth"
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
) -> Result<Json<MessageResponse>, ApiError> {
    state.accounts.logout(user.id).await?;
    state
        .audit
        .record(AuditEvent::new(actions::LOGOUT, "user").user(user.id).ip(ip))
        .await;
    Ok(Json(MessageResponse::new("logged out")))
}

/// Issue a new API key, replacing the previous one.
#[utoipa::path(
    post,
    path = "/api/v1/auth/api-key",
    responses(
        (status = 200, description = "API key issued", body = ApiKeyResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "Auth"
)]
pub async fn generate_api_key(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let key = state.accounts.generate_api_key(user.id).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::API_KEY_GENERATED, "user")
                .user(user.id)
                .resource(user.id)
                .details(json!({ "expires_at": key.expires_at }))
                .ip(ip),
        )
        .await;
    Ok(Json(key))
}

// ============================================================================
// Profile
// ============================================================================

/// Get the caller's profile.
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Profile", body = User),
        (status = 401, description = "Not authenticated")
    ),
    tag = "Users"
)]
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<User>, ApiError> {
    state.accounts.get(user.id).map(Json)
}

/// Update the caller's profile.
#[utoipa::path(
    put,
    path = "/api/v1/users/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = User),
        (status = 400, description = "Invalid fields"),
        (status = 409, description = "Email taken")
    ),
    tag = "Users"
)]
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<User>, ApiError> {
    let details = json!({
        "email": request.email.is_some(),
        "phone": request.phone.is_some(),
        "max_daily_loss": request.max_daily_loss,
        "max_position_size": request.max_position_size,
    });
    let updated = state.accounts.update_profile(user.id, request).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::PROFILE_UPDATED, "user")
                .user(user.id)
                .resource(user.id)
                .details(details)
                .ip(ip),
        )
        .await;
    Ok(Json(updated))
}

/// Unlock an account locked by failed logins (admin only).
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/unlock",
    params(
        ("id" = Uuid, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Account unlocked", body = User),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "User not found")
    ),
    tag = "Users"
)]
pub async fn unlock_user(
    State(state): State<Arc<AppState>>,
    admin: AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, ApiError> {
    admin.require_admin()?;
    let user = state.accounts.unlock(id).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::ACCOUNT_UNLOCKED, "user")
                .user(admin.0.id)
                .resource(id)
                .ip(ip),
        )
        .await;
    Ok(Json(user))
}
