//! Runtime settings handlers.

use crate::api::extract::{AuthUser, ClientIp};
use crate::audit::{AuditEvent, actions};
use crate::db::LogLevel;
use crate::error::ApiError;
use crate::models::{UpdateSettingsRequest, ValidateSettingsRequest, ValidationResult};
use crate::settings::{SettingField, SettingsSnapshot, SettingsVersion};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde_json::json;
use std::sync::Arc;

#[cfg(test)]
mod tests;

// ============================================================================
// Read
// ============================================================================

/// Current settings.
#[utoipa::path(
    get,
    path = "/api/v1/config",
    responses(
        (status = 200, description = "Current values and version", body = SettingsSnapshot)
    ),
    tag = "Configuration"
)]
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<SettingsSnapshot> {
    Json(state.settings.get())
}

/// Settings schema with kinds, rules and defaults.
#[utoipa::path(
    get,
    path = "/api/v1/config/schema",
    responses(
        (status = 200, description = "Settings schema", body = Vec<SettingField>)
    ),
    tag = "Configuration"
)]
pub async fn get_settings_schema(State(state): State<Arc<AppState>>) -> Json<Vec<SettingField>> {
    Json(state.settings.schema().to_vec())
}

/// Recorded setting versions, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/config/history",
    responses(
        (status = 200, description = "Settings history", body = Vec<SettingsVersion>)
    ),
    tag = "Configuration"
)]
pub async fn get_settings_history(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<Vec<SettingsVersion>> {
    Json(state.settings.history())
}

/// Check values against the schema without applying them.
#[utoipa::path(
    post,
    path = "/api/v1/config/validate",
    request_body = ValidateSettingsRequest,
    responses(
        (status = 200, description = "Validation outcome", body = ValidationResult)
    ),
    tag = "Configuration"
)]
pub async fn validate_settings(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(request): Json<ValidateSettingsRequest>,
) -> Json<ValidationResult> {
    let errors = match state.settings.validate(&request.values) {
        Ok(()) => Vec::new(),
        Err(ApiError::Validation(errors)) => errors,
        Err(other) => vec![crate::error::FieldError::new("values", other.to_string())],
    };
    Json(ValidationResult {
        valid: errors.is_empty(),
        errors,
    })
}

// ============================================================================
// Write
// ============================================================================

/// Apply new values (admin only).
#[utoipa::path(
    put,
    path = "/api/v1/config",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Updated values", body = SettingsSnapshot),
        (status = 400, description = "Unknown keys or invalid values"),
        (status = 403, description = "Admin role required")
    ),
    tag = "Configuration"
)]
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    admin: AuthUser,
    ClientIp(ip): ClientIp,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsSnapshot>, ApiError> {
    admin.require_admin()?;
    let keys: Vec<String> = request.values.keys().cloned().collect();
    let snapshot = state
        .settings
        .update(request.values, request.merge_strategy, Some(admin.0.id))?;
    state
        .audit
        .record(
            AuditEvent::new(actions::SETTINGS_UPDATED, "settings")
                .user(admin.0.id)
                .resource(snapshot.version)
                .details(json!({ "keys": keys, "merge_strategy": request.merge_strategy }))
                .ip(ip),
        )
        .await;
    Ok(Json(snapshot))
}

/// Restore every default (admin only).
#[utoipa::path(
    post,
    path = "/api/v1/config/reset",
    responses(
        (status = 200, description = "Default values", body = SettingsSnapshot),
        (status = 403, description = "Admin role required")
    ),
    tag = "Configuration"
)]
pub async fn reset_settings(
    State(state): State<Arc<AppState>>,
    admin: AuthUser,
    ClientIp(ip): ClientIp,
) -> Result<Json<SettingsSnapshot>, ApiError> {
    admin.require_admin()?;
    let snapshot = state.settings.reset(Some(admin.0.id));
    state
        .audit
        .record(
            AuditEvent::new(actions::SETTINGS_RESET, "settings")
                .user(admin.0.id)
                .resource(snapshot.version)
                .ip(ip),
        )
        .await;
    state
        .audit
        .system(
            LogLevel::Warn,
            "settings",
            format!("settings reset to defaults by {}", admin.0.username),
        )
        .await;
    Ok(Json(snapshot))
}
