//! Error types for the REST API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;


/// API error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
}

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    /// Field name (dotted for nested settings keys).
    pub field: String,
    /// What is wrong with the value.
    pub message: String,
}

impl FieldError {
    /// Creates a new field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validation error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ValidationErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
    /// Offending fields.
    pub fields: Vec<FieldError>,
}

/// Risk rejection response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct RiskRejectedResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
    /// Violated risk rules.
    pub violations: Vec<String>,
}

/// Rate limit error response body.
#[derive(Debug, Serialize)]
pub struct RateLimitErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
    /// Maximum requests allowed.
    pub limit: u32,
    /// Remaining requests.
    pub remaining: u32,
    /// Unix timestamp when the rate limit resets.
    pub reset: u64,
    /// Seconds until reset.
    pub retry_after: u64,
}

/// API error types.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// User not found.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Strategy not found.
    #[error("Strategy not found: {0}")]
    StrategyNotFound(Uuid),

    /// Symbol not found.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// No option chain available for the underlying.
    #[error("Option chain not found: {0}")]
    ChainNotFound(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// One or more fields failed validation.
    #[error("Validation failed: {}", format_fields(.0))]
    Validation(Vec<FieldError>),

    /// Order rejected by the risk engine.
    #[error("Order rejected by risk checks: {}", .0.join("; "))]
    RiskRejected(Vec<String>),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Account locked after repeated login failures.
    #[error("Account locked until {0}")]
    AccountLocked(DateTime<Utc>),

    /// Resource already exists or state conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Service temporarily unable to accept the request.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded {
        /// Maximum requests allowed.
        limit: u32,
        /// Remaining requests (always 0 when exceeded).
        remaining: u32,
        /// Unix timestamp when the rate limit resets.
        reset: u64,
        /// Seconds until reset.
        retry_after: u64,
    },
}

fn format_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ApiError {
    /// Shorthand for a single-field validation error.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Validation(vec![FieldError::new(field, message)])
    }

    /// Returns the HTTP status and machine-readable code for this error.
    #[must_use]
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::UserNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            ApiError::StrategyNotFound(_) => (StatusCode::NOT_FOUND, "STRATEGY_NOT_FOUND"),
            ApiError::SymbolNotFound(_) => (StatusCode::NOT_FOUND, "SYMBOL_NOT_FOUND"),
            ApiError::ChainNotFound(_) => (StatusCode::NOT_FOUND, "CHAIN_NOT_FOUND"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::RiskRejected(_) => (StatusCode::UNPROCESSABLE_ENTITY, "RISK_REJECTED"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::AccountLocked(_) => (StatusCode::LOCKED, "ACCOUNT_LOCKED"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            ApiError::RateLimitExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        match self {
            ApiError::RateLimitExceeded {
                limit,
                remaining,
                reset,
                retry_after,
            } => {
                let body = Json(RateLimitErrorResponse {
                    error: "Rate limit exceeded".to_string(),
                    code: code.to_string(),
                    limit,
                    remaining,
                    reset,
                    retry_after,
                });

                (
                    status,
                    [
                        ("X-RateLimit-Limit", limit.to_string()),
                        ("X-RateLimit-Remaining", remaining.to_string()),
                        ("X-RateLimit-Reset", reset.to_string()),
                        ("Retry-After", retry_after.to_string()),
                    ],
                    body,
                )
                    .into_response()
            }
            ApiError::Validation(ref fields) => {
                let body = Json(ValidationErrorResponse {
                    error: self.to_string(),
                    code: code.to_string(),
                    fields: fields.clone(),
                });
                (status, body).into_response()
            }
            ApiError::RiskRejected(ref violations) => {
                let body = Json(RiskRejectedResponse {
                    error: self.to_string(),
                    code: code.to_string(),
                    violations: violations.clone(),
                });
                (status, body).into_response()
            }
            _ => {
                let body = Json(ErrorResponse {
                    error: self.to_string(),
                    code: code.to_string(),
                });

                (status, body).into_response()
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(err.to_string())
    }
}
