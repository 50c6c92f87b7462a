//! Audit log, system log and compliance report handlers.

use crate::api::extract::{AuthUser, ClientIp};
use crate::audit::{AuditEvent, actions};
use crate::db::{AuditLog, ComplianceReport, SystemLog};
use crate::error::ApiError;
use crate::models::{AuditLogQuery, ComplianceReportRequest, SystemLogQuery};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;

/// Audit trail entries, newest first.
///
/// Traders see their own entries; admins see every entry.
#[utoipa::path(
    get,
    path = "/api/v1/audit/logs",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Audit entries", body = Vec<AuditLog>),
        (status = 403, description = "Entries of other users require admin")
    ),
    tag = "Audit"
)]
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Vec<AuditLog>>, ApiError> {
    state.audit.logs(&user, &query).await.map(Json)
}

/// Service event log, newest first (admin only).
#[utoipa::path(
    get,
    path = "/api/v1/audit/system-logs",
    params(SystemLogQuery),
    responses(
        (status = 200, description = "System log entries", body = Vec<SystemLog>),
        (status = 403, description = "Admin role required")
    ),
    tag = "Audit"
)]
pub async fn list_system_logs(
    State(state): State<Arc<AppState>>,
    admin: AuthUser,
    Query(query): Query<SystemLogQuery>,
) -> Result<Json<Vec<SystemLog>>, ApiError> {
    admin.require_admin()?;
    Ok(Json(state.audit.system_logs(&query)))
}

/// Compliance reports visible to the caller, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/audit/compliance-reports",
    responses(
        (status = 200, description = "Compliance reports", body = Vec<ComplianceReport>)
    ),
    tag = "Audit"
)]
pub async fn list_compliance_reports(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Json<Vec<ComplianceReport>> {
    Json(state.audit.reports(&user))
}

/// Generate a compliance report for a date range.
#[utoipa::path(
    post,
    path = "/api/v1/audit/compliance-reports",
    request_body = ComplianceReportRequest,
    responses(
        (status = 201, description = "Report generated", body = ComplianceReport),
        (status = 400, description = "Invalid period"),
        (status = 403, description = "Reports on other users require admin"),
        (status = 404, description = "User not found")
    ),
    tag = "Audit"
)]
pub async fn generate_compliance_report(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Json(request): Json<ComplianceReportRequest>,
) -> Result<(StatusCode, Json<ComplianceReport>), ApiError> {
    let report = state.audit.generate_report(&user, &request).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::REPORT_GENERATED, "compliance_report")
                .user(user.id)
                .resource(report.id)
                .details(json!({
                    "user_id": report.user_id,
                    "period_start": report.period_start,
                    "period_end": report.period_end,
                }))
                .ip(ip),
        )
        .await;
    Ok((StatusCode::CREATED, Json(report)))
}
