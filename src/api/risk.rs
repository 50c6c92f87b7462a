//! Risk settings, alert and metric handlers.

use crate::api::extract::{AuthUser, ClientIp};
use crate::audit::{AuditEvent, actions};
use crate::db::{RiskAlert, RiskSettings};
use crate::error::ApiError;
use crate::models::{AlertListQuery, UpdateRiskSettingsRequest};
use crate::risk::RiskMetrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Get the caller's risk settings.
#[utoipa::path(
    get,
    path = "/api/v1/risk/settings",
    responses(
        (status = 200, description = "Risk settings", body = RiskSettings)
    ),
    tag = "Risk"
)]
pub async fn get_risk_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Json<RiskSettings> {
    Json(state.risk.settings(user.id))
}

/// Update the caller's risk settings.
#[utoipa::path(
    put,
    path = "/api/v1/risk/settings",
    request_body = UpdateRiskSettingsRequest,
    responses(
        (status = 200, description = "Updated risk settings", body = RiskSettings),
        (status = 400, description = "Invalid limits")
    ),
    tag = "Risk"
)]
pub async fn update_risk_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Json(request): Json<UpdateRiskSettingsRequest>,
) -> Result<Json<RiskSettings>, ApiError> {
    let settings = state.risk.update(user.id, &request).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::RISK_SETTINGS_UPDATED, "risk_settings")
                .user(user.id)
                .resource(user.id)
                .details(json!(request))
                .ip(ip),
        )
        .await;
    Ok(Json(settings))
}

/// List the caller's risk alerts, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/risk/alerts",
    params(AlertListQuery),
    responses(
        (status = 200, description = "Risk alerts", body = Vec<RiskAlert>)
    ),
    tag = "Risk"
)]
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<AlertListQuery>,
) -> Json<Vec<RiskAlert>> {
    Json(state.risk.alerts(user.id, query.acknowledged))
}

/// Acknowledge a risk alert.
#[utoipa::path(
    post,
    path = "/api/v1/risk/alerts/{id}/acknowledge",
    params(
        ("id" = Uuid, Path, description = "Alert ID")
    ),
    responses(
        (status = 200, description = "Acknowledged alert", body = RiskAlert),
        (status = 403, description = "Alert belongs to another user"),
        (status = 404, description = "Alert not found")
    ),
    tag = "Risk"
)]
pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<RiskAlert>, ApiError> {
    let alert = state.risk.acknowledge(&user, id).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::ALERT_ACKNOWLEDGED, "risk_alert")
                .user(user.id)
                .resource(id)
                .ip(ip),
        )
        .await;
    Ok(Json(alert))
}

/// Current exposure and loss metrics of the caller.
#[utoipa::path(
    get,
    path = "/api/v1/risk/metrics",
    responses(
        (status = 200, description = "Risk metrics", body = RiskMetrics)
    ),
    tag = "Risk"
)]
pub async fn get_risk_metrics(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Json<RiskMetrics> {
    Json(state.risk.metrics(user.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AlertSeverity;
    use crate::test_support::{app_state, trader};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_update_settings_validates() {
        let state = app_state();
        let user = trader(&state, "alice").await;

        let result = update_risk_settings(
            State(state.clone()),
            AuthUser(user.clone()),
            ClientIp(None),
            Json(UpdateRiskSettingsRequest {
                max_order_value: Some(dec!(-1)),
                ..Default::default()
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));

        let Json(settings) = update_risk_settings(
            State(state.clone()),
            AuthUser(user.clone()),
            ClientIp(None),
            Json(UpdateRiskSettingsRequest {
                max_order_value: Some(dec!(50000)),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(settings.max_order_value, dec!(50000));

        let Json(read) = get_risk_settings(State(state.clone()), AuthUser(user)).await;
        assert_eq!(read.max_order_value, dec!(50000));
    }

    #[tokio::test]
    async fn test_acknowledge_alert_flow() {
        let state = app_state();
        let user = trader(&state, "bob").await;
        let other = trader(&state, "eve").await;
        let alert = state
            .risk
            .raise_alert(user.id, "test", AlertSeverity::Info, "check".to_string())
            .await
            .unwrap();

        let result = acknowledge_alert(
            State(state.clone()),
            AuthUser(other),
            ClientIp(None),
            Path(alert.id),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));

        let Json(acked) = acknowledge_alert(
            State(state.clone()),
            AuthUser(user.clone()),
            ClientIp(None),
            Path(alert.id),
        )
        .await
        .unwrap();
        assert!(acked.acknowledged);

        let Json(pending) = list_alerts(
            State(state.clone()),
            AuthUser(user.clone()),
            Query(AlertListQuery {
                acknowledged: Some(false),
            }),
        )
        .await;
        assert!(pending.is_empty());

        let Json(metrics) = get_risk_metrics(State(state.clone()), AuthUser(user)).await;
        assert_eq!(metrics.open_positions, 0);
    }
}
