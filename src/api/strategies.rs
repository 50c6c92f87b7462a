//! Strategy handlers.

use crate::api::extract::{AuthUser, ClientIp};
use crate::audit::{AuditEvent, actions};
use crate::db::{Strategy, StrategyPerformance};
use crate::error::ApiError;
use crate::models::{
    CreateStrategyRequest, RecordPerformanceRequest, StrategyListQuery, StrategyStatusRequest,
    StrategyView, UpdateStrategyRequest,
};
use crate::state::AppState;
use crate::strategy::win_rate;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn view(strategy: Strategy) -> StrategyView {
    StrategyView {
        win_rate: win_rate(&strategy),
        strategy,
    }
}

/// List the caller's strategies.
#[utoipa::path(
    get,
    path = "/api/v1/strategies",
    params(StrategyListQuery),
    responses(
        (status = 200, description = "Strategies", body = Vec<StrategyView>)
    ),
    tag = "Strategies"
)]
pub async fn list_strategies(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<StrategyListQuery>,
) -> Json<Vec<StrategyView>> {
    Json(
        state
            .strategies
            .list(&user, query.status)
            .into_iter()
            .map(view)
            .collect(),
    )
}

/// Create a draft strategy.
#[utoipa::path(
    post,
    path = "/api/v1/strategies",
    request_body = CreateStrategyRequest,
    responses(
        (status = 201, description = "Strategy created", body = StrategyView),
        (status = 400, description = "Invalid fields")
    ),
    tag = "Strategies"
)]
pub async fn create_strategy(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Json(request): Json<CreateStrategyRequest>,
) -> Result<(StatusCode, Json<StrategyView>), ApiError> {
    let strategy = state.strategies.create(&user, request).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::STRATEGY_CREATED, "strategy")
                .user(user.id)
                .resource(strategy.id)
                .details(json!({ "name": strategy.name, "strategy_type": strategy.strategy_type }))
                .ip(ip),
        )
        .await;
    Ok((StatusCode::CREATED, Json(view(strategy))))
}

/// Get a strategy.
#[utoipa::path(
    get,
    path = "/api/v1/strategies/{id}",
    params(
        ("id" = Uuid, Path, description = "Strategy ID")
    ),
    responses(
        (status = 200, description = "Strategy", body = StrategyView),
        (status = 403, description = "Strategy belongs to another user"),
        (status = 404, description = "Strategy not found")
    ),
    tag = "Strategies"
)]
pub async fn get_strategy(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<StrategyView>, ApiError> {
    state.strategies.get(&user, id).map(view).map(Json)
}

/// Update a strategy.
#[utoipa::path(
    put,
    path = "/api/v1/strategies/{id}",
    params(
        ("id" = Uuid, Path, description = "Strategy ID")
    ),
    request_body = UpdateStrategyRequest,
    responses(
        (status = 200, description = "Updated strategy", body = StrategyView),
        (status = 400, description = "Invalid fields"),
        (status = 404, description = "Strategy not found"),
        (status = 409, description = "Strategy is archived")
    ),
    tag = "Strategies"
)]
pub async fn update_strategy(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStrategyRequest>,
) -> Result<Json<StrategyView>, ApiError> {
    let strategy = state.strategies.update(&user, id, request).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::STRATEGY_UPDATED, "strategy")
                .user(user.id)
                .resource(id)
                .ip(ip),
        )
        .await;
    Ok(Json(view(strategy)))
}

/// Archive a strategy.
#[utoipa::path(
    delete,
    path = "/api/v1/strategies/{id}",
    params(
        ("id" = Uuid, Path, description = "Strategy ID")
    ),
    responses(
        (status = 200, description = "Archived strategy", body = StrategyView),
        (status = 404, description = "Strategy not found"),
        (status = 409, description = "Already archived")
    ),
    tag = "Strategies"
)]
pub async fn archive_strategy(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<StrategyView>, ApiError> {
    let strategy = state.strategies.archive(&user, id).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::STRATEGY_ARCHIVED, "strategy")
                .user(user.id)
                .resource(id)
                .ip(ip),
        )
        .await;
    Ok(Json(view(strategy)))
}

/// Change the status of a strategy.
#[utoipa::path(
    post,
    path = "/api/v1/strategies/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Strategy ID")
    ),
    request_body = StrategyStatusRequest,
    responses(
        (status = 200, description = "Strategy with its new status", body = StrategyView),
        (status = 400, description = "Config incomplete for activation"),
        (status = 409, description = "Transition not allowed")
    ),
    tag = "Strategies"
)]
pub async fn change_strategy_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
    Json(request): Json<StrategyStatusRequest>,
) -> Result<Json<StrategyView>, ApiError> {
    let (strategy, previous) = state
        .strategies
        .set_status(&user, id, request.status)
        .await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::STRATEGY_STATUS_CHANGED, "strategy")
                .user(user.id)
                .resource(id)
                .details(json!({ "from": previous, "to": strategy.status }))
                .ip(ip),
        )
        .await;
    Ok(Json(view(strategy)))
}

/// Daily performance history of a strategy.
#[utoipa::path(
    get,
    path = "/api/v1/strategies/{id}/performance",
    params(
        ("id" = Uuid, Path, description = "Strategy ID")
    ),
    responses(
        (status = 200, description = "Performance records, oldest first", body = Vec<StrategyPerformance>),
        (status = 404, description = "Strategy not found")
    ),
    tag = "Strategies"
)]
pub async fn get_performance(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StrategyPerformance>>, ApiError> {
    state.strategies.performance(&user, id).map(Json)
}

/// Record the performance of a day.
#[utoipa::path(
    post,
    path = "/api/v1/strategies/{id}/performance",
    params(
        ("id" = Uuid, Path, description = "Strategy ID")
    ),
    request_body = RecordPerformanceRequest,
    responses(
        (status = 200, description = "Stored record with cumulative metrics", body = StrategyPerformance),
        (status = 400, description = "Invalid fields"),
        (status = 404, description = "Strategy not found")
    ),
    tag = "Strategies"
)]
pub async fn record_performance(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<RecordPerformanceRequest>,
) -> Result<Json<StrategyPerformance>, ApiError> {
    state
        .strategies
        .record_performance(&user, id, request)
        .await
        .map(Json)
}
