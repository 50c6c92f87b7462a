//! Order and position handlers.

use crate::api::extract::{AuthUser, ClientIp};
use crate::audit::{AuditEvent, actions};
use crate::db::{Trade, User};
use crate::error::ApiError;
use crate::models::{PlaceTradeRequest, PositionListQuery, PositionView, TradeListQuery};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Places an order and records the outcome in the audit trail.
///
/// `source` tells where the order came from (`api`, `n8n`, `close`).
pub(crate) async fn place_audited(
    state: &AppState,
    user: &User,
    request: PlaceTradeRequest,
    source: &str,
    ip: Option<String>,
) -> Result<Trade, ApiError> {
    let summary = json!({
        "symbol": request.symbol,
        "side": request.side,
        "quantity": request.quantity,
        "order_type": request.order_type,
        "strategy_id": request.strategy_id,
        "source": source,
    });
    match state.trading.place_trade(user, request).await {
        Ok(trade) => {
            state
                .audit
                .record(
                    AuditEvent::new(actions::TRADE_PLACED, "trade")
                        .user(user.id)
                        .resource(trade.id)
                        .details(json!({ "order": summary, "fill_price": trade.fill_price }))
                        .ip(ip),
                )
                .await;
            Ok(trade)
        }
        Err(ApiError::RiskRejected(violations)) => {
            state
                .audit
                .record(
                    AuditEvent::new(actions::TRADE_REJECTED, "trade")
                        .user(user.id)
                        .details(json!({ "order": summary, "violations": violations }))
                        .ip(ip),
                )
                .await;
            Err(ApiError::RiskRejected(violations))
        }
        Err(err) => Err(err),
    }
}

// ============================================================================
// Trades
// ============================================================================

/// Place an order.
///
/// Orders passing the risk checks fill immediately.
#[utoipa::path(
    post,
    path = "/api/v1/trades",
    request_body = PlaceTradeRequest,
    responses(
        (status = 201, description = "Order filled", body = Trade),
        (status = 400, description = "Invalid order"),
        (status = 403, description = "Strategy belongs to another user"),
        (status = 422, description = "Rejected by risk checks")
    ),
    tag = "Trading"
)]
pub async fn place_trade(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Json(request): Json<PlaceTradeRequest>,
) -> Result<(StatusCode, Json<Trade>), ApiError> {
    let trade = place_audited(&state, &user, request, "api", ip).await?;
    Ok((StatusCode::CREATED, Json(trade)))
}

/// List the caller's trades, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/trades",
    params(TradeListQuery),
    responses(
        (status = 200, description = "Trades", body = Vec<Trade>)
    ),
    tag = "Trading"
)]
pub async fn list_trades(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<TradeListQuery>,
) -> Json<Vec<Trade>> {
    Json(state.trading.list_trades(&user, &query))
}

// ============================================================================
// Positions
// ============================================================================

/// List the caller's positions marked to the latest price.
#[utoipa::path(
    get,
    path = "/api/v1/positions",
    params(PositionListQuery),
    responses(
        (status = 200, description = "Positions", body = Vec<PositionView>)
    ),
    tag = "Trading"
)]
pub async fn list_positions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<PositionListQuery>,
) -> Json<Vec<PositionView>> {
    Json(state.trading.list_positions(&user, query.status))
}

/// Close a position with an offsetting market order.
#[utoipa::path(
    post,
    path = "/api/v1/positions/{id}/close",
    params(
        ("id" = Uuid, Path, description = "Position ID")
    ),
    responses(
        (status = 200, description = "Closing trade", body = Trade),
        (status = 404, description = "Position not found"),
        (status = 409, description = "Position already closed"),
        (status = 422, description = "Rejected by risk checks")
    ),
    tag = "Trading"
)]
pub async fn close_position(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<Trade>, ApiError> {
    let request = state.trading.closing_order(&user, id)?;
    let trade = place_audited(&state, &user, request, "close", ip.clone()).await?;
    state
        .audit
        .record(
            AuditEvent::new(actions::POSITION_CLOSED, "position")
                .user(user.id)
                .resource(id)
                .details(json!({ "trade_id": trade.id, "fill_price": trade.fill_price }))
                .ip(ip),
        )
        .await;
    Ok(Json(trade))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{OrderType, PositionStatus, TradeSide, TradeStatus};
    use crate::models::{AuditLogQuery, UpdateRiskSettingsRequest};
    use crate::test_support::{app_state, tick, trader};
    use rust_decimal_macros::dec;

    fn buy(quantity: rust_decimal::Decimal) -> PlaceTradeRequest {
        PlaceTradeRequest {
            symbol: "nifty".to_string(),
            side: TradeSide::Buy,
            order_type: OrderType::Market,
            quantity,
            price: None,
            strategy_id: None,
        }
    }

    #[tokio::test]
    async fn test_place_list_and_close() {
        let state = app_state();
        state.store.record_tick(&tick("NIFTY", 100.0));
        let user = trader(&state, "alice").await;

        let (status, Json(trade)) = place_trade(
            State(state.clone()),
            AuthUser(user.clone()),
            ClientIp(None),
            Json(buy(dec!(2))),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(trade.status, TradeStatus::Filled);
        assert_eq!(trade.symbol, "NIFTY");

        let Json(positions) = list_positions(
            State(state.clone()),
            AuthUser(user.clone()),
            Query(PositionListQuery::default()),
        )
        .await;
        assert_eq!(positions.len(), 1);
        let position_id = positions[0].position.id;

        let Json(closing) = close_position(
            State(state.clone()),
            AuthUser(user.clone()),
            ClientIp(None),
            Path(position_id),
        )
        .await
        .unwrap();
        assert_eq!(closing.side, TradeSide::Sell);

        let Json(closed) = list_positions(
            State(state.clone()),
            AuthUser(user.clone()),
            Query(PositionListQuery {
                status: Some(PositionStatus::Closed),
            }),
        )
        .await;
        assert_eq!(closed.len(), 1);

        let Json(trades) = list_trades(
            State(state.clone()),
            AuthUser(user.clone()),
            Query(TradeListQuery::default()),
        )
        .await;
        assert_eq!(trades.len(), 2);

        let logs = state
            .audit
            .logs(&user, &AuditLogQuery::default())
            .await
            .unwrap();
        assert_eq!(
            logs.iter().filter(|l| l.action == actions::TRADE_PLACED).count(),
            2
        );
        assert!(logs.iter().any(|l| l.action == actions::POSITION_CLOSED));
    }

    #[tokio::test]
    async fn test_rejected_order_is_audited() {
        let state = app_state();
        state.store.record_tick(&tick("NIFTY", 100.0));
        let user = trader(&state, "bob").await;
        state
            .risk
            .update(
                user.id,
                &UpdateRiskSettingsRequest {
                    trading_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = place_trade(
            State(state.clone()),
            AuthUser(user.clone()),
            ClientIp(None),
            Json(buy(dec!(1))),
        )
        .await;
        assert!(matches!(result, Err(ApiError::RiskRejected(_))));

        let logs = state
            .audit
            .logs(&user, &AuditLogQuery::default())
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, actions::TRADE_REJECTED);
        assert_eq!(logs[0].details["order"]["source"], "api");
    }

    #[tokio::test]
    async fn test_close_is_audited_as_trade() {
        let state = app_state();
        state.store.record_tick(&tick("NIFTY", 100.0));
        let user = trader(&state, "carol").await;
        place_trade(
            State(state.clone()),
            AuthUser(user.clone()),
            ClientIp(None),
            Json(buy(dec!(3))),
        )
        .await
        .unwrap();
        let position_id = state.store.positions_for(user.id)[0].id;

        state
            .risk
            .update(
                user.id,
                &UpdateRiskSettingsRequest {
                    trading_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let result = close_position(
            State(state.clone()),
            AuthUser(user.clone()),
            ClientIp(None),
            Path(position_id),
        )
        .await;
        assert!(matches!(result, Err(ApiError::RiskRejected(_))));

        let logs = state
            .audit
            .logs(&user, &AuditLogQuery::default())
            .await
            .unwrap();
        let rejected: Vec<_> = logs
            .iter()
            .filter(|l| l.action == actions::TRADE_REJECTED)
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].details["order"]["source"], "close");
        assert!(!logs.iter().any(|l| l.action == actions::POSITION_CLOSED));
    }
}
