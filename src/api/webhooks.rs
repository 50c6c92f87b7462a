//! Inbound n8n workflow webhooks.

use crate::api::extract::{ClientIp, api_key};
use crate::api::trading::place_audited;
use crate::db::{StrategyStatus, Trade};
use crate::error::ApiError;
use crate::models::{N8nSignalRequest, PlaceTradeRequest};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Trade signal from an n8n workflow.
///
/// Authenticated with the `X-API-Key` of the strategy owner. Only active
/// strategies accept signals; the order goes through the regular risk checks.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/n8n/{strategy_id}",
    params(
        ("strategy_id" = Uuid, Path, description = "Strategy ID")
    ),
    request_body = N8nSignalRequest,
    responses(
        (status = 201, description = "Signal executed", body = Trade),
        (status = 401, description = "Missing or invalid API key"),
        (status = 403, description = "Key does not belong to the strategy owner"),
        (status = 404, description = "Strategy not found"),
        (status = 409, description = "Strategy is not active"),
        (status = 422, description = "Rejected by risk checks")
    ),
    tag = "Webhooks"
)]
pub async fn n8n_signal(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Path(strategy_id): Path<Uuid>,
    headers: HeaderMap,
    Json(signal): Json<N8nSignalRequest>,
) -> Result<(StatusCode, Json<Trade>), ApiError> {
    let key = api_key(&headers)
        .ok_or_else(|| ApiError::Unauthorized("missing X-API-Key header".to_string()))?;
    let user = state.accounts.authenticate_api_key(key)?;

    let strategy = state
        .store
        .strategy(strategy_id)
        .ok_or(ApiError::StrategyNotFound(strategy_id))?;
    if strategy.user_id != user.id {
        return Err(ApiError::Forbidden(
            "API key does not belong to the strategy owner".to_string(),
        ));
    }
    if strategy.status != StrategyStatus::Active {
        return Err(ApiError::Conflict(format!(
            "strategy is {}, signals require an active strategy",
            strategy.status
        )));
    }

    info!(strategy_id = %strategy_id, symbol = %signal.symbol, side = %signal.side, "n8n signal received");
    let request = PlaceTradeRequest {
        symbol: signal.symbol,
        side: signal.side,
        order_type: signal.order_type,
        quantity: signal.quantity,
        price: signal.price,
        strategy_id: Some(strategy_id),
    };
    let trade = place_audited(&state, &user, request, "n8n", ip).await?;
    Ok((StatusCode::CREATED, Json(trade)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::middleware::API_KEY_HEADER;
    use crate::db::{OrderType, StrategyType, TradeSide};
    use crate::models::CreateStrategyRequest;
    use crate::test_support::{app_state, tick, trader};
    use axum::http::HeaderValue;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn signal() -> N8nSignalRequest {
        N8nSignalRequest {
            symbol: "NIFTY".to_string(),
            side: TradeSide::Buy,
            quantity: dec!(1),
            order_type: OrderType::Market,
            price: None,
        }
    }

    fn key_headers(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_signal_places_strategy_trade() {
        let state = app_state();
        state.store.record_tick(&tick("NIFTY", 100.0));
        let owner = trader(&state, "owner").await;
        let key = state.accounts.generate_api_key(owner.id).await.unwrap();
        let strategy = state
            .strategies
            .create(
                &owner,
                CreateStrategyRequest {
                    name: "Webhook driven".to_string(),
                    description: None,
                    strategy_type: StrategyType::Custom,
                    config: json!({}),
                    parameters: json!({}),
                    n8n_workflow_id: None,
                },
            )
            .await
            .unwrap();

        let result = n8n_signal(
            State(state.clone()),
            ClientIp(None),
            Path(strategy.id),
            key_headers(&key.api_key),
            Json(signal()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));

        state
            .strategies
            .set_status(&owner, strategy.id, StrategyStatus::Active)
            .await
            .unwrap();
        let (status, Json(trade)) = n8n_signal(
            State(state.clone()),
            ClientIp(None),
            Path(strategy.id),
            key_headers(&key.api_key),
            Json(signal()),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(trade.strategy_id, Some(strategy.id));
        assert_eq!(state.store.strategy(strategy.id).unwrap().total_trades, 1);
    }

    #[tokio::test]
    async fn test_signal_rejects_foreign_key() {
        let state = app_state();
        let owner = trader(&state, "owner").await;
        let intruder = trader(&state, "intruder").await;
        let key = state.accounts.generate_api_key(intruder.id).await.unwrap();
        let strategy = state
            .strategies
            .create(
                &owner,
                CreateStrategyRequest {
                    name: "Private".to_string(),
                    description: None,
                    strategy_type: StrategyType::Custom,
                    config: json!({}),
                    parameters: json!({}),
                    n8n_workflow_id: None,
                },
            )
            .await
            .unwrap();

        let result = n8n_signal(
            State(state.clone()),
            ClientIp(None),
            Path(strategy.id),
            key_headers(&key.api_key),
            Json(signal()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));

        let result = n8n_signal(
            State(state),
            ClientIp(None),
            Path(strategy.id),
            HeaderMap::new(),
            Json(signal()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }
}
