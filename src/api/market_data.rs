//! Symbol, quote, tick, bar and subscription handlers.

use crate::api::extract::AuthUser;
use crate::db::{MarketDataSubscription, QuoteData, Symbol, TickData};
use crate::error::ApiError;
use crate::models::{
    CreateSubscriptionRequest, CreateSymbolRequest, MessageResponse, OhlcQuery, OhlcResponse,
    TicksQuery,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Symbols
// ============================================================================

/// List registered symbols.
#[utoipa::path(
    get,
    path = "/api/v1/market-data/symbols",
    responses(
        (status = 200, description = "Registered symbols", body = Vec<Symbol>)
    ),
    tag = "Market Data"
)]
pub async fn list_symbols(State(state): State<Arc<AppState>>) -> Json<Vec<Symbol>> {
    Json(state.market_data.symbols())
}

/// Register a symbol (admin only).
#[utoipa::path(
    post,
    path = "/api/v1/market-data/symbols",
    request_body = CreateSymbolRequest,
    responses(
        (status = 201, description = "Symbol registered", body = Symbol),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Admin role required"),
        (status = 409, description = "Symbol exists")
    ),
    tag = "Market Data"
)]
pub async fn create_symbol(
    State(state): State<Arc<AppState>>,
    admin: AuthUser,
    Json(request): Json<CreateSymbolRequest>,
) -> Result<(StatusCode, Json<Symbol>), ApiError> {
    admin.require_admin()?;
    let symbol = state.market_data.create_symbol(request).await?;
    Ok((StatusCode::CREATED, Json(symbol)))
}

/// Get a registered symbol.
#[utoipa::path(
    get,
    path = "/api/v1/market-data/symbols/{symbol}",
    params(
        ("symbol" = String, Path, description = "Trading symbol")
    ),
    responses(
        (status = 200, description = "Symbol", body = Symbol),
        (status = 404, description = "Symbol not found")
    ),
    tag = "Market Data"
)]
pub async fn get_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Symbol>, ApiError> {
    state.market_data.symbol(&symbol).map(Json)
}

// ============================================================================
// Prices
// ============================================================================

/// Latest quote of a symbol.
#[utoipa::path(
    get,
    path = "/api/v1/market-data/{symbol}/quote",
    params(
        ("symbol" = String, Path, description = "Trading symbol")
    ),
    responses(
        (status = 200, description = "Latest quote", body = QuoteData),
        (status = 404, description = "No price for the symbol")
    ),
    tag = "Market Data"
)]
pub async fn get_quote(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<QuoteData>, ApiError> {
    state.market_data.quote(&symbol).map(Json)
}

/// Recent ticks of a symbol, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/market-data/{symbol}/ticks",
    params(
        ("symbol" = String, Path, description = "Trading symbol"),
        TicksQuery
    ),
    responses(
        (status = 200, description = "Recent ticks", body = Vec<TickData>),
        (status = 404, description = "Symbol not found")
    ),
    tag = "Market Data"
)]
pub async fn get_ticks(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<TicksQuery>,
) -> Result<Json<Vec<TickData>>, ApiError> {
    state.market_data.ticks(&symbol, query.limit).map(Json)
}

/// OHLC bars of a symbol.
#[utoipa::path(
    get,
    path = "/api/v1/market-data/{symbol}/ohlc",
    params(
        ("symbol" = String, Path, description = "Trading symbol"),
        OhlcQuery
    ),
    responses(
        (status = 200, description = "OHLC bars", body = OhlcResponse),
        (status = 400, description = "Unknown interval")
    ),
    tag = "Market Data"
)]
pub async fn get_ohlc(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<OhlcQuery>,
) -> Result<Json<OhlcResponse>, ApiError> {
    state.market_data.ohlc(&symbol, &query).map(Json)
}

// ============================================================================
// Subscriptions
// ============================================================================

/// List the caller's market data subscriptions.
#[utoipa::path(
    get,
    path = "/api/v1/market-data/subscriptions",
    responses(
        (status = 200, description = "Subscriptions", body = Vec<MarketDataSubscription>)
    ),
    tag = "Market Data"
)]
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Json<Vec<MarketDataSubscription>> {
    Json(state.market_data.subscriptions(&user))
}

/// Subscribe to a symbol's data.
#[utoipa::path(
    post,
    path = "/api/v1/market-data/subscriptions",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = MarketDataSubscription),
        (status = 404, description = "Symbol not found"),
        (status = 409, description = "Already subscribed")
    ),
    tag = "Market Data"
)]
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<MarketDataSubscription>), ApiError> {
    let subscription = state.market_data.subscribe(&user, request).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// Remove a subscription.
#[utoipa::path(
    delete,
    path = "/api/v1/market-data/subscriptions/{id}",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Subscription removed", body = MessageResponse),
        (status = 404, description = "Subscription not found")
    ),
    tag = "Market Data"
)]
pub async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.market_data.unsubscribe(&user, id).await?;
    Ok(Json(MessageResponse::new(format!("subscription {id} removed"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InstrumentType, SubscriptionDataType};
    use crate::test_support::{admin, app_state, tick, trader};
    use rust_decimal_macros::dec;

    fn symbol_request() -> CreateSymbolRequest {
        CreateSymbolRequest {
            symbol: "infy".to_string(),
            name: "Infosys".to_string(),
            exchange: "NSE".to_string(),
            instrument_type: InstrumentType::Equity,
            lot_size: 1,
            tick_size: dec!(0.05),
        }
    }

    #[tokio::test]
    async fn test_create_symbol_requires_admin() {
        let state = app_state();
        let user = trader(&state, "alice").await;
        let result = create_symbol(State(state.clone()), AuthUser(user), Json(symbol_request())).await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));

        let root = admin(&state, "root").await;
        let (status, Json(symbol)) =
            create_symbol(State(state.clone()), AuthUser(root), Json(symbol_request()))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(symbol.symbol, "INFY");

        let Json(found) = get_symbol(State(state.clone()), Path("Infy".to_string()))
            .await
            .unwrap();
        assert_eq!(found.id, symbol.id);
    }

    #[tokio::test]
    async fn test_quote_ticks_and_ohlc() {
        let state = app_state();
        state.register_symbols().await.unwrap();
        let result = get_quote(State(state.clone()), Path("NIFTY".to_string())).await;
        assert!(matches!(result, Err(ApiError::SymbolNotFound(_))));

        state.store.record_tick(&tick("NIFTY", 22_500.0));
        state.store.record_tick(&tick("NIFTY", 22_510.0));
        let Json(quote) = get_quote(State(state.clone()), Path("nifty".to_string()))
            .await
            .unwrap();
        assert_eq!(quote.ltp, 22_510.0);

        let Json(ticks) = get_ticks(
            State(state.clone()),
            Path("NIFTY".to_string()),
            Query(TicksQuery { limit: Some(1) }),
        )
        .await
        .unwrap();
        assert_eq!(ticks.len(), 1);

        let result = get_ohlc(
            State(state.clone()),
            Path("NIFTY".to_string()),
            Query(OhlcQuery {
                interval: Some("2m".to_string()),
                from: None,
                to: None,
                limit: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let state = app_state();
        state.register_symbols().await.unwrap();
        let user = trader(&state, "bob").await;

        let (_, Json(subscription)) = create_subscription(
            State(state.clone()),
            AuthUser(user.clone()),
            Json(CreateSubscriptionRequest {
                symbol: "NIFTY".to_string(),
                data_type: SubscriptionDataType::Ticks,
            }),
        )
        .await
        .unwrap();

        let Json(listed) = list_subscriptions(State(state.clone()), AuthUser(user.clone())).await;
        assert_eq!(listed.len(), 1);

        delete_subscription(State(state.clone()), AuthUser(user.clone()), Path(subscription.id))
            .await
            .unwrap();
        let result =
            delete_subscription(State(state.clone()), AuthUser(user), Path(subscription.id)).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
