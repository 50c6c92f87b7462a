//! Strategy, order placement and risk tests.

use rust_decimal_macros::dec;
use velox_client::{
    CreateStrategyRequest, Error, PlaceTradeRequest, SignalRequest, StrategyStatus, StrategyType,
    TradeFilter, TradeSide, TradeStatus, UpdateRiskSettings,
};
use velox_tests::{logged_in_client, spawn_server};

#[tokio::test]
async fn test_market_order_opens_and_closes_position() {
    let server = spawn_server().await;
    let client = logged_in_client(&server, "buyer").await;

    let trade = client
        .place_trade(&PlaceTradeRequest::market("RELIANCE", TradeSide::Buy, dec!(10)))
        .await
        .expect("Failed to place trade");
    assert_eq!(trade.status, TradeStatus::Filled);
    assert!(trade.fill_price.is_some());

    let positions = client.list_positions().await.expect("Failed to list positions");
    let position = positions
        .iter()
        .find(|p| p.symbol == "RELIANCE")
        .expect("Position missing");
    assert_eq!(position.quantity, dec!(10));

    let closing = client
        .close_position(position.id)
        .await
        .expect("Failed to close position");
    assert_eq!(closing.side, TradeSide::Sell);

    let trades = client
        .list_trades(&TradeFilter {
            symbol: Some("RELIANCE".to_string()),
            ..TradeFilter::default()
        })
        .await
        .expect("Failed to list trades");
    assert_eq!(trades.len(), 2);
}

#[tokio::test]
async fn test_order_above_limit_is_rejected() {
    let server = spawn_server().await;
    let client = logged_in_client(&server, "limited").await;

    client
        .update_risk_settings(&UpdateRiskSettings {
            max_order_value: Some(dec!(1000)),
            ..UpdateRiskSettings::default()
        })
        .await
        .expect("Failed to update risk settings");

    let err = client
        .place_trade(&PlaceTradeRequest::market("NIFTY", TradeSide::Buy, dec!(1)))
        .await
        .expect_err("Order above limit accepted");
    assert!(matches!(err, Error::Api { status: 422, ref code, .. } if code == "RISK_REJECTED"));
}

#[tokio::test]
async fn test_signal_requires_active_strategy() {
    let server = spawn_server().await;
    let client = logged_in_client(&server, "signals").await;
    let key = client
        .generate_api_key()
        .await
        .expect("Failed to generate API key");
    let strategy = client
        .create_strategy(&CreateStrategyRequest::new("webhook", StrategyType::Custom))
        .await
        .expect("Failed to create strategy");
    assert_eq!(strategy.status, StrategyStatus::Draft);

    let keyed = client.with_api_key(&key.api_key);
    let signal = SignalRequest {
        symbol: "RELIANCE".to_string(),
        side: TradeSide::Buy,
        quantity: dec!(5),
        order_type: Default::default(),
        price: None,
    };
    let err = keyed
        .send_signal(strategy.id, &signal)
        .await
        .expect_err("Signal accepted for draft strategy");
    assert_eq!(err.status(), Some(409));

    client
        .set_strategy_status(strategy.id, StrategyStatus::Active)
        .await
        .expect("Failed to activate strategy");
    let trade = keyed
        .send_signal(strategy.id, &signal)
        .await
        .expect("Signal rejected");
    assert_eq!(trade.strategy_id, Some(strategy.id));
}
