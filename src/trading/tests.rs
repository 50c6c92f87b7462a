use super::*;
use crate::config::{Config, IntegrationsConfig, RiskDefaults};
use crate::db::StrategyType;
use crate::integrations::N8nNotifier;
use crate::models::CreateStrategyRequest;
use crate::stream::{StreamEvent, StreamHub};
use crate::test_support::{store, tick, user};
use rust_decimal_macros::dec;
use serde_json::json;

struct Fixture {
    store: Arc<Store>,
    hub: Arc<StreamHub>,
    settings: Arc<SettingsStore>,
    strategies: Arc<StrategyService>,
    trading: TradingService,
}

fn fixture() -> Fixture {
    let store = store();
    let hub = Arc::new(StreamHub::new(64, 4));
    let settings = Arc::new(SettingsStore::from_config(&Config::default()));
    let risk = Arc::new(RiskService::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        RiskDefaults::default(),
    ));
    let strategies = Arc::new(StrategyService::new(
        Arc::clone(&store),
        N8nNotifier::new(&IntegrationsConfig::default()),
    ));
    let trading = TradingService::new(
        Arc::clone(&store),
        risk,
        Arc::clone(&strategies),
        Arc::clone(&settings),
    );
    Fixture {
        store,
        hub,
        settings,
        strategies,
        trading,
    }
}

fn limit(symbol: &str, side: TradeSide, quantity: Decimal, price: Decimal) -> PlaceTradeRequest {
    PlaceTradeRequest {
        symbol: symbol.to_string(),
        side,
        order_type: OrderType::Limit,
        quantity,
        price: Some(price),
        strategy_id: None,
    }
}

fn fill(existing: Option<Position>, qty: Decimal, price: Decimal) -> FillOutcome {
    apply_fill(existing, Uuid::nil(), None, "INFY", qty, price, Utc::now()).unwrap()
}

// ============================================================================
// Position accounting
// ============================================================================

#[test]
fn test_increasing_fill_averages_price() {
    let first = fill(None, dec!(10), dec!(100));
    assert_eq!(first.realized_pnl, None);
    let second = fill(Some(first.position), dec!(30), dec!(120));
    assert_eq!(second.position.quantity, dec!(40));
    assert_eq!(second.position.average_price, dec!(115));
    assert_eq!(second.realized_pnl, None);
}

#[test]
fn test_reducing_fill_realizes_pnl() {
    let long = fill(None, dec!(10), dec!(100)).position;
    let reduced = fill(Some(long), dec!(-4), dec!(110));
    assert_eq!(reduced.realized_pnl, Some(dec!(40)));
    assert_eq!(reduced.position.quantity, dec!(6));
    assert_eq!(reduced.position.average_price, dec!(100));
    assert_eq!(reduced.position.status, PositionStatus::Open);

    let closed = fill(Some(reduced.position), dec!(-6), dec!(95));
    assert_eq!(closed.realized_pnl, Some(dec!(-30)));
    assert_eq!(closed.position.realized_pnl, dec!(10));
    assert_eq!(closed.position.status, PositionStatus::Closed);
    assert!(closed.position.closed_at.is_some());
}

#[test]
fn test_short_position_pnl_sign() {
    let short = fill(None, dec!(-5), dec!(200)).position;
    let covered = fill(Some(short), dec!(5), dec!(180));
    assert_eq!(covered.realized_pnl, Some(dec!(100)));
    assert_eq!(covered.position.status, PositionStatus::Closed);
}

#[test]
fn test_fill_flips_through_zero() {
    let long = fill(None, dec!(10), dec!(100)).position;
    let id = long.id;
    let flipped = fill(Some(long), dec!(-15), dec!(90));
    assert_eq!(flipped.position.id, id);
    assert_eq!(flipped.realized_pnl, Some(dec!(-100)));
    assert_eq!(flipped.position.quantity, dec!(-5));
    assert_eq!(flipped.position.average_price, dec!(90));
    assert_eq!(flipped.position.status, PositionStatus::Open);
}

#[test]
fn test_closed_position_starts_fresh() {
    let mut old = fill(None, dec!(10), dec!(100)).position;
    old.quantity = Decimal::ZERO;
    old.status = PositionStatus::Closed;
    let fresh = fill(Some(old.clone()), dec!(3), dec!(50));
    assert_ne!(fresh.position.id, old.id);
    assert_eq!(fresh.position.average_price, dec!(50));
}

#[test]
fn test_overflowing_fill_is_rejected() {
    let long = fill(None, Decimal::MAX, dec!(1)).position;
    let err = apply_fill(Some(long), Uuid::nil(), None, "INFY", dec!(1), dec!(1), Utc::now())
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

// ============================================================================
// Service
// ============================================================================

#[tokio::test]
async fn test_limit_order_fills_and_opens_position() {
    let f = fixture();
    let trader = user("alice");
    let trade = f
        .trading
        .place_trade(&trader, limit("infy", TradeSide::Buy, dec!(10), dec!(1500)))
        .await
        .unwrap();
    assert_eq!(trade.status, TradeStatus::Filled);
    assert_eq!(trade.symbol, "INFY");
    assert_eq!(trade.fill_price, Some(dec!(1500)));

    let position = f.store.open_position(trader.id, "INFY").unwrap();
    assert_eq!(position.quantity, dec!(10));

    f.trading
        .place_trade(&trader, limit("INFY", TradeSide::Sell, dec!(4), dec!(1520)))
        .await
        .unwrap();
    let trades = f.trading.list_trades(&trader, &TradeListQuery::default());
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].realized_pnl, Some(dec!(80)));
}

#[tokio::test]
async fn test_order_validation() {
    let f = fixture();
    let trader = user("alice");

    let zero = limit("INFY", TradeSide::Buy, Decimal::ZERO, dec!(10));
    assert!(matches!(
        f.trading.place_trade(&trader, zero).await,
        Err(ApiError::Validation(_))
    ));

    let mut no_price = limit("INFY", TradeSide::Buy, dec!(1), dec!(10));
    no_price.price = None;
    assert!(matches!(
        f.trading.place_trade(&trader, no_price).await,
        Err(ApiError::Validation(_))
    ));

    let mut market = limit("INFY", TradeSide::Buy, dec!(1), dec!(10));
    market.order_type = OrderType::Market;
    assert!(matches!(
        f.trading.place_trade(&trader, market.clone()).await,
        Err(ApiError::InvalidRequest(_))
    ));

    f.store.record_tick(&tick("INFY", 1_512.35));
    let trade = f.trading.place_trade(&trader, market).await.unwrap();
    assert_eq!(trade.fill_price, Some(dec!(1512.35)));
    assert_eq!(trade.price, Some(dec!(10)));
}

#[tokio::test]
async fn test_oversized_order_is_rejected_without_side_effects() {
    let f = fixture();
    let trader = user("alice");

    let huge = limit(
        "INFY",
        TradeSide::Buy,
        dec!(100000000000000000000),
        dec!(10000000000),
    );
    match f.trading.place_trade(&trader, huge).await {
        Err(ApiError::Validation(fields)) => assert_eq!(fields[0].field, "quantity"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(f.trading.list_trades(&trader, &TradeListQuery::default()).is_empty());
    assert!(f.store.open_position(trader.id, "INFY").is_none());
}

#[tokio::test]
async fn test_risk_rejection_is_stored_and_alerted() {
    let f = fixture();
    let trader = user("alice");
    let mut rx = f.hub.subscribe();

    // Default max order value is 500 000.
    let err = f
        .trading
        .place_trade(&trader, limit("INFY", TradeSide::Buy, dec!(500), dec!(1500)))
        .await
        .unwrap_err();
    let ApiError::RiskRejected(violations) = err else {
        panic!("expected risk rejection");
    };
    assert_eq!(violations.len(), 1);

    let rejected = f.trading.list_trades(
        &trader,
        &TradeListQuery {
            status: Some(TradeStatus::Rejected),
            ..Default::default()
        },
    );
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].rejection_reason.is_some());
    assert!(f.store.open_position(trader.id, "INFY").is_none());

    match rx.recv().await.unwrap() {
        StreamEvent::Alert(alert) => {
            assert_eq!(alert.user_id, trader.id);
            assert_eq!(alert.alert_type, ORDER_REJECTED_ALERT);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_platform_switch_blocks_orders() {
    let f = fixture();
    let trader = user("alice");
    let mut values = serde_json::Map::new();
    values.insert(TRADING_ENABLED.to_string(), json!(false));
    f.settings
        .update(values, crate::settings::MergeStrategy::Merge, None)
        .unwrap();

    let err = f
        .trading
        .place_trade(&trader, limit("INFY", TradeSide::Buy, dec!(1), dec!(100)))
        .await
        .unwrap_err();
    match err {
        ApiError::RiskRejected(violations) => {
            assert_eq!(violations, vec!["trading is disabled platform-wide"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_strategy_counters_follow_fills() {
    let f = fixture();
    let trader = user("alice");
    let strategy = f
        .strategies
        .create(
            &trader,
            CreateStrategyRequest {
                name: "Scalper".to_string(),
                description: None,
                strategy_type: StrategyType::Custom,
                config: json!({}),
                parameters: json!({}),
                n8n_workflow_id: None,
            },
        )
        .await
        .unwrap();

    let mut buy = limit("INFY", TradeSide::Buy, dec!(10), dec!(100));
    buy.strategy_id = Some(strategy.id);
    let mut sell = limit("INFY", TradeSide::Sell, dec!(10), dec!(90));
    sell.strategy_id = Some(strategy.id);
    f.trading.place_trade(&trader, buy).await.unwrap();
    f.trading.place_trade(&trader, sell).await.unwrap();

    let updated = f.strategies.get(&trader, strategy.id).unwrap();
    assert_eq!(updated.total_trades, 2);
    assert_eq!(updated.losing_trades, 1);
    assert_eq!(updated.total_pnl, dec!(-100));

    let mut foreign = limit("INFY", TradeSide::Buy, dec!(1), dec!(100));
    foreign.strategy_id = Some(strategy.id);
    assert!(matches!(
        f.trading.place_trade(&user("mallory"), foreign).await,
        Err(ApiError::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_positions_marked_and_closed() {
    let f = fixture();
    let trader = user("alice");
    f.trading
        .place_trade(&trader, limit("TCS", TradeSide::Sell, dec!(5), dec!(3000)))
        .await
        .unwrap();
    f.store.record_tick(&tick("TCS", 2_990.0));

    let views = f.trading.list_positions(&trader, Some(PositionStatus::Open));
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].last_price, Some(dec!(2990)));
    assert_eq!(views[0].unrealized_pnl, dec!(50));

    let id = views[0].position.id;
    let closing = f.trading.close_position(&trader, id).await.unwrap();
    assert_eq!(closing.side, TradeSide::Buy);
    assert_eq!(closing.quantity, dec!(5));
    assert_eq!(closing.realized_pnl, Some(dec!(50)));
    assert_eq!(f.store.position(id).unwrap().status, PositionStatus::Closed);

    assert!(matches!(
        f.trading.close_position(&trader, id).await,
        Err(ApiError::Conflict(_))
    ));
    assert!(matches!(
        f.trading.close_position(&user("bob"), id).await,
        Err(ApiError::NotFound(_))
    ));
    assert!(f.trading.list_positions(&trader, Some(PositionStatus::Open)).is_empty());
}
