//! Unit tests for types module.

use super::*;
use rust_decimal_macros::dec;
use serde_json::json;

#[test]
fn test_trade_side_display_and_serde() {
    assert_eq!(TradeSide::Buy.to_string(), "buy");
    assert_eq!(serde_json::to_string(&TradeSide::Sell).unwrap(), "\"sell\"");
    assert_eq!(
        serde_json::to_string(&OrderType::StopLossLimit).unwrap(),
        "\"stop_loss_limit\""
    );
}

#[test]
fn test_market_order_request_omits_empty_fields() {
    let request = PlaceTradeRequest::market("NIFTY", TradeSide::Buy, dec!(2));
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["symbol"], "NIFTY");
    assert_eq!(value["order_type"], "market");
    assert!(value.get("price").is_none());
    assert!(value.get("strategy_id").is_none());
}

#[test]
fn test_strategy_from_server_json() {
    let body = json!({
        "id": "7d8f9a2c-1b3e-4f5a-9c6d-0e1f2a3b4c5d",
        "user_id": "1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d",
        "name": "Breakout",
        "description": null,
        "strategy_type": "breakout",
        "config": {},
        "parameters": {},
        "status": "active",
        "total_trades": 4,
        "winning_trades": 3,
        "losing_trades": 1,
        "total_pnl": "1250.50",
        "n8n_workflow_id": null,
        "created_at": "2026-01-05T09:15:00Z",
        "updated_at": "2026-01-05T09:15:00Z",
        "win_rate": 75.0
    });
    let strategy: Strategy = serde_json::from_value(body).unwrap();
    assert_eq!(strategy.status, StrategyStatus::Active);
    assert_eq!(strategy.total_pnl, dec!(1250.50));
    assert_eq!(strategy.win_rate, 75.0);
}

#[test]
fn test_position_from_flattened_view() {
    let body = json!({
        "id": "7d8f9a2c-1b3e-4f5a-9c6d-0e1f2a3b4c5d",
        "user_id": "1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d",
        "strategy_id": null,
        "symbol": "NIFTY",
        "quantity": "-2",
        "average_price": "22500",
        "realized_pnl": "0",
        "status": "open",
        "opened_at": "2026-01-05T09:15:00Z",
        "updated_at": "2026-01-05T09:15:00Z",
        "closed_at": null,
        "last_price": "22450",
        "unrealized_pnl": "100"
    });
    let position: Position = serde_json::from_value(body).unwrap();
    assert_eq!(position.quantity, dec!(-2));
    assert_eq!(position.unrealized_pnl, dec!(100));
}

#[test]
fn test_chain_params_query() {
    let params = ChainParams::default();
    assert_eq!(serde_urlencoded::to_string(&params).unwrap(), "");

    let params = ChainParams {
        expiry: NaiveDate::from_ymd_opt(2026, 1, 29),
        refresh: true,
    };
    assert_eq!(
        serde_urlencoded::to_string(&params).unwrap(),
        "expiry=2026-01-29&refresh=true"
    );
}

#[test]
fn test_update_risk_settings_is_partial() {
    let update = UpdateRiskSettings {
        max_order_value: Some(dec!(50000)),
        ..Default::default()
    };
    let value = serde_json::to_value(&update).unwrap();
    assert_eq!(value.as_object().unwrap().len(), 1);
}
