use super::*;
use crate::config::IntegrationsConfig;
use crate::test_support::{store, user};
use rust_decimal_macros::dec;

fn service() -> StrategyService {
    StrategyService::new(store(), N8nNotifier::new(&IntegrationsConfig::default()))
}

fn create_request(strategy_type: StrategyType, config: serde_json::Value) -> CreateStrategyRequest {
    CreateStrategyRequest {
        name: "My strategy".to_string(),
        description: None,
        strategy_type,
        config,
        parameters: json!({}),
        n8n_workflow_id: None,
    }
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

#[test]
fn test_validate_config_reports_every_missing_key() {
    let err = validate_config(StrategyType::IronCondor, &json!({"underlying": "NIFTY"}))
        .unwrap_err();
    match err {
        ApiError::Validation(fields) => {
            let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
            assert_eq!(
                names,
                vec![
                    "config.expiry",
                    "config.call_short_strike",
                    "config.put_short_strike",
                    "config.wing_width"
                ]
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_validate_config_per_type() {
    assert!(validate_config(
        StrategyType::MovingAverageCrossover,
        &json!({"fast_period": 9, "slow_period": 21, "symbol": "NIFTY"})
    )
    .is_ok());
    assert!(validate_config(
        StrategyType::Rsi,
        &json!({"period": 14, "overbought": 70, "oversold": 30})
    )
    .is_err());
    assert!(validate_config(
        StrategyType::Breakout,
        &json!({"lookback_period": 20, "threshold": null, "symbol": "NIFTY"})
    )
    .is_err());
    assert!(validate_config(
        StrategyType::Straddle,
        &json!({"underlying": "NIFTY", "expiry": "2024-06-27", "quantity": 1})
    )
    .is_ok());
    assert!(validate_config(StrategyType::Custom, &json!({})).is_ok());
    assert!(validate_config(StrategyType::Custom, &json!([1, 2])).is_err());
}

#[test]
fn test_transition_table() {
    use StrategyStatus::*;
    let allowed = [
        (Draft, Active),
        (Active, Paused),
        (Paused, Active),
        (Active, Stopped),
        (Paused, Stopped),
        (Stopped, Active),
        (Draft, Archived),
        (Active, Archived),
        (Paused, Archived),
        (Stopped, Archived),
    ];
    for from in StrategyStatus::ALL {
        for to in StrategyStatus::ALL {
            assert_eq!(
                can_transition(*from, *to),
                allowed.contains(&(*from, *to)),
                "{from} -> {to}"
            );
        }
    }
}

#[test]
fn test_max_drawdown() {
    assert_eq!(max_drawdown(&[]), Decimal::ZERO);
    assert_eq!(max_drawdown(&[dec!(10), dec!(4), dec!(12), dec!(7)]), dec!(6));
    assert_eq!(max_drawdown(&[dec!(-5), dec!(-8)]), dec!(8));
}

#[test]
fn test_sharpe_ratio() {
    assert!(sharpe_ratio(&[1.0]).is_none());
    assert!(sharpe_ratio(&[2.0, 2.0, 2.0]).is_none());

    let sharpe = sharpe_ratio(&[1.0, 3.0]).unwrap();
    // mean 2, sample std sqrt(2)
    let expected = 2.0 / 2.0_f64.sqrt() * 252.0_f64.sqrt();
    assert!((sharpe - expected).abs() < 1e-9);
}

#[test]
fn test_compute_performance_continues_history() {
    let id = Uuid::new_v4();
    let first = compute_performance(id, &[], day(1), dec!(100), 3);
    assert_eq!(first.cumulative_pnl, dec!(100));
    assert_eq!(first.cumulative_trades, 3);
    assert!(first.sharpe_ratio.is_none());

    let second = compute_performance(id, &[first.clone()], day(2), dec!(-40), 2);
    assert_eq!(second.cumulative_pnl, dec!(60));
    assert_eq!(second.cumulative_trades, 5);
    assert_eq!(second.max_drawdown, dec!(40));
    assert!(second.sharpe_ratio.is_some());
    assert_eq!(second.equity_curve.as_array().unwrap().len(), 2);

    // Recomputing day 2 ignores the old day 2 record.
    let redo = compute_performance(id, &[first, second], day(2), dec!(10), 1);
    assert_eq!(redo.cumulative_pnl, dec!(110));
    assert_eq!(redo.cumulative_trades, 4);
}

#[test]
fn test_apply_fill_counters_and_win_rate() {
    let owner = user("alice");
    let mut strategy = Strategy {
        id: Uuid::new_v4(),
        user_id: owner.id,
        name: "s".to_string(),
        description: None,
        strategy_type: StrategyType::Custom,
        config: json!({}),
        parameters: json!({}),
        status: StrategyStatus::Active,
        total_trades: 0,
        winning_trades: 0,
        losing_trades: 0,
        total_pnl: Decimal::ZERO,
        n8n_workflow_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    assert_eq!(win_rate(&strategy), 0.0);

    apply_fill(&mut strategy, None);
    apply_fill(&mut strategy, Some(dec!(50)));
    apply_fill(&mut strategy, Some(dec!(25)));
    apply_fill(&mut strategy, Some(dec!(-30)));

    assert_eq!(strategy.total_trades, 4);
    assert_eq!(strategy.winning_trades, 2);
    assert_eq!(strategy.losing_trades, 1);
    assert_eq!(strategy.total_pnl, dec!(45));
    assert!((win_rate(&strategy) - 66.666_666).abs() < 1e-3);
}

#[tokio::test]
async fn test_lifecycle() {
    let svc = service();
    let alice = user("alice");

    let strategy = svc
        .create(&alice, create_request(StrategyType::Rsi, json!({"period": 14})))
        .await
        .unwrap();
    assert_eq!(strategy.status, StrategyStatus::Draft);

    // Activation requires a complete config.
    let err = svc
        .set_status(&alice, strategy.id, StrategyStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    svc.update(
        &alice,
        strategy.id,
        UpdateStrategyRequest {
            config: Some(json!({"period": 14, "overbought": 70, "oversold": 30, "symbol": "NIFTY"})),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let (active, previous) = svc
        .set_status(&alice, strategy.id, StrategyStatus::Active)
        .await
        .unwrap();
    assert_eq!(active.status, StrategyStatus::Active);
    assert_eq!(previous, StrategyStatus::Draft);

    let err = svc
        .set_status(&alice, strategy.id, StrategyStatus::Draft)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let archived = svc.archive(&alice, strategy.id).await.unwrap();
    assert_eq!(archived.status, StrategyStatus::Archived);

    let err = svc
        .update(&alice, strategy.id, UpdateStrategyRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
    assert!(svc.archive(&alice, strategy.id).await.is_err());
}

#[tokio::test]
async fn test_ownership_and_listing() {
    let svc = service();
    let alice = user("alice");
    let bob = user("bob");
    let mut admin = user("admin");
    admin.role = UserRole::Admin;

    let strategy = svc
        .create(&alice, create_request(StrategyType::Custom, json!({})))
        .await
        .unwrap();
    svc.create(&alice, create_request(StrategyType::Custom, json!({})))
        .await
        .unwrap();

    assert!(matches!(
        svc.get(&bob, strategy.id).unwrap_err(),
        ApiError::Forbidden(_)
    ));
    assert!(svc.get(&admin, strategy.id).is_ok());
    assert!(matches!(
        svc.get(&alice, Uuid::new_v4()).unwrap_err(),
        ApiError::StrategyNotFound(_)
    ));

    svc.set_status(&alice, strategy.id, StrategyStatus::Active)
        .await
        .unwrap();
    assert_eq!(svc.list(&alice, None).len(), 2);
    assert_eq!(svc.list(&alice, Some(StrategyStatus::Active)).len(), 1);
    assert!(svc.list(&bob, None).is_empty());
}

#[tokio::test]
async fn test_create_rejects_blank_name() {
    let svc = service();
    let mut request = create_request(StrategyType::Custom, json!({}));
    request.name = "   ".to_string();
    assert!(svc.create(&user("alice"), request).await.is_err());
}

#[tokio::test]
async fn test_record_performance_replaces_same_day() {
    let svc = service();
    let alice = user("alice");
    let strategy = svc
        .create(&alice, create_request(StrategyType::Custom, json!({})))
        .await
        .unwrap();

    for (d, pnl) in [(1, dec!(100)), (2, dec!(-20)), (2, dec!(30))] {
        svc.record_performance(
            &alice,
            strategy.id,
            RecordPerformanceRequest {
                date: day(d),
                daily_pnl: pnl,
                daily_trades: 1,
            },
        )
        .await
        .unwrap();
    }

    let history = svc.performance(&alice, strategy.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].cumulative_pnl, dec!(130));
}

#[tokio::test]
async fn test_record_performance_rebuilds_later_days() {
    let svc = service();
    let alice = user("alice");
    let strategy = svc
        .create(&alice, create_request(StrategyType::Custom, json!({})))
        .await
        .unwrap();

    for (d, pnl, trades) in [(1, dec!(100), 4), (2, dec!(50), 2), (1, dec!(10), 1)] {
        svc.record_performance(
            &alice,
            strategy.id,
            RecordPerformanceRequest {
                date: day(d),
                daily_pnl: pnl,
                daily_trades: trades,
            },
        )
        .await
        .unwrap();
    }

    let history = svc.performance(&alice, strategy.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].cumulative_pnl, dec!(10));
    assert_eq!(history[1].date, day(2));
    assert_eq!(history[1].daily_pnl, dec!(50));
    assert_eq!(history[1].cumulative_pnl, dec!(60));
    assert_eq!(history[1].cumulative_trades, 3);
    assert_eq!(history[1].max_drawdown, dec!(0));
    let curve = history[1].equity_curve.as_array().unwrap();
    assert_eq!(curve.len(), 2);
    assert_eq!(curve[1]["equity"], json!(60.0));
}

#[tokio::test]
async fn test_record_fill_updates_strategy() {
    let svc = service();
    let alice = user("alice");
    let strategy = svc
        .create(&alice, create_request(StrategyType::Custom, json!({})))
        .await
        .unwrap();

    svc.record_fill(strategy.id, Some(dec!(12.5))).await.unwrap();
    svc.record_fill(Uuid::new_v4(), None).await.unwrap();

    let updated = svc.get(&alice, strategy.id).unwrap();
    assert_eq!(updated.total_trades, 1);
    assert_eq!(updated.winning_trades, 1);
    assert_eq!(updated.total_pnl, dec!(12.5));
}
