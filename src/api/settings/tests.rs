use super::*;
use crate::models::SystemLogQuery;
use crate::settings::{HEARTBEAT_SECS, MergeStrategy, TRADING_ENABLED};
use crate::test_support::{admin, app_state, trader};
use serde_json::{Map, Value};

fn values(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
async fn test_update_requires_admin() {
    let state = app_state();
    let user = trader(&state, "alice").await;
    let result = update_settings(
        State(state.clone()),
        AuthUser(user),
        ClientIp(None),
        Json(UpdateSettingsRequest {
            values: values(json!({ TRADING_ENABLED: false })),
            merge_strategy: MergeStrategy::Merge,
        }),
    )
    .await;
    assert!(matches!(result, Err(ApiError::Forbidden(_))));
    assert_eq!(state.settings.version(), 1);
}

#[tokio::test]
async fn test_admin_update_and_history() {
    let state = app_state();
    let root = admin(&state, "root").await;

    let Json(snapshot) = update_settings(
        State(state.clone()),
        AuthUser(root.clone()),
        ClientIp(None),
        Json(UpdateSettingsRequest {
            values: values(json!({ HEARTBEAT_SECS: 10 })),
            merge_strategy: MergeStrategy::Merge,
        }),
    )
    .await
    .unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.values[HEARTBEAT_SECS], json!(10));

    let Json(history) = get_settings_history(State(state.clone()), AuthUser(root.clone())).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].changed_by, Some(root.id));

    let Json(current) = get_settings(State(state.clone()), AuthUser(root)).await;
    assert_eq!(current.version, 2);
}

#[tokio::test]
async fn test_invalid_update_changes_nothing() {
    let state = app_state();
    let root = admin(&state, "root").await;
    let result = update_settings(
        State(state.clone()),
        AuthUser(root),
        ClientIp(None),
        Json(UpdateSettingsRequest {
            values: values(json!({ HEARTBEAT_SECS: 0, "unknown.key": 1 })),
            merge_strategy: MergeStrategy::Replace,
        }),
    )
    .await;
    match result {
        Err(ApiError::Validation(fields)) => assert_eq!(fields.len(), 2),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(state.settings.version(), 1);
}

#[tokio::test]
async fn test_validate_reports_without_applying() {
    let state = app_state();
    let user = trader(&state, "bob").await;
    let Json(result) = validate_settings(
        State(state.clone()),
        AuthUser(user),
        Json(ValidateSettingsRequest {
            values: values(json!({ HEARTBEAT_SECS: 500 })),
        }),
    )
    .await;
    assert!(!result.valid);
    assert_eq!(result.errors[0].field, HEARTBEAT_SECS);
    assert_eq!(state.settings.version(), 1);
}

#[tokio::test]
async fn test_reset_writes_system_log() {
    let state = app_state();
    let root = admin(&state, "root").await;
    state
        .settings
        .update(values(json!({ TRADING_ENABLED: false })), MergeStrategy::Merge, None)
        .unwrap();

    let Json(snapshot) = reset_settings(State(state.clone()), AuthUser(root), ClientIp(None))
        .await
        .unwrap();
    assert_eq!(snapshot.values[TRADING_ENABLED], json!(true));

    let logs = state.audit.system_logs(&SystemLogQuery::default());
    assert!(logs.iter().any(|l| l.component == "settings"));
}

#[tokio::test]
async fn test_schema_lists_every_key() {
    let state = app_state();
    let Json(schema) = get_settings_schema(State(state.clone())).await;
    assert_eq!(schema.len(), state.settings.get().values.len());
}
