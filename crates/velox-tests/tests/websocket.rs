//! WebSocket connection and message handling tests.

use std::time::Duration;
use velox_client::{Error, WsClient, WsMessage};
use velox_tests::{logged_in_client, spawn_server};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_websocket_connection() {
    let server = spawn_server().await;
    let client = server.client().expect("Failed to create client");

    let mut ws = WsClient::connect(&client.ws_stream_url())
        .await
        .expect("Failed to connect to WebSocket");

    let msg = tokio::time::timeout(WAIT, ws.recv())
        .await
        .expect("Timeout waiting for WebSocket message")
        .expect("WebSocket closed unexpectedly");
    assert!(matches!(msg, WsMessage::Connected { .. }));
}

#[tokio::test]
async fn test_websocket_ping_pong() {
    let server = spawn_server().await;
    let client = server.client().expect("Failed to create client");
    let mut ws = WsClient::connect(&client.ws_stream_url())
        .await
        .expect("Failed to connect to WebSocket");

    ws.ping().await.expect("Failed to send ping");

    let pong = tokio::time::timeout(WAIT, ws.recv_until(|m| matches!(m, WsMessage::Pong { .. })))
        .await
        .expect("Timeout waiting for pong");
    assert!(pong.is_some());
}

#[tokio::test]
async fn test_websocket_subscribe_receives_ticks() {
    let server = spawn_server().await;
    let client = logged_in_client(&server, "streamer").await;
    let mut ws = WsClient::connect(&client.ws_stream_url())
        .await
        .expect("Failed to connect to WebSocket");

    ws.subscribe(&["ticks"], &["NIFTY"])
        .await
        .expect("Failed to send subscribe command");
    let subscribed = tokio::time::timeout(
        WAIT,
        ws.recv_until(|m| matches!(m, WsMessage::Subscribed { .. })),
    )
    .await
    .expect("Timeout waiting for subscription");
    match subscribed {
        Some(WsMessage::Subscribed { subscriptions }) => {
            assert_eq!(subscriptions.symbols, ["NIFTY"]);
        }
        other => panic!("unexpected message: {other:?}"),
    }

    server.tick();
    if server.state.is_some() {
        let tick = tokio::time::timeout(WAIT, ws.recv_until(|m| matches!(m, WsMessage::Tick(_))))
            .await
            .expect("Timeout waiting for tick");
        match tick {
            Some(WsMessage::Tick(tick)) => assert_eq!(tick.symbol, "NIFTY"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_websocket_heartbeat() {
    let server = spawn_server().await;
    let client = server.client().expect("Failed to create client");
    let mut ws = WsClient::connect(&client.ws_stream_url())
        .await
        .expect("Failed to connect to WebSocket");

    let heartbeat = tokio::time::timeout(
        WAIT,
        ws.recv_until(|m| matches!(m, WsMessage::Heartbeat { .. })),
    )
    .await;
    if server.state.is_some() {
        assert!(matches!(heartbeat, Ok(Some(_))));
    }
}

#[tokio::test]
async fn test_stream_stats_public_connections_admin_only() {
    let server = spawn_server().await;
    let anonymous = server.client().expect("Failed to create client");
    let mut ws = WsClient::connect(&anonymous.ws_stream_url())
        .await
        .expect("Failed to connect to WebSocket");
    tokio::time::timeout(WAIT, ws.recv())
        .await
        .expect("Timeout waiting for welcome");

    let stats = anonymous
        .get_stream_stats()
        .await
        .expect("Failed to get stream stats");
    assert!(stats.active_connections >= 1);

    match anonymous.list_stream_connections().await {
        Err(Error::Api { status, .. }) => assert_eq!(status, 401),
        other => panic!("unexpected result: {other:?}"),
    }

    let trader = logged_in_client(&server, "peeker").await;
    match trader.list_stream_connections().await {
        Err(Error::Api { status, .. }) => assert_eq!(status, 403),
        other => panic!("unexpected result: {other:?}"),
    }
}
