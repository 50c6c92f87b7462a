//! WebSocket streaming endpoints.
//!
//! `/ws/stream` starts with no subscriptions and is driven by client
//! commands; `/ws/ticks` comes pre-subscribed to the tick channel for the
//! symbols in its query string. Both register with the [`StreamHub`] so the
//! connection limit, `/ws/stats` and `/ws/connections` see them.

use crate::api::extract::{AuthUser, ClientIp, api_key, authenticate, bearer_token};
use crate::config::parse_list;
use crate::error::ApiError;
use crate::settings::HEARTBEAT_SECS;
use crate::state::AppState;
use crate::stream::protocol::now_ms;
use crate::stream::{
    Channel, ConnectionInfo, ConnectionKind, Reservation, ServerMessage, StreamHub, StreamStats,
    Subscriptions, handle_message,
};
use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Pending command replies per connection.
const REPLY_BUFFER: usize = 32;

/// Optional credentials for stream connections.
///
/// Browsers cannot set headers on a WebSocket handshake, so the session token
/// or API key may also travel in the query string.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct StreamQuery {
    /// Session token.
    pub token: Option<String>,
    /// API key.
    pub api_key: Option<String>,
}

/// Query of `/ws/ticks`.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct TicksStreamQuery {
    /// Comma separated symbols; empty means every symbol.
    pub symbols: Option<String>,
    /// Session token.
    pub token: Option<String>,
    /// API key.
    pub api_key: Option<String>,
}

/// Stream availability.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StreamHealthResponse {
    /// Health status.
    pub status: String,
    /// Open connections.
    pub active_connections: usize,
    /// Connection limit.
    pub max_connections: usize,
    /// Whether new connections are accepted.
    pub accepting: bool,
}

/// Resolves the optional stream user.
///
/// Anonymous connections are allowed; a credential that is present but
/// invalid is rejected so clients notice expired tokens.
fn stream_user(
    state: &AppState,
    headers: &HeaderMap,
    token: Option<&str>,
    key: Option<&str>,
) -> Result<Option<Uuid>, ApiError> {
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        return state.accounts.authenticate_session(token).map(|u| Some(u.id));
    }
    if let Some(key) = key.filter(|k| !k.is_empty()) {
        return state.accounts.authenticate_api_key(key).map(|u| Some(u.id));
    }
    match authenticate(state, headers) {
        Ok(user) => Ok(Some(user.id)),
        Err(ApiError::Unauthorized(_)) if !has_credentials(headers) => Ok(None),
        Err(e) => Err(e),
    }
}

fn has_credentials(headers: &HeaderMap) -> bool {
    bearer_token(headers).is_some() || api_key(headers).is_some()
}

/// Multiplexed stream of ticks, option chain summaries and risk alerts.
#[utoipa::path(
    get,
    path = "/api/v1/ws/stream",
    params(StreamQuery),
    responses(
        (status = 101, description = "WebSocket connection established"),
        (status = 401, description = "Invalid credentials"),
        (status = 503, description = "Connection limit reached")
    ),
    tag = "WebSocket"
)]
pub async fn ws_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ClientIp(peer): ClientIp,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let user_id = stream_user(
        &state,
        &headers,
        query.token.as_deref(),
        query.api_key.as_deref(),
    )?;
    let reservation = state.hub.try_reserve()?;
    Ok(ws.on_upgrade(move |socket| {
        handle_socket(
            socket,
            state,
            reservation,
            ConnectionKind::Stream,
            peer,
            user_id,
            Subscriptions::default(),
        )
    }))
}

/// Tick stream for a fixed symbol list.
#[utoipa::path(
    get,
    path = "/api/v1/ws/ticks",
    params(TicksStreamQuery),
    responses(
        (status = 101, description = "WebSocket connection established"),
        (status = 400, description = "Invalid symbol list"),
        (status = 401, description = "Invalid credentials"),
        (status = 503, description = "Connection limit reached")
    ),
    tag = "WebSocket"
)]
pub async fn ws_ticks(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ClientIp(peer): ClientIp,
    headers: HeaderMap,
    Query(query): Query<TicksStreamQuery>,
) -> Result<Response, ApiError> {
    let mut symbols = match query.symbols.as_deref() {
        Some(raw) => parse_list(raw).map_err(|e| ApiError::InvalidRequest(e.to_string()))?,
        None => Vec::new(),
    };
    symbols.retain(|s| s != "*");
    let user_id = stream_user(
        &state,
        &headers,
        query.token.as_deref(),
        query.api_key.as_deref(),
    )?;
    let reservation = state.hub.try_reserve()?;
    let subscriptions = Subscriptions::new([Channel::Ticks], symbols);
    Ok(ws.on_upgrade(move |socket| {
        handle_socket(
            socket,
            state,
            reservation,
            ConnectionKind::Ticks,
            peer,
            user_id,
            subscriptions,
        )
    }))
}

/// Stream hub counters.
#[utoipa::path(
    get,
    path = "/api/v1/ws/stats",
    responses(
        (status = 200, description = "Stream statistics", body = StreamStats)
    ),
    tag = "WebSocket"
)]
pub async fn ws_stats(State(state): State<Arc<AppState>>) -> Json<StreamStats> {
    Json(state.hub.stats())
}

/// Open stream connections, oldest first (admin only).
#[utoipa::path(
    get,
    path = "/api/v1/ws/connections",
    responses(
        (status = 200, description = "Open connections", body = Vec<ConnectionInfo>),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required")
    ),
    tag = "WebSocket"
)]
pub async fn ws_connections(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<ConnectionInfo>>, ApiError> {
    auth.require_admin()?;
    Ok(Json(state.hub.connections()))
}

/// Whether the stream accepts connections.
#[utoipa::path(
    get,
    path = "/api/v1/ws/health",
    responses(
        (status = 200, description = "Stream health", body = StreamHealthResponse)
    ),
    tag = "WebSocket"
)]
pub async fn ws_health(State(state): State<Arc<AppState>>) -> Json<StreamHealthResponse> {
    let stats = state.hub.stats();
    let accepting = stats.active_connections < stats.max_connections;
    Json(StreamHealthResponse {
        status: if accepting { "healthy" } else { "saturated" }.to_string(),
        active_connections: stats.active_connections,
        max_connections: stats.max_connections,
        accepting,
    })
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}

fn heartbeat_interval(state: &AppState) -> Duration {
    let secs = state
        .settings
        .u64_or(HEARTBEAT_SECS, state.config.stream.heartbeat_secs);
    Duration::from_secs(secs.max(1))
}

/// Drives one registered connection until either side closes.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    reservation: Reservation,
    kind: ConnectionKind,
    peer: Option<String>,
    user_id: Option<Uuid>,
    subscriptions: Subscriptions,
) {
    let handle = Arc::new(state.hub.register(
        reservation,
        kind,
        peer,
        user_id,
        subscriptions.clone(),
    ));
    let connection_id = handle.id();
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.hub.subscribe();

    let connected = ServerMessage::Connected {
        connection_id,
        message: "Connected to Velox stream".to_string(),
        subscriptions,
    };
    if send_json(&mut sender, &connected).await.is_err() {
        return;
    }
    handle.record_sent();
    info!(connection_id = %connection_id, kind = ?kind, user_id = ?user_id, "Stream client connected");

    // Replies to client commands go through the send task so one writer owns the sink.
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(REPLY_BUFFER);
    let recv_subscriptions = handle.subscriptions();
    let hub: Arc<StreamHub> = Arc::clone(&state.hub);
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let reply = {
                        let mut subscriptions = recv_subscriptions.write();
                        handle_message(&text, &mut subscriptions, &hub)
                    };
                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(connection_id = %connection_id, "Client closed stream");
                    break;
                }
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "Stream receive error");
                    break;
                }
                _ => {}
            }
        }
    });

    let heartbeat = heartbeat_interval(&state);
    let send_handle = Arc::clone(&handle);
    let mut send_task = tokio::spawn(async move {
        let filter = send_handle.subscriptions();
        let mut ticker = tokio::time::interval(heartbeat);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            let message = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        let wanted = filter.read().matches(&event, send_handle.user_id());
                        if !wanted {
                            continue;
                        }
                        ServerMessage::from(event)
                    }
                    Err(RecvError::Lagged(dropped)) => {
                        send_handle.record_lagged(dropped);
                        ServerMessage::Lagged { dropped }
                    }
                    Err(RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
                _ = ticker.tick() => ServerMessage::Heartbeat { timestamp: now_ms() },
            };
            if send_json(&mut sender, &message).await.is_err() {
                break;
            }
            send_handle.record_sent();
        }
    });

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    }

    info!(connection_id = %connection_id, "Stream connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::middleware::API_KEY_HEADER;
    use crate::test_support::{admin, app_state, trader};
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_stream_user_resolution() {
        let state = app_state();
        let user = trader(&state, "alice").await;
        let key = state.accounts.generate_api_key(user.id).await.unwrap();

        assert_eq!(stream_user(&state, &HeaderMap::new(), None, None).unwrap(), None);
        assert_eq!(
            stream_user(&state, &HeaderMap::new(), None, Some(&key.api_key)).unwrap(),
            Some(user.id)
        );

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(&key.api_key).unwrap());
        assert_eq!(stream_user(&state, &headers, None, None).unwrap(), Some(user.id));

        assert!(matches!(
            stream_user(&state, &HeaderMap::new(), Some("vs_expired"), None),
            Err(ApiError::Unauthorized(_))
        ));
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("vk_unknown"));
        assert!(matches!(
            stream_user(&state, &headers, None, None),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_and_health_track_connections() {
        let state = app_state();
        let Json(health) = ws_health(State(state.clone())).await;
        assert!(health.accepting);
        assert_eq!(health.active_connections, 0);

        let reservation = state.hub.try_reserve().unwrap();
        let handle = state.hub.register(
            reservation,
            ConnectionKind::Ticks,
            Some("10.0.0.1".to_string()),
            None,
            Subscriptions::new([Channel::Ticks], vec!["nifty".to_string()]),
        );

        let Json(stats) = ws_stats(State(state.clone())).await;
        assert_eq!(stats.active_connections, 1);

        let root = admin(&state, "root").await;
        let Json(connections) = ws_connections(State(state.clone()), AuthUser(root))
            .await
            .unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].id, handle.id());
        assert_eq!(connections[0].kind, ConnectionKind::Ticks);

        drop(handle);
        let Json(stats) = ws_stats(State(state)).await;
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_connections, 1);
    }

    #[tokio::test]
    async fn test_connection_list_requires_admin() {
        let state = app_state();
        let reservation = state.hub.try_reserve().unwrap();
        let _handle = state.hub.register(
            reservation,
            ConnectionKind::Stream,
            Some("10.0.0.9".to_string()),
            None,
            Subscriptions::default(),
        );

        let user = trader(&state, "mallory").await;
        assert!(matches!(
            ws_connections(State(state.clone()), AuthUser(user)).await,
            Err(ApiError::Forbidden(_))
        ));

        let body = serde_json::to_value(ws_stats(State(state)).await.0).unwrap();
        assert!(body.get("connections").is_none());
        assert_eq!(body["active_connections"], 1);
    }

    #[test]
    fn test_heartbeat_follows_settings() {
        let state = AppState::default();
        assert_eq!(
            heartbeat_interval(&state),
            Duration::from_secs(state.config.stream.heartbeat_secs)
        );
    }
}
