//! WebSocket client for the live stream.

use crate::error::Error;
use crate::types::{StreamStats, Tick};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Channels and symbols a connection receives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSubscriptions {
    /// Subscribed channels (`ticks`, `option_chain`, `alerts`).
    pub channels: Vec<String>,
    /// Subscribed symbols; empty means every symbol.
    pub symbols: Vec<String>,
}

/// Messages received from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    /// Connection established.
    Connected {
        /// Connection identifier.
        connection_id: String,
        /// Welcome message.
        message: String,
        /// Initial subscriptions.
        subscriptions: StreamSubscriptions,
    },
    /// Subscriptions after a subscribe command.
    Subscribed {
        /// Current subscriptions.
        subscriptions: StreamSubscriptions,
    },
    /// Subscriptions after an unsubscribe command.
    Unsubscribed {
        /// Current subscriptions.
        subscriptions: StreamSubscriptions,
    },
    /// Reply to `ping`.
    Pong {
        /// Timestamp in milliseconds.
        timestamp: u64,
    },
    /// Reply to `stats`.
    Stats(StreamStats),
    /// Keep-alive.
    Heartbeat {
        /// Timestamp in milliseconds.
        timestamp: u64,
    },
    /// The connection missed events.
    Lagged {
        /// Events skipped.
        dropped: u64,
    },
    /// Command could not be handled.
    Error {
        /// What went wrong.
        message: String,
    },
    /// Market tick.
    Tick(Tick),
    /// Option chain summary.
    OptionChain(serde_json::Value),
    /// Risk alert.
    Alert(serde_json::Value),
}

/// Commands that can be sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Add channels and symbols. Empty channels means every channel.
    Subscribe {
        /// Channels.
        channels: Vec<String>,
        /// Symbols.
        symbols: Vec<String>,
    },
    /// Remove channels and symbols. Both empty removes everything.
    Unsubscribe {
        /// Channels.
        channels: Vec<String>,
        /// Symbols.
        symbols: Vec<String>,
    },
    /// Liveness check.
    Ping,
    /// Request hub statistics.
    Stats,
}

impl ClientCommand {
    /// Creates a subscribe command.
    #[must_use]
    pub fn subscribe(channels: &[&str], symbols: &[&str]) -> Self {
        Self::Subscribe {
            channels: channels.iter().map(|c| (*c).to_string()).collect(),
            symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Creates an unsubscribe command.
    #[must_use]
    pub fn unsubscribe(channels: &[&str], symbols: &[&str]) -> Self {
        Self::Unsubscribe {
            channels: channels.iter().map(|c| (*c).to_string()).collect(),
            symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// WebSocket client for receiving real-time updates.
pub struct WsClient {
    rx: mpsc::Receiver<WsMessage>,
    tx: mpsc::Sender<ClientCommand>,
}

impl WsClient {
    /// Connects to the WebSocket server.
    ///
    /// # Arguments
    /// * `url` - WebSocket URL (e.g., "ws://localhost:8000/api/v1/ws/stream")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let (ws_stream, _) = connect_async(url).await.map_err(Box::new)?;
        let (mut write, mut read) = ws_stream.split();

        let (msg_tx, msg_rx) = mpsc::channel::<WsMessage>(100);
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientCommand>(100);

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Ok(ws_msg) = serde_json::from_str::<WsMessage>(&text)
                            && msg_tx.send(ws_msg).await.is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Err(_) => break,
                    _ => {}
                }
            }
        });

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if let Ok(json) = serde_json::to_string(&cmd)
                    && write.send(Message::Text(json.into())).await.is_err()
                {
                    break;
                }
            }
        });

        Ok(Self {
            rx: msg_rx,
            tx: cmd_tx,
        })
    }

    /// Receives the next message from the server.
    ///
    /// Returns `None` if the connection is closed.
    pub async fn recv(&mut self) -> Option<WsMessage> {
        self.rx.recv().await
    }

    /// Receives messages until one satisfies `predicate`, skipping the rest.
    ///
    /// Returns `None` if the connection closes first.
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> Option<WsMessage>
    where
        F: FnMut(&WsMessage) -> bool,
    {
        while let Some(msg) = self.rx.recv().await {
            if predicate(&msg) {
                return Some(msg);
            }
        }
        None
    }

    /// Sends a command to the server.
    ///
    /// # Errors
    /// Returns error if the send fails.
    pub async fn send(&self, cmd: ClientCommand) -> Result<(), Error> {
        self.tx.send(cmd).await.map_err(|_| Error::ConnectionClosed)
    }

    /// Subscribes to channels for symbols.
    ///
    /// # Errors
    /// Returns error if the send fails.
    pub async fn subscribe(&self, channels: &[&str], symbols: &[&str]) -> Result<(), Error> {
        self.send(ClientCommand::subscribe(channels, symbols)).await
    }

    /// Unsubscribes from channels or symbols.
    ///
    /// # Errors
    /// Returns error if the send fails.
    pub async fn unsubscribe(&self, channels: &[&str], symbols: &[&str]) -> Result<(), Error> {
        self.send(ClientCommand::unsubscribe(channels, symbols)).await
    }

    /// Sends a ping.
    ///
    /// # Errors
    /// Returns error if the send fails.
    pub async fn ping(&self) -> Result<(), Error> {
        self.send(ClientCommand::Ping).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_value(ClientCommand::subscribe(&["ticks"], &["NIFTY"])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "subscribe", "channels": ["ticks"], "symbols": ["NIFTY"]})
        );
        let json = serde_json::to_value(ClientCommand::Ping).unwrap();
        assert_eq!(json, serde_json::json!({"action": "ping"}));
    }

    #[test]
    fn test_server_message_parsing() {
        let text = r#"{"type":"connected","data":{"connection_id":"c1","message":"hi","subscriptions":{"channels":["ticks"],"symbols":[]}}}"#;
        let msg: WsMessage = serde_json::from_str(text).unwrap();
        assert!(matches!(msg, WsMessage::Connected { ref subscriptions, .. } if subscriptions.channels == ["ticks"]));

        let text = r#"{"type":"tick","data":{"symbol":"NIFTY","ltp":22500.0,"bid":22499.95,"ask":22500.05,"volume":10,"change":0.0,"change_pct":0.0,"timestamp_ms":1}}"#;
        let msg: WsMessage = serde_json::from_str(text).unwrap();
        assert!(matches!(msg, WsMessage::Tick(tick) if tick.symbol == "NIFTY"));

        let text = r#"{"type":"lagged","data":{"dropped":7}}"#;
        let msg: WsMessage = serde_json::from_str(text).unwrap();
        assert!(matches!(msg, WsMessage::Lagged { dropped: 7 }));
    }
}
