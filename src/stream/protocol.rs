//! Stream wire protocol and per-connection subscriptions.

use super::hub::{StreamEvent, StreamHub, StreamStats};
use crate::db::{RiskAlert, TickData};
use crate::option_chain::ChainSummary;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

/// Event channels a connection can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Market ticks.
    Ticks,
    /// Option chain summaries.
    OptionChain,
    /// Risk alerts of the connected user.
    Alerts,
}

impl Channel {
    /// Every channel.
    pub const ALL: [Channel; 3] = [Channel::Ticks, Channel::OptionChain, Channel::Alerts];
}

/// What a connection receives. An empty symbol set means every symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Subscriptions {
    /// Subscribed channels.
    pub channels: BTreeSet<Channel>,
    /// Subscribed symbols, uppercase.
    pub symbols: BTreeSet<String>,
}

fn normalize_symbols(symbols: Vec<String>) -> impl Iterator<Item = String> {
    symbols
        .into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
}

impl Subscriptions {
    /// Subscriptions for the given channels and symbols.
    #[must_use]
    pub fn new(channels: impl IntoIterator<Item = Channel>, symbols: Vec<String>) -> Self {
        Self {
            channels: channels.into_iter().collect(),
            symbols: normalize_symbols(symbols).collect(),
        }
    }

    /// Adds channels and symbols. No channels means every channel.
    pub fn subscribe(&mut self, channels: Vec<Channel>, symbols: Vec<String>) {
        if channels.is_empty() {
            self.channels.extend(Channel::ALL);
        } else {
            self.channels.extend(channels);
        }
        self.symbols.extend(normalize_symbols(symbols));
    }

    /// Removes channels and symbols. With neither given, removes everything.
    ///
    /// Removing the last symbol also drops every channel, so that the empty
    /// symbol set does not widen into "all symbols".
    pub fn unsubscribe(&mut self, channels: Vec<Channel>, symbols: Vec<String>) {
        if channels.is_empty() && symbols.is_empty() {
            self.channels.clear();
            self.symbols.clear();
            return;
        }
        for channel in &channels {
            self.channels.remove(channel);
        }
        if !symbols.is_empty() {
            let had_symbols = !self.symbols.is_empty();
            for symbol in normalize_symbols(symbols) {
                self.symbols.remove(&symbol);
            }
            if had_symbols && self.symbols.is_empty() {
                self.channels.clear();
            }
        }
    }

    fn covers_symbol(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.contains(symbol)
    }

    /// Whether `event` should be delivered to a connection of `user_id`.
    #[must_use]
    pub fn matches(&self, event: &StreamEvent, user_id: Option<Uuid>) -> bool {
        if !self.channels.contains(&event.channel()) {
            return false;
        }
        match event {
            StreamEvent::Tick(tick) => self.covers_symbol(&tick.symbol),
            StreamEvent::OptionChain(summary) => self.covers_symbol(&summary.underlying),
            StreamEvent::Alert(alert) => user_id == Some(alert.user_id),
        }
    }
}

/// Commands sent by clients.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Add channels and symbols.
    Subscribe {
        /// Channels; empty means all.
        #[serde(default)]
        channels: Vec<Channel>,
        /// Symbols; empty means all.
        #[serde(default)]
        symbols: Vec<String>,
    },
    /// Remove channels and symbols.
    Unsubscribe {
        /// Channels to remove.
        #[serde(default)]
        channels: Vec<Channel>,
        /// Symbols to remove.
        #[serde(default)]
        symbols: Vec<String>,
    },
    /// Liveness check.
    Ping,
    /// Request hub statistics.
    Stats,
}

/// Messages sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established.
    Connected {
        /// Connection identifier.
        connection_id: Uuid,
        /// Welcome message.
        message: String,
        /// Initial subscriptions.
        subscriptions: Subscriptions,
    },
    /// Subscriptions after a subscribe command.
    Subscribed {
        /// Current subscriptions.
        subscriptions: Subscriptions,
    },
    /// Subscriptions after an unsubscribe command.
    Unsubscribed {
        /// Current subscriptions.
        subscriptions: Subscriptions,
    },
    /// Reply to `ping`.
    Pong {
        /// Timestamp in milliseconds.
        timestamp: u64,
    },
    /// Reply to `stats`.
    Stats(StreamStats),
    /// Periodic keep-alive.
    Heartbeat {
        /// Timestamp in milliseconds.
        timestamp: u64,
    },
    /// The connection fell behind and missed events.
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
    Tick(TickData),
    /// Option chain summary.
    OptionChain(ChainSummary),
    /// Risk alert.
    Alert(RiskAlert),
}

impl From<StreamEvent> for ServerMessage {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Tick(tick) => Self::Tick(tick),
            StreamEvent::OptionChain(summary) => Self::OptionChain(summary),
            StreamEvent::Alert(alert) => Self::Alert(alert),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Applies a client command to `subscriptions` and returns the reply.
///
/// Malformed input produces an `error` reply; the connection stays open.
pub fn handle_message(text: &str, subscriptions: &mut Subscriptions, hub: &StreamHub) -> ServerMessage {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "Rejected stream command");
            return ServerMessage::Error {
                message: format!("invalid command: {e}"),
            };
        }
    };

    match command {
        ClientCommand::Subscribe { channels, symbols } => {
            subscriptions.subscribe(channels, symbols);
            ServerMessage::Subscribed {
                subscriptions: subscriptions.clone(),
            }
        }
        ClientCommand::Unsubscribe { channels, symbols } => {
            subscriptions.unsubscribe(channels, symbols);
            ServerMessage::Unsubscribed {
                subscriptions: subscriptions.clone(),
            }
        }
        ClientCommand::Ping => ServerMessage::Pong { timestamp: now_ms() },
        ClientCommand::Stats => ServerMessage::Stats(hub.stats()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AlertSeverity;
    use crate::test_support::tick;

    fn hub() -> StreamHub {
        StreamHub::new(16, 10)
    }

    fn alert_for(user_id: Uuid) -> RiskAlert {
        RiskAlert {
            id: Uuid::new_v4(),
            user_id,
            alert_type: "order_rejected".to_string(),
            severity: AlertSeverity::Warning,
            message: "limit".to_string(),
            acknowledged: false,
            created_at: Utc::now(),
            acknowledged_at: None,
        }
    }

    #[test]
    fn test_subscribe_defaults_to_all_channels() {
        let mut subs = Subscriptions::default();
        let reply = handle_message(r#"{"action":"subscribe","symbols":["nifty"," "]}"#, &mut subs, &hub());
        assert!(matches!(reply, ServerMessage::Subscribed { .. }));
        assert_eq!(subs.channels.len(), 3);
        assert_eq!(subs.symbols.iter().collect::<Vec<_>>(), vec!["NIFTY"]);
    }

    #[test]
    fn test_subscribe_accumulates() {
        let mut subs = Subscriptions::default();
        let h = hub();
        handle_message(r#"{"action":"subscribe","channels":["ticks"],"symbols":["NIFTY"]}"#, &mut subs, &h);
        handle_message(r#"{"action":"subscribe","channels":["alerts"],"symbols":["BANKNIFTY"]}"#, &mut subs, &h);
        assert_eq!(
            subs.channels,
            [Channel::Ticks, Channel::Alerts].into_iter().collect()
        );
        assert_eq!(subs.symbols.len(), 2);
    }

    #[test]
    fn test_unsubscribe_rules() {
        let h = hub();
        let mut subs = Subscriptions::new(Channel::ALL, vec!["NIFTY".into(), "BANKNIFTY".into()]);

        handle_message(r#"{"action":"unsubscribe","channels":["alerts"]}"#, &mut subs, &h);
        assert!(!subs.channels.contains(&Channel::Alerts));
        assert_eq!(subs.symbols.len(), 2);

        handle_message(r#"{"action":"unsubscribe","symbols":["nifty"]}"#, &mut subs, &h);
        assert_eq!(subs.symbols.len(), 1);
        assert_eq!(subs.channels.len(), 2);

        // Dropping the last symbol must not widen to all symbols.
        handle_message(r#"{"action":"unsubscribe","symbols":["BANKNIFTY"]}"#, &mut subs, &h);
        assert!(subs.symbols.is_empty());
        assert!(subs.channels.is_empty());

        let mut subs = Subscriptions::new(Channel::ALL, vec!["NIFTY".into()]);
        handle_message(r#"{"action":"unsubscribe"}"#, &mut subs, &h);
        assert_eq!(subs, Subscriptions::default());
    }

    #[test]
    fn test_bad_input_yields_error_reply() {
        let mut subs = Subscriptions::default();
        let h = hub();
        for text in ["not json", r#"{"action":"explode"}"#, r#"{"channels":["ticks"]}"#, r#"{"action":"subscribe","channels":["weather"]}"#] {
            let reply = handle_message(text, &mut subs, &h);
            assert!(matches!(reply, ServerMessage::Error { .. }), "{text}");
        }
        assert_eq!(subs, Subscriptions::default());
    }

    #[test]
    fn test_ping_and_stats() {
        let mut subs = Subscriptions::default();
        let h = hub();
        assert!(matches!(
            handle_message(r#"{"action":"ping"}"#, &mut subs, &h),
            ServerMessage::Pong { .. }
        ));
        match handle_message(r#"{"action":"stats"}"#, &mut subs, &h) {
            ServerMessage::Stats(stats) => assert_eq!(stats.max_connections, 10),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_matching() {
        let alice = Uuid::new_v4();
        let ticks_nifty = Subscriptions::new([Channel::Ticks], vec!["NIFTY".into()]);
        assert!(ticks_nifty.matches(&StreamEvent::Tick(tick("NIFTY", 1.0)), None));
        assert!(!ticks_nifty.matches(&StreamEvent::Tick(tick("BANKNIFTY", 1.0)), None));

        let everything = Subscriptions::new(Channel::ALL, vec![]);
        assert!(everything.matches(&StreamEvent::Tick(tick("ANY", 1.0)), None));
        assert!(everything.matches(&StreamEvent::Alert(alert_for(alice)), Some(alice)));
        assert!(!everything.matches(&StreamEvent::Alert(alert_for(alice)), Some(Uuid::new_v4())));
        assert!(!everything.matches(&StreamEvent::Alert(alert_for(alice)), None));

        assert!(!Subscriptions::default().matches(&StreamEvent::Tick(tick("NIFTY", 1.0)), None));
    }

    #[test]
    fn test_server_message_wire_format() {
        let json = serde_json::to_value(ServerMessage::from(StreamEvent::Tick(tick("NIFTY", 10.0)))).unwrap();
        assert_eq!(json["type"], "tick");
        assert_eq!(json["data"]["symbol"], "NIFTY");

        let json = serde_json::to_value(ServerMessage::Lagged { dropped: 3 }).unwrap();
        assert_eq!(json["type"], "lagged");
        assert_eq!(json["data"]["dropped"], 3);
    }
}
