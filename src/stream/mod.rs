//! Live market streaming.
//!
//! [`StreamHub`] fans events out over a `tokio::sync::broadcast` channel and
//! keeps the registry of open WebSocket connections. [`MarketFeed`] produces
//! the ticks and option chain summaries. The [`protocol`] module holds the
//! client commands, server messages and per-connection subscriptions.

mod feed;
mod hub;
pub mod protocol;

pub use feed::MarketFeed;
pub use hub::{
    ConnectionHandle, ConnectionInfo, ConnectionKind, Reservation, StreamEvent, StreamHub,
    StreamStats,
};
pub use protocol::{Channel, ClientCommand, ServerMessage, Subscriptions, handle_message};
