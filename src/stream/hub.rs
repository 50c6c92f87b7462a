//! Fan-out hub for live stream events.

use super::protocol::{Channel, Subscriptions};
use crate::db::{RiskAlert, TickData};
use crate::error::ApiError;
use crate::option_chain::ChainSummary;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Event published to every stream connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Market tick.
    Tick(TickData),
    /// Option chain summary.
    OptionChain(ChainSummary),
    /// Risk alert for one user.
    Alert(RiskAlert),
}

impl StreamEvent {
    /// Channel the event belongs to.
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::Tick(_) => Channel::Ticks,
            Self::OptionChain(_) => Channel::OptionChain,
            Self::Alert(_) => Channel::Alerts,
        }
    }
}

/// Stream route a connection came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// `/ws/stream`, all channels.
    Stream,
    /// `/ws/ticks`, tick channel only.
    Ticks,
}

/// A live connection as reported by `/ws/connections`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub id: Uuid,
    /// Route used.
    pub kind: ConnectionKind,
    /// Remote address.
    pub peer: Option<String>,
    /// Authenticated user.
    pub user_id: Option<Uuid>,
    /// Connection time.
    pub connected_at: DateTime<Utc>,
    /// Current subscriptions.
    pub subscriptions: Subscriptions,
    /// Messages delivered.
    pub messages_sent: u64,
}

/// Hub counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct StreamStats {
    /// Open connections.
    pub active_connections: usize,
    /// Connection limit.
    pub max_connections: usize,
    /// Connections accepted since startup.
    pub total_connections: u64,
    /// Upgrades refused at the limit.
    pub rejected_connections: u64,
    /// Events published.
    pub events_published: u64,
    /// Messages delivered to clients.
    pub messages_sent: u64,
    /// Events skipped by lagging connections.
    pub messages_dropped: u64,
}

struct ConnectionEntry {
    id: Uuid,
    kind: ConnectionKind,
    peer: Option<String>,
    user_id: Option<Uuid>,
    connected_at: DateTime<Utc>,
    subscriptions: Arc<RwLock<Subscriptions>>,
    messages_sent: AtomicU64,
}

impl ConnectionEntry {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            kind: self.kind,
            peer: self.peer.clone(),
            user_id: self.user_id,
            connected_at: self.connected_at,
            subscriptions: self.subscriptions.read().clone(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
        }
    }
}

/// Broadcast channel plus connection registry and counters.
pub struct StreamHub {
    tx: broadcast::Sender<StreamEvent>,
    connections: DashMap<Uuid, Arc<ConnectionEntry>>,
    max_connections: usize,
    slots: AtomicUsize,
    total_connections: AtomicU64,
    rejected_connections: AtomicU64,
    events_published: AtomicU64,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// A connection slot held between the upgrade request and registration.
///
/// Dropping it unused frees the slot.
pub struct Reservation {
    hub: Arc<StreamHub>,
    released: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.released {
            self.hub.slots.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// A registered connection. Dropping it deregisters the connection.
pub struct ConnectionHandle {
    hub: Arc<StreamHub>,
    entry: Arc<ConnectionEntry>,
}

impl ConnectionHandle {
    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.entry.id
    }

    /// Authenticated user.
    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.entry.user_id
    }

    /// Shared subscriptions of the connection.
    #[must_use]
    pub fn subscriptions(&self) -> Arc<RwLock<Subscriptions>> {
        Arc::clone(&self.entry.subscriptions)
    }

    /// Counts a delivered message.
    pub fn record_sent(&self) {
        self.entry.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.hub.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts events the connection skipped.
    pub fn record_lagged(&self, dropped: u64) {
        self.hub.messages_dropped.fetch_add(dropped, Ordering::Relaxed);
        warn!(connection_id = %self.entry.id, dropped, "Stream consumer lagged");
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.hub.connections.remove(&self.entry.id);
        self.hub.slots.fetch_sub(1, Ordering::AcqRel);
        debug!(connection_id = %self.entry.id, "Stream connection deregistered");
    }
}

impl StreamHub {
    /// Creates a hub with the given channel capacity and connection limit.
    #[must_use]
    pub fn new(capacity: usize, max_connections: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            connections: DashMap::new(),
            max_connections,
            slots: AtomicUsize::new(0),
            total_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Publishes an event. Returns the number of receivers it reached.
    pub fn publish(&self, event: StreamEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        // No receivers is not an error for a market feed.
        self.tx.send(event).unwrap_or(0)
    }

    /// New receiver of published events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Claims a connection slot.
    ///
    /// # Errors
    /// Returns `ServiceUnavailable` when the connection limit is reached.
    pub fn try_reserve(self: &Arc<Self>) -> Result<Reservation, ApiError> {
        let claimed = self
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.max_connections).then_some(used + 1)
            });
        match claimed {
            Ok(_) => Ok(Reservation {
                hub: Arc::clone(self),
                released: false,
            }),
            Err(_) => {
                self.rejected_connections.fetch_add(1, Ordering::Relaxed);
                Err(ApiError::ServiceUnavailable(format!(
                    "stream connection limit of {} reached",
                    self.max_connections
                )))
            }
        }
    }

    /// Turns a reservation into a registered connection.
    #[must_use]
    pub fn register(
        &self,
        mut reservation: Reservation,
        kind: ConnectionKind,
        peer: Option<String>,
        user_id: Option<Uuid>,
        subscriptions: Subscriptions,
    ) -> ConnectionHandle {
        reservation.released = true;
        let entry = Arc::new(ConnectionEntry {
            id: Uuid::new_v4(),
            kind,
            peer,
            user_id,
            connected_at: Utc::now(),
            subscriptions: Arc::new(RwLock::new(subscriptions)),
            messages_sent: AtomicU64::new(0),
        });
        self.connections.insert(entry.id, Arc::clone(&entry));
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionHandle {
            hub: Arc::clone(&reservation.hub),
            entry,
        }
    }

    /// Open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Open connections, oldest first.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> =
            self.connections.iter().map(|e| e.value().info()).collect();
        list.sort_by_key(|c| c.connected_at);
        list
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            active_connections: self.connections.len(),
            max_connections: self.max_connections,
            total_connections: self.total_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}
