use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::connection_manager::{ConnectionError, ConnectionManager};
use crate::metrics::EventMetrics;
use crate::websocket::ServerEvent;

use super::broadcaster::{BroadcastTarget, Broadcaster, DeliveryResult};
use super::events::{self, DisconnectReason, EventError, InboundEvent, NewMessage};

/// What happened to one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled(DeliveryResult),
    Dropped(DropReason),
}

impl DispatchOutcome {
    fn handled() -> Self {
        Self::Handled(DeliveryResult::default())
    }

    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }

    /// Number of connections the resulting event was queued for
    pub fn delivered(&self) -> usize {
        match self {
            Self::Handled(result) => result.delivered,
            Self::Dropped(_) => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Connection already gone; a benign race with disconnect
    UnknownConnection,
    Invalid(EventError),
    Rejected(ConnectionError),
}

impl DropReason {
    fn label(&self) -> &'static str {
        match self {
            Self::UnknownConnection => "unknown_connection",
            Self::Invalid(e) => e.label(),
            Self::Rejected(_) => "user_conflict",
        }
    }
}

/// Statistics for the event dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub events_received: AtomicU64,
    pub events_dropped: AtomicU64,
    pub broadcasts: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_failed: AtomicU64,
    pub disconnects: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }

    fn record_delivery(&self, result: DeliveryResult) {
        self.total_delivered
            .fetch_add(result.delivered as u64, Ordering::Relaxed);
        self.total_failed
            .fetch_add(result.failed as u64, Ordering::Relaxed);
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub events_received: u64,
    pub events_dropped: u64,
    pub broadcasts: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub disconnects: u64,
}

/// Routes inbound events from a connection to the registry and broadcaster
pub struct EventDispatcher {
    connection_manager: Arc<ConnectionManager>,
    broadcaster: Broadcaster,
    stats: DispatcherStats,
}

impl EventDispatcher {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        let broadcaster = Broadcaster::new(connection_manager.clone());
        Self {
            connection_manager,
            broadcaster,
            stats: DispatcherStats::default(),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Dispatch a raw `(name, payload)` pair as received from a client
    pub fn dispatch_named(&self, connection_id: Uuid, name: &str, payload: Value) -> DispatchOutcome {
        match InboundEvent::from_frame(name, payload) {
            Ok(event) => self.dispatch(connection_id, event),
            Err(e) => {
                self.stats.events_received.fetch_add(1, Ordering::Relaxed);
                EventMetrics::record_received(name_label(name));
                self.drop_event(connection_id, name, DropReason::Invalid(e))
            }
        }
    }

    /// Dispatch one typed event for a connection
    #[tracing::instrument(
        name = "dispatcher.dispatch",
        skip(self, event),
        fields(event = event.name())
    )]
    pub fn dispatch(&self, connection_id: Uuid, event: InboundEvent) -> DispatchOutcome {
        let name = event.name();
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        EventMetrics::record_received(name);

        match event {
            InboundEvent::Disconnect(reason) => self.disconnect(connection_id, reason),
            _ if !self.connection_manager.contains(connection_id) => {
                self.drop_event(connection_id, name, DropReason::UnknownConnection)
            }
            InboundEvent::Setup { user_id } => self.handle_setup(connection_id, user_id),
            InboundEvent::JoinChat { room } => {
                self.connection_manager.join(connection_id, &room);
                tracing::info!(connection_id = %connection_id, room = %room, "User joined room");
                DispatchOutcome::handled()
            }
            InboundEvent::Typing { room } => {
                self.relay_to_room(connection_id, room, ServerEvent::Typing)
            }
            InboundEvent::StopTyping { room } => {
                self.relay_to_room(connection_id, room, ServerEvent::StopTyping)
            }
            InboundEvent::NewMessage(message) => self.handle_new_message(connection_id, message),
        }
    }

    /// Tear down a connection: leave every room, drop the registry entry and
    /// tell the socket task to stop. Safe to call more than once.
    pub fn disconnect(&self, connection_id: Uuid, reason: DisconnectReason) -> DispatchOutcome {
        let handle = self.connection_manager.get_connection(connection_id);

        match self.connection_manager.deregister(connection_id) {
            Some(info) => {
                self.stats.disconnects.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    connection_id = %connection_id,
                    user_id = ?info.user_id,
                    reason = reason.as_str(),
                    "User disconnected"
                );
            }
            None => {
                tracing::debug!(connection_id = %connection_id, "Disconnect for unknown connection");
            }
        }

        if let Some(handle) = handle {
            handle.close();
        }

        DispatchOutcome::handled()
    }

    fn handle_setup(&self, connection_id: Uuid, user_id: Option<String>) -> DispatchOutcome {
        if let Some(user_id) = user_id {
            if let Err(e) = self.connection_manager.associate_user(connection_id, &user_id) {
                return self.drop_event(connection_id, events::SETUP, DropReason::Rejected(e));
            }
            self.connection_manager.join(connection_id, &user_id);
            tracing::info!(connection_id = %connection_id, user_id = %user_id, "User set up");
        } else {
            tracing::debug!(connection_id = %connection_id, "Setup without user id");
        }

        let result = self.broadcaster.emit(connection_id, ServerEvent::Connected);
        self.stats.record_delivery(result);
        DispatchOutcome::Handled(result)
    }

    fn relay_to_room(&self, connection_id: Uuid, room: String, event: ServerEvent) -> DispatchOutcome {
        let result = self
            .broadcaster
            .broadcast(&BroadcastTarget::Room(room), event, Some(connection_id));
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats.record_delivery(result);
        DispatchOutcome::Handled(result)
    }

    fn handle_new_message(&self, connection_id: Uuid, message: NewMessage) -> DispatchOutcome {
        let recipients = message.recipients();
        let mut total = DeliveryResult::default();

        for user_id in &recipients {
            let result = self.broadcaster.broadcast(
                &BroadcastTarget::User(user_id.to_string()),
                ServerEvent::MessageReceived(message.payload.clone()),
                Some(connection_id),
            );
            self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
            total = total.merge(result);
        }

        self.stats.record_delivery(total);

        tracing::debug!(
            connection_id = %connection_id,
            sender_id = %message.sender_id,
            recipients = recipients.len(),
            delivered = total.delivered,
            "Relayed new message"
        );

        DispatchOutcome::Handled(total)
    }

    fn drop_event(&self, connection_id: Uuid, name: &str, reason: DropReason) -> DispatchOutcome {
        self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
        EventMetrics::record_dropped(reason.label());

        match &reason {
            DropReason::UnknownConnection => {
                tracing::debug!(connection_id = %connection_id, event = %name, "Dropping event for unknown connection");
            }
            DropReason::Invalid(e) => {
                tracing::warn!(connection_id = %connection_id, event = %name, error = %e, "Dropping malformed event");
            }
            DropReason::Rejected(e) => {
                tracing::warn!(connection_id = %connection_id, event = %name, error = %e, "Rejected event");
            }
        }

        DispatchOutcome::Dropped(reason)
    }
}

/// Keep metric label cardinality bounded for names clients make up
fn name_label(name: &str) -> &'static str {
    match name {
        events::SETUP => events::SETUP,
        events::JOIN_CHAT => events::JOIN_CHAT,
        events::TYPING => events::TYPING,
        events::STOP_TYPING => events::STOP_TYPING,
        events::NEW_MESSAGE => events::NEW_MESSAGE,
        _ => "other",
    }
}
