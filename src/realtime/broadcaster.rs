use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::connection_manager::{ConnectionHandle, ConnectionManager};
use crate::metrics::BroadcastMetrics;
use crate::websocket::{OutboundMessage, ServerEvent};

/// Recipient count from which the event is serialized once and shared
const PRESERIALIZATION_THRESHOLD: usize = 4;

/// Who a broadcast is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTarget {
    /// A chat room joined with `join chat`
    Room(String),
    /// Every connection of a user, via the personal channel named by the user id
    User(String),
}

impl BroadcastTarget {
    /// Room id the target resolves to
    pub fn room(&self) -> &str {
        match self {
            Self::Room(room) | Self::User(room) => room,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Room(_) => "room",
            Self::User(_) => "user",
        }
    }
}

/// Result of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// Connections the event was queued for
    pub delivered: usize,
    /// Connections whose queue was full or already closed
    pub failed: usize,
}

impl DeliveryResult {
    pub fn merge(self, other: DeliveryResult) -> DeliveryResult {
        DeliveryResult {
            delivered: self.delivered + other.delivered,
            failed: self.failed + other.failed,
        }
    }
}

/// Fans outbound events out to room members
#[derive(Clone)]
pub struct Broadcaster {
    connection_manager: Arc<ConnectionManager>,
}

impl Broadcaster {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    /// Deliver `event` to every member of `target` except `exclude`.
    ///
    /// The member set is snapshotted first; members that disconnect
    /// mid-broadcast are skipped. Sends never wait: a full or closed queue
    /// counts as a failed delivery and the loop carries on.
    #[tracing::instrument(
        name = "broadcaster.broadcast",
        skip(self, event),
        fields(room = %target.room(), event = event.name())
    )]
    pub fn broadcast(
        &self,
        target: &BroadcastTarget,
        event: ServerEvent,
        exclude: Option<Uuid>,
    ) -> DeliveryResult {
        let recipients: Vec<Arc<ConnectionHandle>> = self
            .connection_manager
            .room_members(target.room())
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| self.connection_manager.get_connection(id))
            .collect();

        BroadcastMetrics::record_broadcast(target.kind(), event.name());

        if recipients.is_empty() {
            return DeliveryResult::default();
        }

        let message = if recipients.len() >= PRESERIALIZATION_THRESHOLD {
            match OutboundMessage::preserialize(&event) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to pre-serialize event, sending raw");
                    OutboundMessage::Event(event)
                }
            }
        } else {
            OutboundMessage::Event(event)
        };

        let mut result = DeliveryResult::default();
        for handle in recipients {
            if deliver(&handle, message.clone()) {
                result.delivered += 1;
            } else {
                result.failed += 1;
            }
        }

        BroadcastMetrics::record_delivered(result.delivered as u64);
        BroadcastMetrics::record_failed(result.failed as u64);

        tracing::debug!(
            delivered = result.delivered,
            failed = result.failed,
            "Broadcast completed"
        );

        result
    }

    /// Send `event` to a single connection. Unknown connections are ignored.
    pub fn emit(&self, connection_id: Uuid, event: ServerEvent) -> DeliveryResult {
        let Some(handle) = self.connection_manager.get_connection(connection_id) else {
            return DeliveryResult::default();
        };

        if deliver(&handle, OutboundMessage::Event(event)) {
            BroadcastMetrics::record_delivered(1);
            DeliveryResult { delivered: 1, failed: 0 }
        } else {
            BroadcastMetrics::record_failed(1);
            DeliveryResult { delivered: 0, failed: 1 }
        }
    }
}

fn deliver(handle: &ConnectionHandle, message: OutboundMessage) -> bool {
    match handle.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::debug!(connection_id = %handle.id, "Outbound queue full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(connection_id = %handle.id, "Connection closed, dropping event");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn connect(
        manager: &ConnectionManager,
        buffer: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (manager.register(tx), rx)
    }

    fn event_name(message: OutboundMessage) -> String {
        let json = message.to_json().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["event"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let manager = Arc::new(ConnectionManager::new());
        let broadcaster = Broadcaster::new(manager.clone());
        let (a, mut rx_a) = connect(&manager, 8);
        let (b, mut rx_b) = connect(&manager, 8);
        manager.join(a.id, "room1");
        manager.join(b.id, "room1");

        let result = broadcaster.broadcast(
            &BroadcastTarget::Room("room1".into()),
            ServerEvent::Typing,
            Some(a.id),
        );

        assert_eq!(result, DeliveryResult { delivered: 1, failed: 0 });
        assert_eq!(event_name(rx_b.try_recv().unwrap()), "typing");
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_to_missing_room_is_noop() {
        let manager = Arc::new(ConnectionManager::new());
        let broadcaster = Broadcaster::new(manager);
        let result = broadcaster.broadcast(&BroadcastTarget::User("nobody".into()), ServerEvent::Typing, None);
        assert_eq!(result, DeliveryResult::default());
    }

    #[test]
    fn test_closed_and_full_queues_do_not_abort_loop() {
        let manager = Arc::new(ConnectionManager::new());
        let broadcaster = Broadcaster::new(manager.clone());
        let (closed, rx_closed) = connect(&manager, 8);
        let (full, _rx_full) = connect(&manager, 1);
        let (ok, mut rx_ok) = connect(&manager, 8);
        for conn in [&closed, &full, &ok] {
            manager.join(conn.id, "room1");
        }
        drop(rx_closed);
        full.try_send(OutboundMessage::Ping).unwrap();

        let result = broadcaster.broadcast(&BroadcastTarget::Room("room1".into()), ServerEvent::StopTyping, None);

        assert_eq!(result, DeliveryResult { delivered: 1, failed: 2 });
        assert_eq!(event_name(rx_ok.try_recv().unwrap()), "stop typing");
    }

    #[test]
    fn test_large_rooms_share_preserialized_payload() {
        let manager = Arc::new(ConnectionManager::new());
        let broadcaster = Broadcaster::new(manager.clone());
        let mut receivers = Vec::new();
        for _ in 0..PRESERIALIZATION_THRESHOLD {
            let (conn, rx) = connect(&manager, 8);
            manager.join(conn.id, "u9");
            receivers.push(rx);
        }

        let payload = json!({"content": "hi"});
        let result = broadcaster.broadcast(
            &BroadcastTarget::User("u9".into()),
            ServerEvent::MessageReceived(payload),
            None,
        );

        assert_eq!(result.delivered, PRESERIALIZATION_THRESHOLD);
        for mut rx in receivers {
            let message = rx.try_recv().unwrap();
            assert!(matches!(message, OutboundMessage::Preserialized(_)));
            assert_eq!(event_name(message), "message received");
        }
    }

    #[test]
    fn test_emit_to_unknown_connection() {
        let manager = Arc::new(ConnectionManager::new());
        let broadcaster = Broadcaster::new(manager);
        assert_eq!(
            broadcaster.emit(Uuid::new_v4(), ServerEvent::Connected),
            DeliveryResult::default()
        );
    }
}
