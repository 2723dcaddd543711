//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerEvent};

/// Handle for a single realtime connection
pub struct ConnectionHandle {
    pub id: Uuid,
    pub sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds)
    last_activity: AtomicI64,
    /// Set once by `setup`, never changed afterwards
    user_id: OnceLock<String>,
    close: Notify,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            user_id: OnceLock::new(),
            close: Notify::new(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.get().map(String::as_str)
    }

    /// Returns the id that ends up associated: `user_id` when the slot was
    /// empty, otherwise the one stored by an earlier call.
    pub(super) fn set_user_id(&self, user_id: String) -> &str {
        self.user_id.get_or_init(|| user_id)
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        self.last_activity.store(at.timestamp(), Ordering::Relaxed);
    }

    /// Queue an event for this connection, waiting for buffer space
    pub async fn send(
        &self,
        event: ServerEvent,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Event(event)).await
    }

    /// Queue a message without waiting. Fails when the buffer is full or the
    /// socket task has gone away.
    pub fn try_send(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::TrySendError<OutboundMessage>> {
        self.sender.try_send(message)
    }

    /// Ask the socket task owning this connection to shut down
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

/// Errors from registry operations that need a decision from the caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection {0} is not registered")]
    UnknownConnection(Uuid),

    #[error("Connection is already set up as user '{existing}', refusing '{requested}'")]
    UserAlreadyAssociated { existing: String, requested: String },
}
