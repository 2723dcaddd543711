use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::websocket::OutboundMessage;

use super::stats::{ConnectionInfo, ConnectionStats};
use super::types::{ConnectionError, ConnectionHandle};

/// Registry entry: the shared handle plus the rooms this connection joined.
///
/// `rooms` is only mutated while holding the entry's map guard, and the room
/// index is updated under that same guard. Lock order is always
/// `connections` before `rooms`/`user_index`.
pub(super) struct ConnectionEntry {
    pub(super) handle: Arc<ConnectionHandle>,
    pub(super) rooms: HashSet<String>,
}

impl ConnectionEntry {
    fn info(&self) -> ConnectionInfo {
        let mut rooms: Vec<String> = self.rooms.iter().cloned().collect();
        rooms.sort();
        ConnectionInfo {
            id: self.handle.id,
            user_id: self.handle.user_id().map(str::to_string),
            rooms,
            connected_at: self.handle.connected_at,
            last_activity: self.handle.last_activity(),
        }
    }
}

/// Owns every live connection and the room membership tables
pub struct ConnectionManager {
    /// connection_id -> entry
    pub(super) connections: DashMap<Uuid, ConnectionEntry>,
    /// user_id -> Set<connection_id> (one user may have several tabs open)
    user_index: DashMap<String, HashSet<Uuid>>,
    /// room_id -> Set<connection_id>
    pub(super) rooms: DashMap<String, HashSet<Uuid>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register a new connection with no user and no rooms
    pub fn register(&self, sender: mpsc::Sender<OutboundMessage>) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(sender));
        let conn_id = handle.id;

        self.connections.insert(
            conn_id,
            ConnectionEntry {
                handle: handle.clone(),
                rooms: HashSet::new(),
            },
        );

        tracing::info!(connection_id = %conn_id, "Connection registered");

        handle
    }

    /// Associate a user id with a connection. The first association wins;
    /// repeating it is a no-op, a different id is rejected.
    pub fn associate_user(&self, connection_id: Uuid, user_id: &str) -> Result<(), ConnectionError> {
        let entry = self
            .connections
            .get(&connection_id)
            .ok_or(ConnectionError::UnknownConnection(connection_id))?;

        let associated = entry.handle.set_user_id(user_id.to_string());
        if associated != user_id {
            return Err(ConnectionError::UserAlreadyAssociated {
                existing: associated.to_string(),
                requested: user_id.to_string(),
            });
        }

        self.user_index
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id);

        tracing::debug!(connection_id = %connection_id, user_id = %user_id, "User associated");
        Ok(())
    }

    /// Remove a connection and all of its room memberships.
    /// Unknown ids are ignored.
    pub fn deregister(&self, connection_id: Uuid) -> Option<ConnectionInfo> {
        let (_, entry) = self.connections.remove(&connection_id)?;
        let info = entry.info();

        for room in &entry.rooms {
            self.remove_member(room, connection_id);
        }

        if let Some(user_id) = entry.handle.user_id() {
            if let Some(mut user_conns) = self.user_index.get_mut(user_id) {
                user_conns.remove(&connection_id);
                if user_conns.is_empty() {
                    drop(user_conns);
                    self.user_index.remove_if(user_id, |_, conns| conns.is_empty());
                }
            }
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = ?info.user_id,
            rooms = info.rooms.len(),
            "Connection deregistered"
        );

        Some(info)
    }

    /// Snapshot of a registry entry
    pub fn lookup(&self, connection_id: Uuid) -> Option<ConnectionInfo> {
        self.connections.get(&connection_id).map(|entry| entry.info())
    }

    pub fn contains(&self, connection_id: Uuid) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Get connection handle by ID
    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.handle.clone())
    }

    /// Get all connections for a user
    pub fn get_user_connections(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<Uuid> = self
            .user_index
            .get(user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default();

        ids.into_iter()
            .filter_map(|id| self.get_connection(id))
            .collect()
    }

    /// Get all connections
    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().handle.clone())
            .collect()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        let rooms: HashMap<String, usize> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();

        ConnectionStats {
            total_connections: self.connections.len(),
            unique_users: self.user_index.len(),
            rooms,
        }
    }

    /// Connections with no activity for longer than `timeout_secs`
    pub fn stale_connections(&self, timeout_secs: u64) -> Vec<Uuid> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().handle.last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(manager: &ConnectionManager) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (manager.register(tx), rx)
    }

    #[test]
    fn test_register_creates_empty_entry() {
        let manager = ConnectionManager::new();
        let (handle, _rx) = register(&manager);

        let info = manager.lookup(handle.id).expect("registered");
        assert_eq!(info.id, handle.id);
        assert!(info.user_id.is_none());
        assert!(info.rooms.is_empty());
        assert_eq!(manager.stats().total_connections, 1);
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let manager = ConnectionManager::new();
        let (a, _rx_a) = register(&manager);
        let (b, _rx_b) = register(&manager);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_associate_user_first_call_wins() {
        let manager = ConnectionManager::new();
        let (handle, _rx) = register(&manager);

        assert!(manager.associate_user(handle.id, "u1").is_ok());
        // Same id again is harmless
        assert!(manager.associate_user(handle.id, "u1").is_ok());

        let err = manager.associate_user(handle.id, "u2").unwrap_err();
        assert_eq!(
            err,
            ConnectionError::UserAlreadyAssociated {
                existing: "u1".to_string(),
                requested: "u2".to_string(),
            }
        );
        assert_eq!(handle.user_id(), Some("u1"));
        assert_eq!(manager.get_user_connections("u1").len(), 1);
        assert!(manager.get_user_connections("u2").is_empty());
    }

    #[test]
    fn test_associate_unknown_connection() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        assert_eq!(
            manager.associate_user(id, "u1"),
            Err(ConnectionError::UnknownConnection(id))
        );
        assert_eq!(manager.stats().unique_users, 0);
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let manager = ConnectionManager::new();
        let (handle, _rx) = register(&manager);
        manager.associate_user(handle.id, "u1").unwrap();

        assert!(manager.deregister(handle.id).is_some());
        assert!(manager.deregister(handle.id).is_none());
        assert!(manager.deregister(Uuid::new_v4()).is_none());

        assert!(manager.lookup(handle.id).is_none());
        let stats = manager.stats();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.unique_users, 0);
    }

    #[test]
    fn test_user_index_tracks_multiple_tabs() {
        let manager = ConnectionManager::new();
        let (a, _rx_a) = register(&manager);
        let (b, _rx_b) = register(&manager);
        manager.associate_user(a.id, "u1").unwrap();
        manager.associate_user(b.id, "u1").unwrap();

        assert_eq!(manager.get_user_connections("u1").len(), 2);
        assert_eq!(manager.stats().unique_users, 1);

        manager.deregister(a.id);
        assert_eq!(manager.get_user_connections("u1").len(), 1);
        assert_eq!(manager.stats().unique_users, 1);

        manager.deregister(b.id);
        assert_eq!(manager.stats().unique_users, 0);
    }

    #[test]
    fn test_stale_connections() {
        let manager = ConnectionManager::new();
        let (fresh, _rx_a) = register(&manager);
        let (idle, _rx_b) = register(&manager);
        idle.set_last_activity(Utc::now() - chrono::Duration::seconds(120));

        let stale = manager.stale_connections(60);
        assert_eq!(stale, vec![idle.id]);
        assert!(!stale.contains(&fresh.id));
    }
}
