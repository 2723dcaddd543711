//! Room membership on top of the connection registry.
//!
//! There is deliberately no client-facing leave event: a connection stays in
//! every room it joined until it disconnects. `leave` exists for library
//! callers only.

use uuid::Uuid;

use super::registry::ConnectionManager;
use super::stats::RoomInfo;

impl ConnectionManager {
    /// Add a connection to a room. Returns `true` if it was not already a
    /// member. Unknown connections are ignored so a late join from a client
    /// that already disconnected cannot leave a dangling member behind.
    pub fn join(&self, connection_id: Uuid, room: &str) -> bool {
        let Some(mut entry) = self.connections.get_mut(&connection_id) else {
            tracing::debug!(connection_id = %connection_id, room = %room, "Ignoring join for unknown connection");
            return false;
        };

        if !entry.rooms.insert(room.to_string()) {
            return false;
        }

        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id);

        tracing::debug!(connection_id = %connection_id, room = %room, "Joined room");
        true
    }

    /// Remove a connection from a single room. Returns `true` if it was a member.
    pub fn leave(&self, connection_id: Uuid, room: &str) -> bool {
        let Some(mut entry) = self.connections.get_mut(&connection_id) else {
            return false;
        };

        if !entry.rooms.remove(room) {
            return false;
        }

        self.remove_member(room, connection_id);

        tracing::debug!(connection_id = %connection_id, room = %room, "Left room");
        true
    }

    /// Remove a connection from every room it joined, keeping its registry
    /// entry. Returns the number of rooms left.
    pub fn purge(&self, connection_id: Uuid) -> usize {
        let Some(mut entry) = self.connections.get_mut(&connection_id) else {
            return 0;
        };

        let rooms: Vec<String> = entry.rooms.drain().collect();
        for room in &rooms {
            self.remove_member(room, connection_id);
        }

        rooms.len()
    }

    /// Snapshot of a room's members; empty if the room does not exist
    pub fn room_members(&self, room: &str) -> Vec<Uuid> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// List all rooms with their member counts
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .iter()
            .map(|entry| RoomInfo {
                name: entry.key().clone(),
                member_count: entry.value().len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Get info for a single room
    pub fn room_info(&self, room: &str) -> Option<RoomInfo> {
        self.rooms.get(room).map(|members| RoomInfo {
            name: room.to_string(),
            member_count: members.len(),
        })
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop `connection_id` from the room index, removing the room once empty
    pub(super) fn remove_member(&self, room: &str, connection_id: Uuid) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                drop(members);
                self.rooms.remove_if(room, |_, members| members.is_empty());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::connection_manager::ConnectionHandle;

    fn register(manager: &ConnectionManager) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel(8);
        manager.register(tx)
    }

    fn members(manager: &ConnectionManager, room: &str) -> HashSet<Uuid> {
        manager.room_members(room).into_iter().collect()
    }

    #[test]
    fn test_join_is_idempotent() {
        let manager = ConnectionManager::new();
        let conn = register(&manager);

        assert!(manager.join(conn.id, "room1"));
        let once = members(&manager, "room1");
        assert!(!manager.join(conn.id, "room1"));
        let twice = members(&manager, "room1");

        assert_eq!(once, twice);
        assert_eq!(manager.lookup(conn.id).unwrap().rooms, vec!["room1".to_string()]);
    }

    #[test]
    fn test_join_unknown_connection_creates_nothing() {
        let manager = ConnectionManager::new();
        assert!(!manager.join(Uuid::new_v4(), "room1"));
        assert!(manager.room_info("room1").is_none());
        assert_eq!(manager.room_count(), 0);
    }

    #[test]
    fn test_membership_is_bidirectional() {
        let manager = ConnectionManager::new();
        let a = register(&manager);
        let b = register(&manager);

        manager.join(a.id, "room1");
        manager.join(a.id, "room2");
        manager.join(b.id, "room2");

        for conn in [&a, &b] {
            let info = manager.lookup(conn.id).unwrap();
            for room in &info.rooms {
                assert!(manager.room_members(room).contains(&conn.id));
            }
        }
        for room in ["room1", "room2"] {
            for id in manager.room_members(room) {
                assert!(manager.lookup(id).unwrap().is_member_of(room));
            }
        }
    }

    #[test]
    fn test_leave_removes_empty_room() {
        let manager = ConnectionManager::new();
        let conn = register(&manager);
        manager.join(conn.id, "room1");

        assert!(manager.leave(conn.id, "room1"));
        assert!(!manager.leave(conn.id, "room1"));
        assert!(manager.room_info("room1").is_none());
        assert!(manager.lookup(conn.id).unwrap().rooms.is_empty());
    }

    #[test]
    fn test_purge_keeps_registry_entry() {
        let manager = ConnectionManager::new();
        let a = register(&manager);
        let b = register(&manager);
        manager.join(a.id, "room1");
        manager.join(a.id, "room2");
        manager.join(b.id, "room2");

        assert_eq!(manager.purge(a.id), 2);

        assert!(manager.contains(a.id));
        assert!(manager.room_info("room1").is_none());
        assert_eq!(members(&manager, "room2"), HashSet::from([b.id]));
        assert_eq!(manager.purge(Uuid::new_v4()), 0);
    }

    #[test]
    fn test_deregister_clears_every_room() {
        let manager = ConnectionManager::new();
        let a = register(&manager);
        let b = register(&manager);
        for room in ["room1", "room2", "room3"] {
            manager.join(a.id, room);
        }
        manager.join(b.id, "room3");

        manager.deregister(a.id);

        for room in ["room1", "room2", "room3"] {
            assert!(!manager.room_members(room).contains(&a.id));
        }
        assert!(manager.lookup(a.id).is_none());
        assert!(!manager.join(a.id, "room1"));
        assert_eq!(manager.list_rooms().len(), 1);
    }

    #[test]
    fn test_list_rooms_sorted_with_counts() {
        let manager = ConnectionManager::new();
        let a = register(&manager);
        let b = register(&manager);
        manager.join(a.id, "zeta");
        manager.join(a.id, "alpha");
        manager.join(b.id, "alpha");

        let rooms = manager.list_rooms();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].name, "alpha");
        assert_eq!(rooms[0].member_count, 2);
        assert_eq!(rooms[1].name, "zeta");
        assert_eq!(rooms[1].member_count, 1);
        assert_eq!(manager.stats().rooms.get("alpha"), Some(&2));
    }
}
