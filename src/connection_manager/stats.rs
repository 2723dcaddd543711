//! Connection statistics and info structures

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub rooms: HashMap<String, usize>,
}

/// Point-in-time view of one registry entry
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub user_id: Option<String>,
    /// Sorted room ids, personal channel included
    pub rooms: Vec<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn is_member_of(&self, room: &str) -> bool {
        self.rooms.iter().any(|r| r == room)
    }
}

/// Room information
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub name: String,
    pub member_count: usize,
}
