//! Connection management for realtime WebSocket sessions
//!
//! This module provides:
//! - The connection registry (connection id -> handle, optional user id)
//! - Room membership tracking (room id <-> connection ids)
//! - Connection and room statistics

mod registry;
mod rooms;
mod stats;
mod types;

pub use registry::ConnectionManager;
pub use stats::{ConnectionInfo, ConnectionStats, RoomInfo};
pub use types::{ConnectionError, ConnectionHandle};
