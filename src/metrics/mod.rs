//! Prometheus metrics for the realtime relay.
//!
//! - Connection metrics (active connections, users, rooms)
//! - Event metrics (received by name, dropped by reason)
//! - Broadcast metrics (fan-outs, deliveries, failed deliveries)
//! - Heartbeat metrics

mod helpers;

pub use helpers::{encode_metrics, BroadcastMetrics, ConnectionMetrics, EventMetrics, HeartbeatMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "chat_relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total number of active WebSocket connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of active WebSocket connections"
    ).expect("register connections_total");

    /// Number of unique users that completed setup
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of unique connected users"
    ).expect("register users_connected");

    /// Rooms with at least one member (personal channels included)
    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Total number of rooms with at least one member"
    ).expect("register rooms_active");

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).expect("register ws_connections_opened_total");

    pub static ref WS_CONNECTIONS_CLOSED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed",
        &["reason"]
    ).expect("register ws_connections_closed_total");

    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).expect("register ws_connection_duration_seconds");

    // ============================================================================
    // Event Metrics
    // ============================================================================

    pub static ref EVENTS_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_received_total", METRIC_PREFIX),
        "Inbound events received by event name",
        &["event"]
    ).expect("register events_received_total");

    pub static ref EVENTS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_dropped_total", METRIC_PREFIX),
        "Inbound events dropped before handling, by reason",
        &["reason"]
    ).expect("register events_dropped_total");

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    pub static ref BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Fan-outs by target kind and outbound event",
        &["target", "event"]
    ).expect("register broadcasts_total");

    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Outbound events queued to connections"
    ).expect("register messages_delivered_total");

    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Outbound events dropped because the connection queue was full or closed"
    ).expect("register messages_failed_total");

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    pub static ref HEARTBEAT_PINGS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_pings_total", METRIC_PREFIX),
        "Liveness pings queued to connections"
    ).expect("register heartbeat_pings_total");

    pub static ref IDLE_DISCONNECTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_idle_disconnects_total", METRIC_PREFIX),
        "Connections disconnected by the idle timeout sweep"
    ).expect("register idle_disconnects_total");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        CONNECTIONS_TOTAL.set(1);

        let output = encode_metrics().expect("metrics encode");
        assert!(output.contains("chat_relay_connections_total"));
    }

    #[test]
    fn test_labelled_metrics() {
        EventMetrics::record_received("typing");
        EventMetrics::record_dropped("missing_chat_users");
        BroadcastMetrics::record_broadcast("room", "typing");
        ConnectionMetrics::record_closed("closed", 1.5);
        // Just verify no panics
    }
}
