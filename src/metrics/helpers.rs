//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::connection_manager::ConnectionStats;

use super::{
    BROADCASTS_TOTAL, CONNECTIONS_TOTAL, EVENTS_DROPPED_TOTAL, EVENTS_RECEIVED_TOTAL,
    HEARTBEAT_PINGS_TOTAL, IDLE_DISCONNECTS_TOTAL, MESSAGES_DELIVERED_TOTAL,
    MESSAGES_FAILED_TOTAL, ROOMS_ACTIVE, USERS_CONNECTED, WS_CONNECTIONS_CLOSED,
    WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(reason: &str, duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.with_label_values(&[reason]).inc();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    /// Refresh the gauges from a registry snapshot
    pub fn update_from_stats(stats: &ConnectionStats) {
        CONNECTIONS_TOTAL.set(stats.total_connections as i64);
        USERS_CONNECTED.set(stats.unique_users as i64);
        ROOMS_ACTIVE.set(stats.rooms.len() as i64);
    }
}

/// Helper struct for recording inbound event metrics
pub struct EventMetrics;

impl EventMetrics {
    pub fn record_received(event: &str) {
        EVENTS_RECEIVED_TOTAL.with_label_values(&[event]).inc();
    }

    pub fn record_dropped(reason: &str) {
        EVENTS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }
}

/// Helper struct for recording fan-out metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record_broadcast(target: &str, event: &str) {
        BROADCASTS_TOTAL.with_label_values(&[target, event]).inc();
    }

    pub fn record_delivered(count: u64) {
        MESSAGES_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        MESSAGES_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_pings(count: u64) {
        HEARTBEAT_PINGS_TOTAL.inc_by(count);
    }

    pub fn record_idle_disconnects(count: u64) {
        IDLE_DISCONNECTS_TOTAL.inc_by(count);
    }
}
