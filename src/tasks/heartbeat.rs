use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::connection_manager::ConnectionManager;
use crate::metrics::HeartbeatMetrics;
use crate::realtime::{DisconnectReason, EventDispatcher, InboundEvent};
use crate::websocket::OutboundMessage;

/// Background task that pings connections and disconnects idle ones
pub struct HeartbeatTask {
    config: WebSocketConfig,
    connection_manager: Arc<ConnectionManager>,
    dispatcher: Arc<EventDispatcher>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        connection_manager: Arc<ConnectionManager>,
        dispatcher: Arc<EventDispatcher>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            connection_manager,
            dispatcher,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup tasks
    pub async fn run(mut self) {
        let mut ping_timer = tokio::time::interval(Duration::from_secs(self.config.ping_interval));
        let mut cleanup_timer = tokio::time::interval(Duration::from_secs(self.config.cleanup_interval));

        // Skip immediate first tick
        ping_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            ping_interval_secs = self.config.ping_interval,
            ping_timeout_secs = self.config.ping_timeout,
            cleanup_interval_secs = self.config.cleanup_interval,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = ping_timer.tick() => {
                    self.send_pings();
                }
                _ = cleanup_timer.tick() => {
                    self.disconnect_idle();
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Queue a transport ping on every connection. A full queue means the
    /// client is not reading; the idle sweep deals with it.
    fn send_pings(&self) -> usize {
        let sent = self
            .connection_manager
            .get_all_connections()
            .iter()
            .filter(|handle| handle.try_send(OutboundMessage::Ping).is_ok())
            .count();

        HeartbeatMetrics::record_pings(sent as u64);
        tracing::debug!(sent = sent, "Heartbeat round completed");
        sent
    }

    /// Disconnect everything idle for longer than `ping_timeout`, through the
    /// same path as a client-initiated disconnect
    fn disconnect_idle(&self) -> usize {
        let stale = self
            .connection_manager
            .stale_connections(self.config.ping_timeout);
        let count = stale.len();

        for connection_id in stale {
            tracing::info!(connection_id = %connection_id, "Disconnecting idle connection");
            self.dispatcher.dispatch(
                connection_id,
                InboundEvent::Disconnect(DisconnectReason::IdleTimeout),
            );
        }

        if count > 0 {
            HeartbeatMetrics::record_idle_disconnects(count as u64);
            tracing::info!(
                removed = count,
                timeout_secs = self.config.ping_timeout,
                "Cleaned up idle connections"
            );
        }

        count
    }
}
