use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection_manager::ConnectionHandle;
use crate::metrics::ConnectionMetrics;
use crate::realtime::{DisconnectReason, EventDispatcher, InboundEvent};
use crate::server::AppState;

use super::message::{ClientFrame, OutboundMessage, ServerEvent};

/// WebSocket upgrade handler. Identity arrives later through `setup`.
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state), fields(otel.kind = "server"))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_start = std::time::Instant::now();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer);
    let handle = state.connection_manager.register(tx);
    let connection_id = handle.id;

    ConnectionMetrics::record_opened();
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg.to_json() {
                Ok(Some(text)) => Message::Text(text.into()),
                Ok(None) => Message::Ping(Bytes::new()),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving messages from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone.dispatcher, &handle_clone) {
                        return DisconnectReason::Closed;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    return DisconnectReason::TransportError;
                }
            }
        }
        DisconnectReason::Closed
    });

    // Whichever side finishes first tears down the other
    let reason = tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            recv_task.abort();
            Some(DisconnectReason::TransportError)
        }
        result = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            send_task.abort();
            Some(result.unwrap_or(DisconnectReason::TransportError))
        }
        _ = handle.closed() => {
            // Already deregistered by whoever closed us (idle sweep)
            send_task.abort();
            recv_task.abort();
            None
        }
    };

    let reason = match reason {
        Some(reason) => {
            state
                .dispatcher
                .dispatch(connection_id, InboundEvent::Disconnect(reason));
            reason
        }
        None => DisconnectReason::IdleTimeout,
    };

    let duration = connection_start.elapsed().as_secs_f64();
    ConnectionMetrics::record_closed(reason.as_str(), duration);

    tracing::info!(
        connection_id = %connection_id,
        user_id = ?handle.user_id(),
        reason = reason.as_str(),
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
fn process_message(msg: Message, dispatcher: &EventDispatcher, handle: &ConnectionHandle) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();

            let frame: ClientFrame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(connection_id = %handle.id, error = %e, "Failed to parse client frame");
                    reply_error(handle, ServerEvent::error("INVALID_MESSAGE", e.to_string()));
                    return true;
                }
            };

            dispatcher.dispatch_named(handle.id, &frame.event, frame.data);
            true
        }
        Message::Binary(_) => {
            handle.update_activity();
            reply_error(
                handle,
                ServerEvent::error("UNSUPPORTED_FORMAT", "Binary messages are not supported"),
            );
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Axum answers pings itself; either direction counts as liveness
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Error replies never wait: a client that does not drain its queue only
/// loses its own error frames
fn reply_error(handle: &ConnectionHandle, event: ServerEvent) {
    if handle.try_send(OutboundMessage::Event(event)).is_err() {
        tracing::debug!(connection_id = %handle.id, "Outbound queue unavailable, dropping error reply");
    }
}
