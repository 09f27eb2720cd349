//! WebSocket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use voxrelay_core::SessionId;
use voxrelay_settings::ServerSettings;
use voxrelay_telemetry::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL,
};

use crate::connection::{FrameReceiver, SendError, SessionConnection};
use crate::registry::SessionRegistry;

/// Ping cadence and dead-peer cutoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between server-initiated Ping frames.
    pub interval: Duration,
    /// Silence after which the peer is considered gone.
    pub timeout: Duration,
}

impl HeartbeatConfig {
    /// Derive from server settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.heartbeat_interval_ms),
            timeout: Duration::from_millis(settings.heartbeat_timeout_ms),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

/// Serve one session's socket until it closes, errors, or `cancel` fires.
///
/// The connection is registered on entry and unregistered on every exit path.
/// Inbound text is only logged; it counts as liveness.
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_session(
    ws: WebSocket,
    session_id: SessionId,
    registry: Arc<SessionRegistry>,
    heartbeat: HeartbeatConfig,
    cancel: CancellationToken,
) {
    let (connection, send_rx) = registry.connect(session_id.clone());
    let (ws_tx, mut ws_rx) = ws.split();

    info!(connection_id = %connection.id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let writer_cancel = cancel.child_token();
    let outbound = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        heartbeat,
        writer_cancel.clone(),
    ));

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                debug!("server shutting down, closing session");
                break;
            }
            // Writer stopped (peer unresponsive or socket write failed).
            () = writer_cancel.cancelled() => break,
            next = ws_rx.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                connection.mark_alive();
                debug!(len = text.len(), "received text frame");
            }
            Some(Ok(Message::Binary(data))) => {
                connection.mark_alive();
                debug!(len = data.len(), "received binary frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.mark_alive(),
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "websocket read error");
                break;
            }
            None => break,
        }
    }

    writer_cancel.cancel();
    if let Err(e) = outbound.await {
        warn!(error = %e, "websocket writer task failed");
    }
    let _ = registry.unregister_connection(&connection.session_id, &connection.id);

    info!(connection_id = %connection.id, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Forward queued frames and send periodic pings.
///
/// Every frame is acked with its socket write result. Frames still queued
/// when the loop exits are dropped, which their senders see as closed.
/// Cancels `stop` when it exits on its own so the reader loop ends too.
async fn write_loop<S>(
    mut ws_tx: S,
    mut send_rx: FrameReceiver,
    connection: Arc<SessionConnection>,
    heartbeat: HeartbeatConfig,
    stop: CancellationToken,
) where
    S: futures::Sink<Message> + Unpin,
{
    let mut ping_interval = tokio::time::interval(heartbeat.interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            () = stop.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            msg = send_rx.recv() => {
                let Some(frame) = msg else { break };
                let written = ws_tx.send(Message::Text(String::clone(&frame.text).into())).await;
                if written.is_err() {
                    warn!("socket write failed, closing session");
                    frame.ack(Err(SendError::WriteFailed));
                    break;
                }
                frame.ack(Ok(()));
            }
            _ = ping_interval.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > heartbeat.timeout {
                    warn!("client unresponsive for {:?}, disconnecting", heartbeat.timeout);
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    stop.cancel();
}
