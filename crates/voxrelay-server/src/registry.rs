//! Session registry: live connections keyed by session id.
//!
//! Backed by a sharded `DashMap`, so operations on different sessions never
//! contend on one lock. No map guard is ever held across an `.await`: delivery
//! clones the connection handle out first, then writes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxrelay_core::{ConnectionId, ServerFrame, SessionId};
use voxrelay_settings::ServerSettings;
use voxrelay_telemetry::metrics::REGISTRY_DELIVERIES_TOTAL;

use crate::connection::{FrameReceiver, SendError, SessionConnection};

/// Why a delivery to a registered session failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The frame did not reach the connection's socket.
    #[error(transparent)]
    Send(#[from] SendError),
    /// The frame could not be serialised.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Result of [`SessionRegistry::deliver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Written to the session's socket.
    Delivered,
    /// No connection is registered for the session.
    NotFound,
    /// The connection was stale; its entry has been removed.
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    /// Whether the frame was written to the socket.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::NotFound => "not_found",
            Self::Failed(_) => "failed",
        }
    }
}

/// Registry of live session connections.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionConnection>>,
    max_send_queue: usize,
    delivery_timeout: Duration,
}

impl SessionRegistry {
    /// Create a registry whose connections queue at most `max_send_queue`
    /// frames and wait at most `delivery_timeout` for room.
    pub fn new(max_send_queue: usize, delivery_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
            delivery_timeout,
        }
    }

    /// Create a registry from server settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self::new(
            settings.max_send_queue,
            Duration::from_millis(settings.delivery_timeout_ms),
        )
    }

    /// Build a connection for `session_id`, register it, and return the
    /// receiving end of its frame queue.
    pub fn connect(
        &self,
        session_id: SessionId,
    ) -> (Arc<SessionConnection>, FrameReceiver) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(SessionConnection::new(session_id, tx));
        self.register(Arc::clone(&connection));
        (connection, rx)
    }

    /// Insert or replace the entry for the connection's session.
    ///
    /// A replaced connection is not closed; it just stops receiving replies.
    pub fn register(&self, connection: Arc<SessionConnection>) {
        let session_id = connection.session_id.clone();
        let connection_id = connection.id.clone();
        if let Some(previous) = self.sessions.insert(session_id.clone(), connection) {
            info!(
                session_id = %session_id,
                connection_id = %connection_id,
                replaced = %previous.id,
                "session re-registered, newest connection wins"
            );
        } else {
            debug!(session_id = %session_id, connection_id = %connection_id, "session registered");
        }
    }

    /// Remove the entry for `session_id`. No-op when absent.
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            debug!(session_id = %session_id, "session unregistered");
        }
        removed
    }

    /// Remove the entry only if it still belongs to `connection_id`.
    ///
    /// A closing connection uses this so it never evicts a newer connection
    /// registered under the same session id.
    pub fn unregister_connection(&self, session_id: &SessionId, connection_id: &ConnectionId) -> bool {
        let removed = self
            .sessions
            .remove_if(session_id, |_, conn| conn.id == *connection_id)
            .is_some();
        if removed {
            debug!(session_id = %session_id, connection_id = %connection_id, "connection unregistered");
        }
        removed
    }

    /// The connection registered for `session_id`, if any.
    pub fn lookup(&self, session_id: &SessionId) -> Option<Arc<SessionConnection>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Write `frame` to the session's socket and wait for the write result.
    ///
    /// A failed or unacknowledged write marks the entry stale and removes it.
    /// Never retries.
    pub async fn deliver(&self, session_id: &SessionId, frame: &ServerFrame) -> DeliveryOutcome {
        let outcome = self.deliver_inner(session_id, frame).await;
        counter!(REGISTRY_DELIVERIES_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn deliver_inner(&self, session_id: &SessionId, frame: &ServerFrame) -> DeliveryOutcome {
        let Some(connection) = self.lookup(session_id) else {
            return DeliveryOutcome::NotFound;
        };

        let text = match serde_json::to_string(frame) {
            Ok(text) => Arc::new(text),
            Err(e) => return DeliveryOutcome::Failed(DeliveryError::Encode(e.to_string())),
        };

        match connection.send(text, self.delivery_timeout).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    connection_id = %connection.id,
                    error = %e,
                    "delivery failed, dropping stale connection"
                );
                let _ = self.unregister_connection(session_id, &connection.id);
                DeliveryOutcome::Failed(e.into())
            }
        }
    }

    /// Registered session ids (sorted), for diagnostics.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().as_str().to_owned())
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}
