//! Handle to one live WebSocket connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use voxrelay_core::{ConnectionId, SessionId};

/// Why a frame did not reach the socket.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The connection's writer task is gone.
    #[error("connection closed")]
    Closed,
    /// The socket rejected the write.
    #[error("socket write failed")]
    WriteFailed,
    /// The frame was not written within the delivery timeout.
    #[error("frame not written within {0:?}")]
    TimedOut(Duration),
}

/// A text frame waiting for the writer task, with its write acknowledgement.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Serialised frame.
    pub text: Arc<String>,
    ack: oneshot::Sender<Result<(), SendError>>,
}

impl OutboundFrame {
    /// Report the socket write result back to the sender.
    pub fn ack(self, result: Result<(), SendError>) {
        let _ = self.ack.send(result);
    }
}

/// Receiving end of a connection's frame queue, owned by its writer task.
pub type FrameReceiver = mpsc::Receiver<OutboundFrame>;

/// A connected client, as held by the session registry.
///
/// Frames go through a bounded queue drained by the connection's writer task,
/// which acknowledges every socket write. The socket itself is never shared.
pub struct SessionConnection {
    /// Unique per accepted socket, even when session ids repeat.
    pub id: ConnectionId,
    /// Session this connection serves.
    pub session_id: SessionId,
    tx: mpsc::Sender<OutboundFrame>,
    /// When the socket was accepted.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
}

impl SessionConnection {
    /// Create a connection handle feeding `tx`.
    pub fn new(session_id: SessionId, tx: mpsc::Sender<OutboundFrame>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            session_id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
        }
    }

    /// Write a text frame to the socket and wait for the writer's ack.
    ///
    /// `timeout` covers both queueing and the socket write. A writer that
    /// drops the frame without acking counts as closed.
    pub async fn send(&self, text: Arc<String>, timeout: Duration) -> Result<(), SendError> {
        let (ack, acked) = oneshot::channel();
        let write = async {
            self.tx
                .send(OutboundFrame { text, ack })
                .await
                .map_err(|_| SendError::Closed)?;
            acked.await.unwrap_or(Err(SendError::Closed))
        };
        tokio::time::timeout(timeout, write)
            .await
            .unwrap_or(Err(SendError::TimedOut(timeout)))
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Record liveness (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the peer showed activity since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last sign of life.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for SessionConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConnection")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Stand-in writer for tests: acks every frame and forwards its text.
#[cfg(test)]
pub(crate) fn ack_all(mut rx: FrameReceiver) -> mpsc::UnboundedReceiver<String> {
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    drop(tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let _ = written_tx.send(String::clone(&frame.text));
            frame.ack(Ok(()));
        }
    }));
    written_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (SessionConnection, FrameReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (SessionConnection::new(SessionId::from("s1"), tx), rx)
    }

    #[tokio::test]
    async fn send_waits_for_write_ack() {
        let (conn, rx) = make_connection(4);
        let mut written = ack_all(rx);
        conn.send(Arc::new("hello".into()), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(written.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let (conn, mut rx) = make_connection(4);
        let writer = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            frame.ack(Err(SendError::WriteFailed));
        });
        assert_eq!(
            conn.send(Arc::new("x".into()), Duration::from_secs(1)).await,
            Err(SendError::WriteFailed)
        );
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_frame_counts_as_closed() {
        let (conn, mut rx) = make_connection(4);
        let writer = tokio::spawn(async move {
            drop(rx.recv().await);
        });
        assert_eq!(
            conn.send(Arc::new("x".into()), Duration::from_secs(1)).await,
            Err(SendError::Closed)
        );
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn send_to_closed_channel() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(conn.is_closed());
        assert_eq!(
            conn.send(Arc::new("x".into()), Duration::from_secs(1)).await,
            Err(SendError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_frame_times_out() {
        let (conn, _rx) = make_connection(1);
        assert_eq!(
            conn.send(Arc::new("1".into()), Duration::from_millis(50)).await,
            Err(SendError::TimedOut(Duration::from_millis(50)))
        );
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, _ra) = make_connection(1);
        let (b, _rb) = make_connection(1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.session_id, b.session_id);
    }
}
