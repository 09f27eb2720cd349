//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time tracked tasks get to finish before they are aborted.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the process-wide cancellation token and the background tasks that
/// must be drained on exit (engine connector, job worker, HTTP server).
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a spawned task so shutdown waits for it.
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().push((name, handle));
    }

    /// Number of tracked tasks.
    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, wait up to `timeout` for tracked tasks, abort the rest.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(
            task_count = tasks.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);

        match tokio::time::timeout(timeout, drain).await {
            Ok(results) => {
                for (name, result) in names.iter().zip(results) {
                    if let Err(e) = result {
                        warn!(task = *name, error = %e, "task ended abnormally");
                    }
                }
            }
            Err(_elapsed) => {
                warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
