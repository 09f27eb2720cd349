//! Startup sequencing for the engine connection.
//!
//! The HTTP surface comes up before the engine is reachable. Until the
//! connector has probed the gateway successfully, [`EngineSlot::get`] returns
//! `None` and publishers report the backend as unavailable.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::{JobClient, MessagePublisher};
use crate::router::TaskRouter;
use crate::worker::{JobWorker, WorkerConfig};

/// Late-bound, shared handle to the message publisher.
///
/// Installed at most once.
#[derive(Clone, Default)]
pub struct EngineSlot {
    inner: Arc<OnceLock<Arc<dyn MessagePublisher>>>,
}

impl EngineSlot {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the publisher. Returns `false` if one was already installed.
    pub fn install(&self, publisher: Arc<dyn MessagePublisher>) -> bool {
        self.inner.set(publisher).is_ok()
    }

    /// The publisher, once installed.
    pub fn get(&self) -> Option<Arc<dyn MessagePublisher>> {
        self.inner.get().cloned()
    }

    /// Whether a publisher has been installed.
    pub fn is_ready(&self) -> bool {
        self.inner.get().is_some()
    }
}

impl std::fmt::Debug for EngineSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSlot")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Connects to the engine, publishes readiness, then runs the job worker.
pub struct EngineConnector<C> {
    client: Arc<C>,
    slot: EngineSlot,
    router: Arc<TaskRouter>,
    worker: WorkerConfig,
    retry_interval: Duration,
}

impl<C> EngineConnector<C>
where
    C: MessagePublisher + JobClient + 'static,
{
    /// Create a connector.
    pub fn new(
        client: Arc<C>,
        slot: EngineSlot,
        router: Arc<TaskRouter>,
        worker: WorkerConfig,
        retry_interval: Duration,
    ) -> Self {
        Self {
            client,
            slot,
            router,
            worker,
            retry_interval,
        }
    }

    /// Probe until reachable, install the publisher, then run the worker.
    ///
    /// Returns when `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let probe = tokio::select! {
                () = cancel.cancelled() => {
                    info!("engine connector cancelled before connecting");
                    return;
                }
                probe = self.client.topology() => probe,
            };
            match probe {
                Ok(topology) => {
                    info!(
                        attempt,
                        gateway_version = topology.gateway_version.as_deref().unwrap_or("unknown"),
                        cluster_size = topology.cluster_size.unwrap_or(0),
                        "connected to workflow engine"
                    );
                    break;
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "workflow engine not reachable, retrying");
                }
                Err(e) => {
                    error!(attempt, error = %e, kind = e.error_kind(), "workflow engine refused connection, retrying");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.retry_interval) => {}
            }
        }

        let publisher: Arc<dyn MessagePublisher> = self.client.clone();
        if !self.slot.install(publisher) {
            warn!("engine publisher was already installed");
        }

        let jobs: Arc<dyn JobClient> = self.client;
        JobWorker::new(jobs, self.router, self.worker)
            .run(cancel)
            .await;
    }
}
