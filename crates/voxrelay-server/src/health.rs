//! `/health` endpoint.
//!
//! The relay keeps answering ingestion requests while the engine is down, so
//! health reports that as `degraded` rather than failing the probe.

use std::time::Instant;

use serde::Serialize;

/// Overall relay state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Engine connected; publishes go through.
    Ok,
    /// Engine not connected yet; publishes return soft errors.
    Degraded,
}

/// `/health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    /// Registered session connections.
    pub connections: usize,
    pub engine_ready: bool,
}

/// Snapshot the relay's health.
pub fn health_check(start_time: Instant, connections: usize, engine_ready: bool) -> HealthResponse {
    HealthResponse {
        status: if engine_ready {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        engine_ready,
    }
}
