//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Recorder(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Build a recorder handle without installing it globally (tests, embedding).
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric name constants to avoid typos across crates.

/// Inbound publish attempts (counter, labels: status).
pub const RELAY_PUBLISH_TOTAL: &str = "relay_publish_total";
/// Callback replies handled (counter, labels: outcome).
pub const RELAY_REPLIES_TOTAL: &str = "relay_replies_total";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Engine jobs processed (counter, labels: task_type, outcome).
pub const ENGINE_JOBS_TOTAL: &str = "engine_jobs_total";
/// Job handler run time (histogram, labels: task_type).
pub const ENGINE_JOB_DURATION_SECONDS: &str = "engine_job_duration_seconds";
/// Reply delivery attempts (counter, labels: outcome).
pub const REGISTRY_DELIVERIES_TOTAL: &str = "registry_deliveries_total";
/// Asset proxy requests (counter, labels: status).
pub const ASSET_PROXY_REQUESTS_TOTAL: &str = "asset_proxy_requests_total";
