//! # voxrelay-telemetry
//!
//! Structured logging via `tracing` and Prometheus metrics via the `metrics`
//! facade. Call [`init_telemetry`] once at startup.

#![deny(unsafe_code)]

pub mod metrics;

use std::fmt::Write as _;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Errors raised while installing the global subscriber or recorder.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A tracing subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Recorder(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"voxrelay_engine" => DEBUG`).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Install the Prometheus recorder.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from a level name; unknown names fall back to `info`.
    pub fn from_level_name(level: &str, json: bool) -> Self {
        Self {
            log_level: level.parse().unwrap_or(Level::INFO),
            json,
            ..Self::default()
        }
    }

    /// The `EnvFilter` directive string this config describes.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            let _ = write!(filter, ",{module}={}", level.to_string().to_lowercase());
        }
        filter
    }
}

/// Handles that outlive initialisation.
pub struct TelemetryGuard {
    metrics: Option<PrometheusHandle>,
}

impl TelemetryGuard {
    /// Prometheus handle for rendering `/metrics`, if metrics are enabled.
    pub fn metrics_handle(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    let metrics = if config.metrics_enabled {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    Ok(TelemetryGuard { metrics })
}
