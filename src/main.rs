//! Voice relay server binary.
//!
//! Parses CLI args, loads settings, wires the session registry to the
//! workflow engine, and serves HTTP/WebSocket until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use voxrelay_core::constants::VOICE_RESPONSE_TASK;
use voxrelay_engine::{EngineConnector, EngineSlot, HttpEngineClient, TaskRouter, WorkerConfig};
use voxrelay_server::{listen, AppState, OutboundDispatcher, SessionRegistry, ShutdownCoordinator};
use voxrelay_settings::RelaySettings;
use voxrelay_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "voxrelay", about = "Voice relay between browser sessions and a workflow engine")]
struct Cli {
    /// Host to bind to (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default: ~/.voxrelay/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<RelaySettings> {
        let mut settings = match &self.config {
            Some(path) => voxrelay_settings::loader::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => voxrelay_settings::loader::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    let telemetry = init_telemetry(&TelemetryConfig::from_level_name(
        &settings.logging.level,
        settings.logging.json,
    ))
    .context("Failed to initialize telemetry")?;

    let shutdown = ShutdownCoordinator::new();
    let registry = Arc::new(SessionRegistry::from_settings(&settings.server));
    let slot = EngineSlot::new();

    // Job worker: replies from the engine go straight to the registry
    let mut router = TaskRouter::new();
    router.register(VOICE_RESPONSE_TASK, OutboundDispatcher::new(registry.clone()));

    if !settings.engine.has_credentials() {
        tracing::warn!(
            address = %settings.engine.address,
            "engine credentials incomplete, connecting without OAuth"
        );
    }
    let client = HttpEngineClient::new(&settings.engine).context("Failed to build engine client")?;
    let connector = EngineConnector::new(
        Arc::new(client),
        slot.clone(),
        Arc::new(router),
        WorkerConfig::from_settings(&settings.engine),
        Duration::from_millis(settings.engine.connect_retry_ms),
    );
    shutdown.track("engine", tokio::spawn(connector.run(shutdown.token())));

    let state = AppState::new(
        &settings,
        registry,
        slot,
        shutdown.token(),
        telemetry.metrics_handle().cloned(),
    )
    .context("Failed to build asset proxy")?;

    let bind = format!("{}:{}", settings.server.host, settings.server.port);
    let (addr, handle) = listen(&bind, state)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    shutdown.track("server", handle);

    tracing::info!(
        engine = %settings.engine.base_url(),
        "voxrelay listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    shutdown.graceful_shutdown(None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
