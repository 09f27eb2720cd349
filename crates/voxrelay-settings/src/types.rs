//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial user file only needs to
//! name the values it changes.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Workflow engine connection.
    pub engine: EngineSettings,
    /// Upstream for the model/voice asset proxy.
    pub assets: AssetSettings,
    /// Values handed to the browser frontend.
    pub frontend: FrontendSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Capacity of each connection's outbound frame queue.
    pub max_send_queue: usize,
    /// How long a reply may wait for room in a connection's queue.
    pub delivery_timeout_ms: u64,
    /// Interval between server-initiated Ping frames.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is considered dead.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_send_queue: 256,
            delivery_timeout_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
        }
    }
}

/// Workflow engine (Camunda 8 / Zeebe REST gateway) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Gateway address; a bare `host:port` is accepted.
    pub address: String,
    /// OAuth client id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// OAuth client secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// OAuth token endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_server_url: Option<String>,
    /// Audience requested in the token.
    pub token_audience: String,
    /// Worker name reported when activating jobs.
    pub worker_name: String,
    /// How long an activated job stays locked to this worker.
    pub job_timeout_ms: u64,
    /// Upper bound on jobs fetched per activation call.
    pub max_jobs_to_activate: u32,
    /// Pause between activation polls (also the error backoff).
    pub poll_interval_ms: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_ms: u64,
    /// Pause between startup connection attempts.
    pub connect_retry_ms: u64,
    /// How long the engine buffers a published message that no process is
    /// waiting for yet.
    pub message_ttl_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            address: "http://localhost:8080".to_string(),
            client_id: None,
            client_secret: None,
            authorization_server_url: None,
            token_audience: "zeebe-api".to_string(),
            worker_name: "voxrelay-worker".to_string(),
            job_timeout_ms: 30_000,
            max_jobs_to_activate: 32,
            poll_interval_ms: 500,
            request_timeout_ms: 10_000,
            connect_retry_ms: 2_000,
            message_ttl_ms: 60_000,
        }
    }
}

impl EngineSettings {
    /// Whether client id, secret and token endpoint are all set.
    pub fn has_credentials(&self) -> bool {
        [
            &self.client_id,
            &self.client_secret,
            &self.authorization_server_url,
        ]
        .iter()
        .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Gateway base URL with a scheme and without a trailing slash.
    ///
    /// Local addresses default to plaintext, anything else to TLS.
    pub fn base_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.contains("://") {
            return address.to_string();
        }
        if address.starts_with("localhost") || address.starts_with("127.0.0.1") {
            format!("http://{address}")
        } else {
            format!("https://{address}")
        }
    }
}

/// Asset proxy upstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetSettings {
    /// Upstream base URL.
    pub base_url: String,
    /// Repository path that holds the voice style files.
    pub voice_repo_path: String,
    /// Upstream request timeout (model files are large).
    pub timeout_secs: u64,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            base_url: "https://huggingface.co".to_string(),
            voice_repo_path: "onnx-community/Supertonic-TTS-2-ONNX/resolve/main/voices"
                .to_string(),
            timeout_secs: 120,
        }
    }
}

/// Values served to the frontend from `/api/config`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrontendSettings {
    /// System prompt for the in-browser voice model.
    pub system_prompt: String,
}

impl Default for FrontendSettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful voice assistant.".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter (`RUST_LOG` overrides it).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
