//! Pass-through proxy for model and voice assets.
//!
//! The browser cannot fetch these cross-origin, so the relay fetches them
//! upstream (following redirects) and hands back status, body, and content type.

use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};
use voxrelay_settings::AssetSettings;
use voxrelay_telemetry::metrics::ASSET_PROXY_REQUESTS_TOTAL;

/// Content type used when the upstream does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Failures reaching the asset upstream.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The HTTP client could not be built.
    #[error("failed to build proxy client: {0}")]
    Client(String),
    /// Transport failure or upstream timeout.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// An upstream response, relayed verbatim.
#[derive(Clone, Debug)]
pub struct ProxiedAsset {
    /// Upstream HTTP status.
    pub status: u16,
    /// Upstream content type, or [`DEFAULT_CONTENT_TYPE`].
    pub content_type: String,
    /// Response body.
    pub body: Bytes,
}

/// Fetches assets from the configured upstream.
pub struct AssetProxy {
    http: reqwest::Client,
    base_url: String,
    voice_repo_path: String,
}

impl AssetProxy {
    /// Build a proxy from asset settings.
    pub fn new(settings: &AssetSettings) -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            voice_repo_path: settings.voice_repo_path.trim_matches('/').to_owned(),
        })
    }

    /// Upstream URL for a repository-relative path.
    pub fn target_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Repository path of a voice style file.
    pub fn voice_path(&self, filename: &str) -> String {
        format!("{}/{filename}", self.voice_repo_path)
    }

    /// `GET` the path upstream. Non-2xx statuses are relayed, not errors.
    pub async fn fetch(&self, path: &str) -> Result<ProxiedAsset, ProxyError> {
        let url = self.target_url(path);
        debug!(url = %url, "proxying asset");
        let result = self.fetch_url(&url).await;
        let status = match &result {
            Ok(asset) => asset.status.to_string(),
            Err(_) => "error".to_owned(),
        };
        counter!(ASSET_PROXY_REQUESTS_TOTAL, "status" => status).increment(1);
        if let Err(e) = &result {
            warn!(url = %url, error = %e, "asset proxy request failed");
        }
        result
    }

    /// Fetch a voice style file.
    pub async fn fetch_voice(&self, filename: &str) -> Result<ProxiedAsset, ProxyError> {
        self.fetch(&self.voice_path(filename)).await
    }

    async fn fetch_url(&self, url: &str) -> Result<ProxiedAsset, ProxyError> {
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_owned();
        let body = response.bytes().await?;
        Ok(ProxiedAsset {
            status,
            content_type,
            body,
        })
    }
}
