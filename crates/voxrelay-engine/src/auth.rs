//! OAuth2 client-credentials tokens for the engine gateway.

use std::time::{Duration, Instant};

use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use voxrelay_settings::EngineSettings;

use crate::errors::EngineError;

/// Lifetime assumed when the token response has no `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Refresh this long before the token actually expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Client-credentials grant parameters.
#[derive(Clone, Debug)]
pub struct OAuthCredentials {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Token endpoint.
    pub token_url: String,
    /// Requested audience.
    pub audience: String,
}

impl OAuthCredentials {
    /// Credentials from settings, or `None` when any part is missing.
    pub fn from_settings(settings: &EngineSettings) -> Option<Self> {
        if !settings.has_credentials() {
            return None;
        }
        Some(Self {
            client_id: settings.client_id.clone()?,
            client_secret: settings.client_secret.clone()?,
            token_url: settings.authorization_server_url.clone()?,
            audience: settings.token_audience.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Clone, Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Hands out bearer tokens, fetching and caching them on demand.
///
/// Without credentials every request goes out unauthenticated.
pub struct TokenProvider {
    http: reqwest::Client,
    credentials: Option<OAuthCredentials>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Create a provider. `None` credentials disable authentication.
    pub fn new(http: reqwest::Client, credentials: Option<OAuthCredentials>) -> Self {
        if credentials.is_none() {
            info!("engine credentials incomplete, using unauthenticated requests");
        }
        Self {
            http,
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Whether requests carry a bearer token.
    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// Current bearer token, or `None` when unauthenticated.
    ///
    /// Concurrent callers share one in-flight refresh.
    pub async fn bearer(&self) -> Result<Option<String>, EngineError> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(Some(token.value.clone()));
            }
        }
        let token = self.fetch(credentials).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(Some(value))
    }

    /// Drop the cached token so the next request fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn fetch(&self, credentials: &OAuthCredentials) -> Result<CachedToken, EngineError> {
        info!(
            client_id = %credentials.client_id,
            token_url = %credentials.token_url,
            "fetching engine access token"
        );
        let response = self
            .http
            .post(&credentials.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("audience", credentials.audience.as_str()),
            ])
            .send()
            .await
            .map_err(|e| EngineError::Token(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "token request rejected");
            return Err(EngineError::Token(format!("status {status}: {body}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Token(format!("malformed token response: {e}")))?;
        let Some(value) = body.access_token.filter(|t| !t.is_empty()) else {
            return Err(EngineError::Token("token missing in response".into()));
        };

        log_claims(&value);
        let lifetime = body
            .expires_in
            .map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs);
        Ok(CachedToken {
            value,
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        })
    }
}

/// Log issuer, audience and client of a token without verifying it.
fn log_claims(token: &str) {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match jsonwebtoken::decode::<serde_json::Value>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    ) {
        Ok(data) => {
            let claims = data.claims;
            debug!(
                iss = %claims.get("iss").unwrap_or(&serde_json::Value::Null),
                aud = %claims.get("aud").unwrap_or(&serde_json::Value::Null),
                azp = %claims
                    .get("azp")
                    .or_else(|| claims.get("client_id"))
                    .unwrap_or(&serde_json::Value::Null),
                "engine access token claims"
            );
        }
        Err(e) => debug!(error = %e, "access token is not a decodable JWT"),
    }
}
