//! [`HttpEngineClient`]: engine client over the Camunda 8 REST API (v2).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use voxrelay_settings::EngineSettings;

use crate::auth::{OAuthCredentials, TokenProvider};
use crate::client::{JobClient, MessagePublisher};
use crate::errors::EngineError;
use crate::types::{
    ActivateJobsRequest, ActivateJobsResponse, ActivatedJob, PublishMessage, PublishReceipt,
    Topology,
};

/// REST gateway client. Cheap to share behind an `Arc`.
pub struct HttpEngineClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenProvider,
}

impl HttpEngineClient {
    /// Build a client from engine settings.
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .map_err(|e| EngineError::Unreachable(format!("http client: {e}")))?;
        let tokens = TokenProvider::new(http.clone(), OAuthCredentials::from_settings(settings));
        Ok(Self {
            http,
            base_url: settings.base_url(),
            tokens,
        })
    }

    /// Gateway base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, EngineError> {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.tokens.bearer().await? {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, EngineError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 {
            // Token may have been revoked early; fetch a fresh one next time.
            self.tokens.invalidate().await;
        }
        warn!(status = status.as_u16(), body = %body, "engine request failed");
        Err(EngineError::from_status(status.as_u16(), body))
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, EngineError> {
        let builder = self.request(Method::POST, path).await?.json(body);
        let response = self.send(builder).await?;
        decode(response).await
    }

    async fn post_no_content<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), EngineError> {
        let builder = self.request(Method::POST, path).await?.json(body);
        let _response = self.send(builder).await?;
        Ok(())
    }
}

/// Decode a JSON body; an empty body decodes as `null`.
async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, EngineError> {
    let bytes = response.bytes().await?;
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).map_err(|e| EngineError::InvalidResponse(e.to_string()))?
    };
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value).map_err(|e| EngineError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl MessagePublisher for HttpEngineClient {
    async fn publish_message(
        &self,
        message: &PublishMessage,
    ) -> Result<PublishReceipt, EngineError> {
        debug!(
            name = %message.name,
            correlation_key = %message.correlation_key,
            "publishing message"
        );
        self.post_json("/v2/messages/publication", message).await
    }
}

#[async_trait]
impl JobClient for HttpEngineClient {
    async fn topology(&self) -> Result<Topology, EngineError> {
        let builder = self.request(Method::GET, "/v2/topology").await?;
        let response = self.send(builder).await?;
        decode(response).await
    }

    async fn activate_jobs(
        &self,
        request: &ActivateJobsRequest,
    ) -> Result<Vec<ActivatedJob>, EngineError> {
        let response: ActivateJobsResponse =
            self.post_json("/v2/jobs/activation", request).await?;
        Ok(response.jobs)
    }

    async fn complete_job(&self, job_key: &str, variables: Value) -> Result<(), EngineError> {
        self.post_no_content(
            &format!("/v2/jobs/{job_key}/completion"),
            &json!({ "variables": variables }),
        )
        .await
    }

    async fn fail_job(
        &self,
        job_key: &str,
        retries: i32,
        message: &str,
    ) -> Result<(), EngineError> {
        self.post_no_content(
            &format!("/v2/jobs/{job_key}/failure"),
            &json!({ "retries": retries, "errorMessage": message }),
        )
        .await
    }
}
