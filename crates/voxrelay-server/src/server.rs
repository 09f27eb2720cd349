//! Axum HTTP + WebSocket surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use voxrelay_core::{IngestRequest, PublishResult, SessionId};
use voxrelay_engine::EngineSlot;
use voxrelay_settings::{FrontendSettings, RelaySettings};

use crate::health::{self, HealthResponse};
use crate::proxy::{AssetProxy, ProxiedAsset, ProxyError};
use crate::publisher::InboundPublisher;
use crate::registry::SessionRegistry;
use crate::websocket::{self, HeartbeatConfig};

/// Characters of inbound text included in logs.
const LOG_PREVIEW_CHARS: usize = 50;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live session connections.
    pub registry: Arc<SessionRegistry>,
    /// Publishes ingested text to the engine.
    pub publisher: InboundPublisher,
    /// Model/voice asset upstream.
    pub proxy: Arc<AssetProxy>,
    /// Values served from `/api/config`.
    pub frontend: Arc<FrontendSettings>,
    /// Socket liveness settings.
    pub heartbeat: HeartbeatConfig,
    /// Cancelled when the process shuts down.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus renderer, when metrics are enabled.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Assemble state from settings and the shared components.
    pub fn new(
        settings: &RelaySettings,
        registry: Arc<SessionRegistry>,
        engine: EngineSlot,
        shutdown: CancellationToken,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, ProxyError> {
        Ok(Self {
            registry,
            publisher: InboundPublisher::new(
                engine,
                Duration::from_millis(settings.engine.message_ttl_ms),
            ),
            proxy: Arc::new(AssetProxy::new(&settings.assets)?),
            frontend: Arc::new(settings.frontend.clone()),
            heartbeat: HeartbeatConfig::from_settings(&settings.server),
            shutdown,
            start_time: Instant::now(),
            metrics,
        })
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/message", post(message_handler))
        .route("/api/config", get(config_handler))
        .route("/ws/{unique_id}", get(ws_handler))
        .route("/hf-proxy/{*path}", get(hf_proxy_handler))
        .route("/voices/{filename}", get(voices_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until the state's shutdown token fires.
///
/// Returns the bound address (useful with port 0) and the server task.
pub async fn listen(
    addr: &str,
    state: AppState,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    let router = build_router(state);

    info!(%local_addr, "voxrelay server listening");
    let handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server error");
        }
        info!("server stopped");
    });
    Ok((local_addr, handle))
}

fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW_CHARS).collect()
}

/// POST /api/message
///
/// Always 200: a degraded engine shows up in the body, not the status.
async fn message_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Json<PublishResult> {
    let source = request.metadata.source().to_owned();
    let event = request.into_event();
    info!(
        session_id = %event.session_id,
        source = %source,
        text = %preview(&event.text),
        "ingested text"
    );
    Json(state.publisher.publish(event).await)
}

/// GET /api/config
async fn config_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "systemPrompt": state.frontend.system_prompt }))
}

/// GET /ws/{unique_id}
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(unique_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let session_id = SessionId::from(unique_id);
    ws.on_upgrade(move |socket| {
        websocket::run_session(
            socket,
            session_id,
            state.registry,
            state.heartbeat,
            state.shutdown,
        )
    })
}

/// GET /hf-proxy/{*path}
async fn hf_proxy_handler(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    proxy_response(state.proxy.fetch(&path).await)
}

/// GET /voices/{filename}
async fn voices_handler(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    proxy_response(state.proxy.fetch_voice(&filename).await)
}

fn proxy_response(result: Result<ProxiedAsset, ProxyError>) -> Response {
    match result {
        Ok(asset) => {
            let status = StatusCode::from_u16(asset.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, [(header::CONTENT_TYPE, asset.content_type)], asset.body).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.len(),
        state.publisher.is_ready(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;
    use voxrelay_engine::{EngineError, MessagePublisher, PublishMessage, PublishReceipt};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct AcceptingEngine;

    #[async_trait]
    impl MessagePublisher for AcceptingEngine {
        async fn publish_message(
            &self,
            _message: &PublishMessage,
        ) -> Result<PublishReceipt, EngineError> {
            Ok(PublishReceipt::default())
        }
    }

    fn make_state(settings: &RelaySettings, engine: EngineSlot) -> AppState {
        AppState::new(
            settings,
            Arc::new(SessionRegistry::default()),
            engine,
            CancellationToken::new(),
            Some(voxrelay_telemetry::metrics::detached_handle()),
        )
        .unwrap()
    }

    fn app() -> Router {
        build_router(make_state(&RelaySettings::default(), EngineSlot::new()))
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_message(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/message")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn message_without_engine_is_soft_error() {
        let resp = app()
            .oneshot(post_message(&json!({"text": "hi", "metadata": {"uniqueId": "x"}})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!({"status": "error", "message": "client not initialized", "text": "hi"})
        );
    }

    #[tokio::test]
    async fn message_with_engine_is_sent() {
        let slot = EngineSlot::new();
        assert!(slot.install(Arc::new(AcceptingEngine)));
        let app = build_router(make_state(&RelaySettings::default(), slot));

        let resp = app
            .oneshot(post_message(&json!({"text": "turn on lights", "metadata": {"uniqueId": "abc", "source": "mic"}})))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["status"], "sent");
        assert_eq!(body["text"], "turn on lights");
        assert_eq!(body["uniqueId"], "abc");
        assert_eq!(body["messageKey"].as_str().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn message_without_metadata_uses_default_session() {
        let slot = EngineSlot::new();
        assert!(slot.install(Arc::new(AcceptingEngine)));
        let app = build_router(make_state(&RelaySettings::default(), slot));

        let resp = app.oneshot(post_message(&json!({"text": "hey"}))).await.unwrap();
        assert_eq!(body_json(resp).await["uniqueId"], "default");
    }

    #[tokio::test]
    async fn config_returns_system_prompt() {
        let mut settings = RelaySettings::default();
        settings.frontend.system_prompt = "Be brief.".into();
        let app = build_router(make_state(&settings, EngineSlot::new()));

        let resp = app
            .oneshot(Request::builder().uri("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({"systemPrompt": "Be brief."}));
    }

    #[tokio::test]
    async fn health_reports_engine_and_connections() {
        let resp = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["engine_ready"], false);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let resp = app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn voices_are_proxied_from_repo_path() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/onnx-community/Supertonic-TTS-2-ONNX/resolve/main/voices/F1.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("{\"style\":[]}", "application/json"),
            )
            .mount(&upstream)
            .await;

        let mut settings = RelaySettings::default();
        settings.assets.base_url = upstream.uri();
        let app = build_router(make_state(&settings, EngineSlot::new()));

        let resp = app
            .oneshot(Request::builder().uri("/voices/F1.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body_json(resp).await, json!({"style": []}));
    }

    #[tokio::test]
    async fn hf_proxy_relays_status() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&upstream)
            .await;

        let mut settings = RelaySettings::default();
        settings.assets.base_url = upstream.uri();
        let app = build_router(make_state(&settings, EngineSlot::new()));

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/hf-proxy/org/model/resolve/main/missing.onnx")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn hf_proxy_transport_failure_is_500() {
        let mut settings = RelaySettings::default();
        settings.assets.base_url = "http://127.0.0.1:9".into();
        settings.assets.timeout_secs = 2;
        let app = build_router(make_state(&settings, EngineSlot::new()));

        let resp = app
            .oneshot(Request::builder().uri("/hf-proxy/a/b").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_json(resp).await["detail"].is_string());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let resp = app()
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(80);
        assert_eq!(preview(&long).chars().count(), LOG_PREVIEW_CHARS);
        assert_eq!(preview("short"), "short");
    }
}
