//! End-to-end tests using a real listener and WebSocket clients.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use voxrelay_core::constants::VOICE_RESPONSE_TASK;
use voxrelay_core::{OutboundReply, SessionId};
use voxrelay_engine::{
    ActivateJobsRequest, ActivatedJob, EngineConnector, EngineError, EngineSlot, JobClient,
    MessagePublisher, PublishMessage, PublishReceipt, TaskRouter, Topology, WorkerConfig,
};
use voxrelay_server::{listen, AppState, OutboundDispatcher, SessionRegistry};
use voxrelay_settings::RelaySettings;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    base: String,
    registry: Arc<SessionRegistry>,
    slot: EngineSlot,
    cancel: CancellationToken,
}

impl TestServer {
    async fn boot() -> Self {
        let mut settings = RelaySettings::default();
        settings.server.heartbeat_interval_ms = 200;
        settings.server.heartbeat_timeout_ms = 1_000;

        let registry = Arc::new(SessionRegistry::from_settings(&settings.server));
        let slot = EngineSlot::new();
        let cancel = CancellationToken::new();
        let state = AppState::new(&settings, registry.clone(), slot.clone(), cancel.clone(), None)
            .unwrap();
        let (addr, _handle) = listen("127.0.0.1:0", state).await.unwrap();
        Self {
            base: format!("{addr}"),
            registry,
            slot,
            cancel,
        }
    }

    async fn connect(&self, session: &str) -> WsStream {
        let (ws, _) = connect_async(format!("ws://{}/ws/{session}", self.base))
            .await
            .unwrap();
        ws
    }

    async fn wait_until(&self, cond: impl Fn(&SessionRegistry) -> bool) {
        timeout(TIMEOUT, async {
            while !cond(&self.registry) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry condition not reached");
    }

    fn dispatcher(&self) -> OutboundDispatcher {
        OutboundDispatcher::new(self.registry.clone())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Next text frame, skipping control frames.
async fn next_text(ws: &mut WsStream) -> Value {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no frame received")
}

fn reply(session: &str, content: &str) -> OutboundReply {
    OutboundReply {
        session_id: session.into(),
        content: content.into(),
    }
}

fn has(session: &'static str) -> impl Fn(&SessionRegistry) -> bool {
    move |r| r.lookup(&SessionId::from(session)).is_some()
}

#[tokio::test]
async fn reply_reaches_connected_session() {
    let server = TestServer::boot().await;
    let mut ws = server.connect("s1").await;
    server.wait_until(has("s1")).await;

    let outcome = server.dispatcher().on_callback(reply("\"s1\"", "Hello!")).await;
    assert!(outcome.relayed);
    assert_eq!(
        next_text(&mut ws).await,
        json!({"type": "botReply", "content": "Hello!"})
    );
}

#[tokio::test]
async fn client_text_is_ignored() {
    let server = TestServer::boot().await;
    let mut ws = server.connect("chatty").await;
    server.wait_until(has("chatty")).await;

    ws.send(Message::Text("hello server".into())).await.unwrap();
    let outcome = server.dispatcher().on_callback(reply("chatty", "still here")).await;
    assert!(outcome.relayed);
    assert_eq!(next_text(&mut ws).await["content"], "still here");
}

#[tokio::test]
async fn disconnect_unregisters_and_drops_replies() {
    let server = TestServer::boot().await;
    let mut ws = server.connect("s2").await;
    server.wait_until(has("s2")).await;

    ws.close(None).await.unwrap();
    server.wait_until(|r| r.is_empty()).await;

    let outcome = server.dispatcher().on_callback(reply("s2", "too late")).await;
    assert!(!outcome.relayed);
    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn reconnect_wins_and_old_close_keeps_new_entry() {
    let server = TestServer::boot().await;
    let mut first = server.connect("dup").await;
    server.wait_until(has("dup")).await;
    let first_id = server.registry.lookup(&SessionId::from("dup")).unwrap().id.clone();

    let mut second = server.connect("dup").await;
    server
        .wait_until(move |r| {
            r.lookup(&SessionId::from("dup"))
                .is_some_and(|c| c.id != first_id)
        })
        .await;

    first.close(None).await.unwrap();
    // Give the first socket's cleanup a chance to run.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.registry.len(), 1);

    let outcome = server.dispatcher().on_callback(reply("dup", "to the newest")).await;
    assert!(outcome.relayed);
    assert_eq!(next_text(&mut second).await["content"], "to the newest");
}

#[tokio::test]
async fn shutdown_closes_sockets() {
    let server = TestServer::boot().await;
    let mut ws = server.connect("bye").await;
    server.wait_until(has("bye")).await;

    server.cancel.cancel();
    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
    server.wait_until(|r| r.is_empty()).await;
}

// ── Full round trip through an in-memory engine ──

/// Answers every published message with a reply job for the same session.
#[derive(Default)]
struct LoopbackEngine {
    pending: Mutex<VecDeque<ActivatedJob>>,
    completed: Mutex<Vec<(String, Value)>>,
    next_key: Mutex<u64>,
}

#[async_trait]
impl MessagePublisher for LoopbackEngine {
    async fn publish_message(
        &self,
        message: &PublishMessage,
    ) -> Result<PublishReceipt, EngineError> {
        let key = {
            let mut next = self.next_key.lock();
            *next += 1;
            *next
        };
        let text = message.variables["userInput"].as_str().unwrap_or_default();
        let session = message.variables["uniqueId"].clone();
        // Engines hand string variables back JSON-encoded at times.
        let quoted = format!("\"{}\"", session.as_str().unwrap_or_default());
        self.pending.lock().push_back(ActivatedJob::new(
            key.to_string(),
            VOICE_RESPONSE_TASK,
            json!({"botReply": format!("echo: {text}"), "uniqueId": quoted}),
        ));
        Ok(PublishReceipt {
            message_key: Some(key.to_string()),
        })
    }
}

#[async_trait]
impl JobClient for LoopbackEngine {
    async fn topology(&self) -> Result<Topology, EngineError> {
        Ok(Topology::default())
    }

    async fn activate_jobs(
        &self,
        request: &ActivateJobsRequest,
    ) -> Result<Vec<ActivatedJob>, EngineError> {
        let mut pending = self.pending.lock();
        let n = pending.len().min(request.max_jobs_to_activate as usize);
        Ok(pending.drain(..n).collect())
    }

    async fn complete_job(&self, job_key: &str, variables: Value) -> Result<(), EngineError> {
        self.completed.lock().push((job_key.to_owned(), variables));
        Ok(())
    }

    async fn fail_job(&self, _job_key: &str, _retries: i32, _message: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

#[tokio::test]
async fn message_round_trip_through_engine() {
    let server = TestServer::boot().await;
    let engine = Arc::new(LoopbackEngine::default());

    let mut router = TaskRouter::new();
    router.register(VOICE_RESPONSE_TASK, server.dispatcher());
    let connector = EngineConnector::new(
        engine.clone(),
        server.slot.clone(),
        Arc::new(router),
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        },
        Duration::from_millis(10),
    );
    let _connector = tokio::spawn(connector.run(server.cancel.clone()));
    timeout(TIMEOUT, async {
        while !server.slot.is_ready() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let mut ws = server.connect("abc").await;
    server.wait_until(has("abc")).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{}/api/message", server.base))
        .json(&json!({"text": "turn on lights", "metadata": {"uniqueId": "abc", "source": "test"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "sent");
    assert_eq!(body["uniqueId"], "abc");

    assert_eq!(
        next_text(&mut ws).await,
        json!({"type": "botReply", "content": "echo: turn on lights"})
    );

    timeout(TIMEOUT, async {
        while engine.completed.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(engine.completed.lock()[0].1, json!({"relayed": true}));
}

#[tokio::test]
async fn message_before_engine_ready_is_soft_error() {
    let server = TestServer::boot().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/api/message", server.base))
        .json(&json!({"text": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({"status": "error", "message": "client not initialized", "text": "hi"})
    );
}
