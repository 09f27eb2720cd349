//! Inbound publisher: turns client text into engine messages.

use std::time::Duration;

use metrics::counter;
use tracing::{error, info, warn};
use voxrelay_core::constants::{CLIENT_NOT_INITIALIZED, VOICE_INPUT_MESSAGE};
use voxrelay_core::{CorrelationKey, InboundEvent, PublishResult};
use voxrelay_engine::{EngineSlot, PublishMessage};
use voxrelay_telemetry::metrics::RELAY_PUBLISH_TOTAL;

/// Publishes inbound events, minting one correlation key per event.
///
/// Failures come back as [`PublishResult::Error`]; nothing here is retried.
#[derive(Clone, Debug)]
pub struct InboundPublisher {
    engine: EngineSlot,
    message_ttl: Duration,
}

impl InboundPublisher {
    /// Publisher that uses whatever engine client ends up in `engine`.
    ///
    /// Messages are buffered by the engine for `message_ttl`, so a fragment
    /// that arrives before its process subscribes still correlates.
    pub fn new(engine: EngineSlot, message_ttl: Duration) -> Self {
        Self {
            engine,
            message_ttl,
        }
    }

    /// Whether an engine client is available.
    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    /// Publish one event.
    pub async fn publish(&self, event: InboundEvent) -> PublishResult {
        let result = self.publish_inner(event).await;
        counter!(RELAY_PUBLISH_TOTAL, "status" => result.status()).increment(1);
        result
    }

    async fn publish_inner(&self, event: InboundEvent) -> PublishResult {
        let Some(client) = self.engine.get() else {
            warn!(session_id = %event.session_id, "engine client not initialized, message not published");
            return PublishResult::Error {
                message: CLIENT_NOT_INITIALIZED.to_owned(),
                text: event.text,
            };
        };

        let correlation_key = CorrelationKey::generate();
        let message = PublishMessage {
            name: VOICE_INPUT_MESSAGE.to_owned(),
            correlation_key: correlation_key.as_str().to_owned(),
            time_to_live: Some(u64::try_from(self.message_ttl.as_millis()).unwrap_or(u64::MAX)),
            variables: event.variables(),
        };

        match client.publish_message(&message).await {
            Ok(receipt) => {
                info!(
                    session_id = %event.session_id,
                    correlation_key = %correlation_key,
                    message_key = receipt.message_key.as_deref().unwrap_or("-"),
                    "message published"
                );
                PublishResult::Sent {
                    text: event.text,
                    session_id: event.session_id,
                    correlation_key,
                }
            }
            Err(e) => {
                error!(
                    session_id = %event.session_id,
                    correlation_key = %correlation_key,
                    message = VOICE_INPUT_MESSAGE,
                    kind = e.error_kind(),
                    error = %e,
                    "failed to publish message"
                );
                PublishResult::Error {
                    message: e.to_string(),
                    text: event.text,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use voxrelay_core::SessionId;
    use voxrelay_engine::{EngineError, MessagePublisher, PublishReceipt};

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<PublishMessage>>,
    }

    #[async_trait]
    impl MessagePublisher for RecordingPublisher {
        async fn publish_message(
            &self,
            message: &PublishMessage,
        ) -> Result<PublishReceipt, EngineError> {
            self.published.lock().push(message.clone());
            Ok(PublishReceipt {
                message_key: Some("1".into()),
            })
        }
    }

    struct DownPublisher;

    #[async_trait]
    impl MessagePublisher for DownPublisher {
        async fn publish_message(
            &self,
            _message: &PublishMessage,
        ) -> Result<PublishReceipt, EngineError> {
            Err(EngineError::Unreachable("connection refused".into()))
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    fn ready_publisher() -> (InboundPublisher, Arc<RecordingPublisher>) {
        let recorder = Arc::new(RecordingPublisher::default());
        let slot = EngineSlot::new();
        assert!(slot.install(recorder.clone()));
        (InboundPublisher::new(slot, TTL), recorder)
    }

    #[tokio::test]
    async fn publishes_with_fresh_key_and_session_variable() {
        let (publisher, recorder) = ready_publisher();
        let event = InboundEvent::new("turn on lights", Some(SessionId::from("abc")));

        let result = publisher.publish(event).await;
        assert_matches!(
            &result,
            PublishResult::Sent { text, session_id, .. }
                if text == "turn on lights" && session_id.as_str() == "abc"
        );

        let published = recorder.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].name, "MSG_VOICE");
        assert_eq!(
            published[0].variables,
            serde_json::json!({"userInput": "turn on lights", "uniqueId": "abc"})
        );
        let PublishResult::Sent { correlation_key, .. } = result else {
            unreachable!()
        };
        assert_eq!(published[0].correlation_key, correlation_key.as_str());
        assert!(uuid_like(correlation_key.as_str()));
    }

    #[tokio::test]
    async fn published_message_is_buffered_for_ttl() {
        let (publisher, recorder) = ready_publisher();
        let _ = publisher
            .publish(InboundEvent::new("early", Some(SessionId::from("abc"))))
            .await;
        let published = recorder.published.lock();
        assert_eq!(published[0].time_to_live, Some(60_000));
        assert_eq!(serde_json::to_value(&published[0]).unwrap()["timeToLive"], 60_000);
    }

    #[tokio::test]
    async fn uninitialized_client_is_soft_error() {
        let publisher = InboundPublisher::new(EngineSlot::new(), TTL);
        assert!(!publisher.is_ready());
        let result = publisher
            .publish(InboundEvent::new("hi", Some(SessionId::from("x"))))
            .await;
        assert_eq!(
            result,
            PublishResult::Error {
                message: "client not initialized".into(),
                text: "hi".into(),
            }
        );
    }

    #[tokio::test]
    async fn publish_failure_is_soft_error() {
        let slot = EngineSlot::new();
        assert!(slot.install(Arc::new(DownPublisher)));
        let result = InboundPublisher::new(slot, TTL)
            .publish(InboundEvent::new("hello", None))
            .await;
        assert_matches!(
            result,
            PublishResult::Error { message, text }
                if message.contains("connection refused") && text == "hello"
        );
    }

    #[tokio::test]
    async fn missing_session_uses_default() {
        let (publisher, recorder) = ready_publisher();
        let _ = publisher.publish(InboundEvent::new("hey", None)).await;
        assert_eq!(recorder.published.lock()[0].variables["uniqueId"], "default");
    }

    fn uuid_like(s: &str) -> bool {
        s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4
    }

    proptest! {
        #[test]
        fn same_session_gets_distinct_keys(session in "[a-z0-9]{1,12}", texts in proptest::collection::vec(".{0,20}", 2..6)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (publisher, recorder) = ready_publisher();
            rt.block_on(async {
                for text in &texts {
                    let _ = publisher
                        .publish(InboundEvent::new(text.clone(), Some(SessionId::from(session.as_str()))))
                        .await;
                }
            });
            let published = recorder.published.lock();
            let mut keys: Vec<&str> = published.iter().map(|m| m.correlation_key.as_str()).collect();
            keys.sort_unstable();
            keys.dedup();
            prop_assert_eq!(keys.len(), texts.len());
            for message in published.iter() {
                prop_assert_eq!(&message.variables["uniqueId"], session.as_str());
            }
        }
    }
}
