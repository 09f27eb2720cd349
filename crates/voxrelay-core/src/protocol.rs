//! Wire types for the ingestion endpoint, engine variables, and WebSocket frames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{VAR_UNIQUE_ID, VAR_USER_INPUT};
use crate::ids::{CorrelationKey, SessionId};

/// Body of `POST /api/message`.
#[derive(Clone, Debug, Deserialize)]
pub struct IngestRequest {
    /// Transcribed user text.
    pub text: String,
    /// Free-form metadata; only `uniqueId` and `source` are interpreted.
    #[serde(default)]
    pub metadata: IngestMetadata,
}

/// Ingestion metadata. Unknown keys are kept but ignored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct IngestMetadata(pub Map<String, Value>);

impl IngestMetadata {
    /// The session id, or `None` when absent or null.
    ///
    /// Non-string scalars are stringified so a numeric id still routes.
    pub fn unique_id(&self) -> Option<String> {
        match self.0.get(VAR_UNIQUE_ID)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Where the text came from (`unknown` when absent).
    pub fn source(&self) -> &str {
        self.0
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }
}

impl IngestRequest {
    /// Convert to an inbound event, defaulting the session id.
    pub fn into_event(self) -> InboundEvent {
        let session_id = self
            .metadata
            .unique_id()
            .map_or_else(SessionId::default_session, SessionId::from);
        InboundEvent {
            text: self.text,
            session_id,
        }
    }
}

/// One text fragment headed for the workflow engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    /// User text, passed through untouched.
    pub text: String,
    /// Stable session identity.
    pub session_id: SessionId,
}

impl InboundEvent {
    /// Build an event; `None` falls back to the default session.
    pub fn new(text: impl Into<String>, session_id: Option<SessionId>) -> Self {
        Self {
            text: text.into(),
            session_id: session_id.unwrap_or_else(SessionId::default_session),
        }
    }

    /// Message variables published alongside the event.
    pub fn variables(&self) -> Value {
        let mut vars = Map::new();
        let _ = vars.insert(VAR_USER_INPUT.into(), Value::String(self.text.clone()));
        let _ = vars.insert(
            VAR_UNIQUE_ID.into(),
            Value::String(self.session_id.as_str().to_owned()),
        );
        Value::Object(vars)
    }
}

/// Outcome of publishing one inbound event, returned as the HTTP body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PublishResult {
    /// The engine accepted the message.
    Sent {
        /// Echo of the published text.
        text: String,
        /// Session id carried in the variables.
        #[serde(rename = "uniqueId")]
        session_id: SessionId,
        /// Correlation key minted for this message.
        #[serde(rename = "messageKey")]
        correlation_key: CorrelationKey,
    },
    /// The message was not published.
    Error {
        /// Human-readable reason.
        message: String,
        /// Echo of the text that was not published.
        text: String,
    },
}

impl PublishResult {
    /// Whether the engine accepted the message.
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    /// Label used for metrics and logs.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Error { .. } => "error",
        }
    }
}

/// Reply extracted from a callback job, before session id normalisation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    /// Session id as serialised by the engine.
    pub session_id: String,
    /// Reply text for the client.
    pub content: String,
}

/// Frames pushed to a client over its duplex connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// A reply produced by the workflow.
    #[serde(rename = "botReply")]
    BotReply {
        /// Reply text.
        content: String,
    },
}

/// Result of handling one callback job; also the job's completion variables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayOutcome {
    /// Whether the reply was written to a live connection.
    pub relayed: bool,
}
