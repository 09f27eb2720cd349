//! Outbound dispatcher: routes workflow replies to live sessions.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tracing::{info, warn};
use voxrelay_core::constants::{VAR_BOT_REPLY, VAR_UNIQUE_ID};
use voxrelay_core::{OutboundReply, RelayOutcome, ServerFrame, SessionId};
use voxrelay_engine::{ActivatedJob, JobError, JobHandler};
use voxrelay_telemetry::metrics::RELAY_REPLIES_TOTAL;

use crate::registry::{DeliveryOutcome, SessionRegistry};

/// Strip whitespace and stray quoting left by variable serialisation.
///
/// `"\"s1\""` and `" 's1' "` both become `s1`.
pub fn normalize_session_id(raw: &str) -> SessionId {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    SessionId::from(trimmed)
}

/// Handler for the reply callback task.
#[derive(Clone)]
pub struct OutboundDispatcher {
    registry: Arc<SessionRegistry>,
}

impl OutboundDispatcher {
    /// Dispatcher delivering through `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver one reply. Never fails; an undeliverable reply is dropped.
    pub async fn on_callback(&self, reply: OutboundReply) -> RelayOutcome {
        let session_id = normalize_session_id(&reply.session_id);
        let frame = ServerFrame::BotReply {
            content: reply.content,
        };

        let outcome = self.registry.deliver(&session_id, &frame).await;
        counter!(RELAY_REPLIES_TOTAL, "outcome" => outcome.label()).increment(1);

        match outcome {
            DeliveryOutcome::Delivered => {
                info!(session_id = %session_id, "reply relayed");
                RelayOutcome { relayed: true }
            }
            DeliveryOutcome::NotFound => {
                warn!(
                    session_id = %session_id,
                    raw_session_id = %reply.session_id,
                    available = ?self.registry.session_ids(),
                    "no live connection for session, reply dropped"
                );
                RelayOutcome { relayed: false }
            }
            DeliveryOutcome::Failed(e) => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    available = ?self.registry.session_ids(),
                    "reply delivery failed, reply dropped"
                );
                RelayOutcome { relayed: false }
            }
        }
    }
}

/// Pull the reply out of a callback job's variables.
pub fn reply_from_job(job: &ActivatedJob) -> Result<OutboundReply, JobError> {
    let content = job
        .variable_text(VAR_BOT_REPLY)
        .ok_or_else(|| JobError::InvalidVariables(format!("missing '{VAR_BOT_REPLY}'")))?;
    let session_id = job
        .variable_text(VAR_UNIQUE_ID)
        .ok_or_else(|| JobError::InvalidVariables(format!("missing '{VAR_UNIQUE_ID}'")))?;
    Ok(OutboundReply {
        session_id,
        content,
    })
}

#[async_trait]
impl JobHandler for OutboundDispatcher {
    async fn handle(&self, job: &ActivatedJob) -> Result<Value, JobError> {
        let reply = reply_from_job(job)?;
        let outcome = self.on_callback(reply).await;
        // Not relaying is not a job failure; the job always completes.
        serde_json::to_value(outcome).map_err(|e| JobError::Failed(e.to_string()))
    }
}
