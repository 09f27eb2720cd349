//! Request and response bodies of the engine REST API.
//!
//! Entity keys are 64-bit integers in older gateways and strings in newer
//! ones; both decode into `String`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKey {
    Str(String),
    Num(i64),
}

impl From<RawKey> for String {
    fn from(raw: RawKey) -> Self {
        match raw {
            RawKey::Str(s) => s,
            RawKey::Num(n) => n.to_string(),
        }
    }
}

fn de_key<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    RawKey::deserialize(d).map(String::from)
}

fn de_key_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawKey>::deserialize(d)?.map(String::from))
}

/// `POST /v2/messages/publication` body.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMessage {
    /// Message name the process waits on.
    pub name: String,
    /// Correlation key; unique per published occurrence.
    pub correlation_key: String,
    /// Buffer time in milliseconds for messages with no waiting subscription.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u64>,
    /// Variables merged into the process instance.
    pub variables: Value,
}

/// `POST /v2/messages/publication` response.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    /// Engine-assigned message key.
    #[serde(default, deserialize_with = "de_key_opt")]
    pub message_key: Option<String>,
}

/// `POST /v2/jobs/activation` body.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateJobsRequest {
    /// Job type to activate.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Worker name recorded on the job.
    pub worker: String,
    /// Lock duration in milliseconds.
    pub timeout: u64,
    /// Upper bound on returned jobs.
    pub max_jobs_to_activate: u32,
    /// Long-poll duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ActivateJobsResponse {
    #[serde(default)]
    pub jobs: Vec<ActivatedJob>,
}

/// A job locked to this worker.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivatedJob {
    /// Job key used to complete or fail the job.
    #[serde(deserialize_with = "de_key")]
    pub job_key: String,
    /// Job type.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Variables visible to the job.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Remaining retries.
    #[serde(default)]
    pub retries: i32,
    /// Owning process instance.
    #[serde(default, deserialize_with = "de_key_opt")]
    pub process_instance_key: Option<String>,
}

impl ActivatedJob {
    /// A job of the given type with the given variables.
    pub fn new(job_key: impl Into<String>, job_type: impl Into<String>, variables: Value) -> Self {
        Self {
            job_key: job_key.into(),
            job_type: job_type.into(),
            variables: match variables {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            retries: 3,
            process_instance_key: None,
        }
    }

    /// Read a variable as text. Non-string scalars are stringified.
    pub fn variable_text(&self, name: &str) -> Option<String> {
        match self.variables.get(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// `GET /v2/topology` response (only the fields we log).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// Gateway version string.
    #[serde(default)]
    pub gateway_version: Option<String>,
    /// Number of brokers in the cluster.
    #[serde(default)]
    pub cluster_size: Option<u32>,
}
