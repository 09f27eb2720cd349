//! Engine boundary traits.
//!
//! The relay only ever talks to the engine through these, so tests swap in
//! in-memory fakes.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::EngineError;
use crate::types::{ActivateJobsRequest, ActivatedJob, PublishMessage, PublishReceipt, Topology};

/// Publishes correlation messages.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one message. Never retried by the implementation.
    async fn publish_message(&self, message: &PublishMessage)
        -> Result<PublishReceipt, EngineError>;
}

/// Activates, completes and fails jobs.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Probe the gateway; used to decide when the engine is reachable.
    async fn topology(&self) -> Result<Topology, EngineError>;

    /// Lock up to `max_jobs_to_activate` jobs of one type to this worker.
    async fn activate_jobs(
        &self,
        request: &ActivateJobsRequest,
    ) -> Result<Vec<ActivatedJob>, EngineError>;

    /// Complete a job, merging `variables` into the process instance.
    async fn complete_job(&self, job_key: &str, variables: Value) -> Result<(), EngineError>;

    /// Fail a job, leaving `retries` attempts.
    async fn fail_job(&self, job_key: &str, retries: i32, message: &str)
        -> Result<(), EngineError>;
}
