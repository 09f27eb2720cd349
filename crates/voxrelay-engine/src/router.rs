//! Task-type registry and job dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{error, warn};
use voxrelay_telemetry::metrics::{ENGINE_JOBS_TOTAL, ENGINE_JOB_DURATION_SECONDS};

use crate::errors::JobError;
use crate::types::ActivatedJob;

/// Handles jobs of one task type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process the job and return the variables to complete it with.
    async fn handle(&self, job: &ActivatedJob) -> Result<Value, JobError>;
}

/// Registry mapping task types to handlers.
pub struct TaskRouter {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl TaskRouter {
    /// Maximum time a single job handler is allowed to run.
    const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a task type, replacing any previous one.
    pub fn register(&mut self, task_type: &str, handler: impl JobHandler + 'static) {
        let _ = self.handlers.insert(task_type.to_owned(), Arc::new(handler));
    }

    /// Dispatch a job to the handler for its type.
    pub async fn dispatch(&self, job: &ActivatedJob) -> Result<Value, JobError> {
        let task_type = job.job_type.clone();
        let Some(handler) = self.handlers.get(&task_type) else {
            counter!(ENGINE_JOBS_TOTAL, "task_type" => task_type.clone(), "outcome" => "unknown_type")
                .increment(1);
            return Err(JobError::UnknownTaskType(task_type));
        };

        let start = Instant::now();
        let result = match tokio::time::timeout(Self::HANDLER_TIMEOUT, handler.handle(job)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                error!(
                    task_type,
                    job_key = %job.job_key,
                    "job handler timed out after {:?}",
                    Self::HANDLER_TIMEOUT
                );
                Err(JobError::TimedOut(Self::HANDLER_TIMEOUT))
            }
        };

        let duration = start.elapsed();
        histogram!(ENGINE_JOB_DURATION_SECONDS, "task_type" => task_type.clone())
            .record(duration.as_secs_f64());
        if duration.as_secs() >= 5 {
            warn!(
                task_type,
                duration_secs = duration.as_secs_f64(),
                "slow job handler"
            );
        }

        result
    }

    /// All registered task types (sorted).
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Whether a handler is registered for the task type.
    pub fn has_task_type(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::new()
    }
}
