//! Supervised job polling loop.
//!
//! One loop polls every registered task type in turn. Each activated job runs
//! on its own task so a slow handler never holds up the others.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voxrelay_settings::EngineSettings;
use voxrelay_telemetry::metrics::ENGINE_JOBS_TOTAL;

use crate::client::JobClient;
use crate::router::TaskRouter;
use crate::types::{ActivateJobsRequest, ActivatedJob};

/// Polling parameters.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Worker name recorded on activated jobs.
    pub worker_name: String,
    /// Lock duration for activated jobs.
    pub job_timeout: Duration,
    /// Upper bound on jobs per activation call.
    pub max_jobs_to_activate: u32,
    /// Pause between idle polls and after activation errors.
    pub poll_interval: Duration,
}

impl WorkerConfig {
    /// Derive from engine settings.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            worker_name: settings.worker_name.clone(),
            job_timeout: Duration::from_millis(settings.job_timeout_ms),
            max_jobs_to_activate: settings.max_jobs_to_activate,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

/// Activates jobs for every task type in a [`TaskRouter`] and runs them.
pub struct JobWorker {
    client: Arc<dyn JobClient>,
    router: Arc<TaskRouter>,
    config: WorkerConfig,
}

impl JobWorker {
    /// Create a worker over `client`, dispatching through `router`.
    pub fn new(client: Arc<dyn JobClient>, router: Arc<TaskRouter>, config: WorkerConfig) -> Self {
        Self {
            client,
            router,
            config,
        }
    }

    /// Poll until `cancel` fires, then wait for in-flight jobs.
    pub async fn run(self, cancel: CancellationToken) {
        let task_types = self.router.task_types();
        if task_types.is_empty() {
            warn!("job worker started with no task types registered");
        }
        info!(
            worker = %self.config.worker_name,
            task_types = ?task_types,
            "job worker started"
        );

        let mut in_flight = JoinSet::new();
        loop {
            let mut activated = 0usize;
            let mut failed = false;

            for task_type in &task_types {
                let request = self.activation_request(task_type);
                let result = tokio::select! {
                    () = cancel.cancelled() => break,
                    result = self.client.activate_jobs(&request) => result,
                };
                match result {
                    Ok(jobs) => {
                        activated += jobs.len();
                        for job in jobs {
                            debug!(task_type, job_key = %job.job_key, "job activated");
                            let client = Arc::clone(&self.client);
                            let router = Arc::clone(&self.router);
                            let _handle = in_flight.spawn(process_job(client, router, job));
                        }
                    }
                    Err(e) => {
                        failed = true;
                        warn!(task_type, error = %e, kind = e.error_kind(), "job activation failed");
                    }
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    warn!(error = %e, "job task panicked");
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            if activated == 0 || failed {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        let pending = in_flight.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight jobs");
            if tokio::time::timeout(self.config.job_timeout, drain(&mut in_flight))
                .await
                .is_err()
            {
                warn!("in-flight jobs did not finish in time, aborting");
                in_flight.abort_all();
            }
        }
        info!(worker = %self.config.worker_name, "job worker stopped");
    }

    fn activation_request(&self, task_type: &str) -> ActivateJobsRequest {
        ActivateJobsRequest {
            job_type: task_type.to_owned(),
            worker: self.config.worker_name.clone(),
            timeout: duration_ms(self.config.job_timeout),
            max_jobs_to_activate: self.config.max_jobs_to_activate,
            request_timeout: None,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn drain(set: &mut JoinSet<()>) {
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "job task panicked");
        }
    }
}

/// Dispatch one job, then complete or fail it.
async fn process_job(client: Arc<dyn JobClient>, router: Arc<TaskRouter>, job: ActivatedJob) {
    let task_type = job.job_type.clone();
    match router.dispatch(&job).await {
        Ok(variables) => {
            let variables = if variables.is_null() {
                Value::Object(serde_json::Map::new())
            } else {
                variables
            };
            match client.complete_job(&job.job_key, variables).await {
                Ok(()) => {
                    counter!(ENGINE_JOBS_TOTAL, "task_type" => task_type.clone(), "outcome" => "completed")
                        .increment(1);
                    debug!(task_type, job_key = %job.job_key, "job completed");
                }
                Err(e) => {
                    counter!(ENGINE_JOBS_TOTAL, "task_type" => task_type.clone(), "outcome" => "complete_error")
                        .increment(1);
                    warn!(task_type, job_key = %job.job_key, error = %e, "failed to complete job");
                }
            }
        }
        Err(job_error) => {
            let retries = (job.retries - 1).max(0);
            warn!(
                task_type,
                job_key = %job.job_key,
                retries,
                error = %job_error,
                "job handler failed"
            );
            counter!(ENGINE_JOBS_TOTAL, "task_type" => task_type.clone(), "outcome" => "failed")
                .increment(1);
            if let Err(e) = client
                .fail_job(&job.job_key, retries, &job_error.to_string())
                .await
            {
                warn!(task_type, job_key = %job.job_key, error = %e, "failed to report job failure");
            }
        }
    }
}
