//! Worker pool executing dispatched jobs.
//!
//! Each worker takes one request at a time and runs a single attempt:
//! 1. Move the job to Processing (this counts the attempt)
//! 2. Run the processor under a timeout
//! 3. Record the result, or record the failure and either schedule a retry
//!    or settle the job as Failed
//!
//! Retries are re-dispatched by a timer task after the policy delay, so a
//! waiting job does not occupy a worker.

use super::artifact_store::ArtifactStorage;
use super::dispatcher::{DispatchReceiver, DispatchRequest, TaskDispatcher};
use super::lifecycle::{JobLifecycleManager, LifecycleError};
use super::models::JobStatus;
use super::processor::{ArtifactProcessor, ProcessingError};
use super::retry_policy::RetryPolicy;
use crate::config::JobSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to a single dispatched attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed,
    RetryScheduled(Duration),
    Failed,
    /// The job was missing, already settled, or could not be updated.
    Skipped,
}

pub struct WorkerPool {
    lifecycle: Arc<JobLifecycleManager>,
    processor: Arc<dyn ArtifactProcessor>,
    storage: ArtifactStorage,
    dispatcher: TaskDispatcher,
    policy: RetryPolicy,
    processing_timeout: Duration,
    worker_count: usize,
    shutdown: CancellationToken,
}

/// Join handles of a started pool.
pub struct WorkerPoolHandle {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPoolHandle {
    /// Stop the workers and pending retry timers, then wait for in-flight
    /// attempts to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }
    }
}

impl WorkerPool {
    pub fn new(
        lifecycle: Arc<JobLifecycleManager>,
        processor: Arc<dyn ArtifactProcessor>,
        storage: ArtifactStorage,
        dispatcher: TaskDispatcher,
        settings: &JobSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            lifecycle,
            processor,
            storage,
            dispatcher,
            policy: RetryPolicy::new(settings),
            processing_timeout: Duration::from_secs(settings.processing_timeout_secs),
            worker_count: settings.worker_count.max(1),
            shutdown,
        }
    }

    /// Spawn the workers on the current runtime.
    pub fn start(self: &Arc<Self>, receiver: DispatchReceiver) -> WorkerPoolHandle {
        info!(
            "Starting {} worker(s), processor {}, max_retries={}, retry_delay={}s, timeout={}s",
            self.worker_count,
            self.processor.name(),
            self.policy.max_retries,
            self.policy.retry_delay_secs,
            self.processing_timeout.as_secs()
        );
        let handles = (0..self.worker_count)
            .map(|worker_id| {
                let pool = self.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move { pool.run_worker(worker_id, receiver).await })
            })
            .collect();
        WorkerPoolHandle {
            handles,
            shutdown: self.shutdown.clone(),
        }
    }

    async fn run_worker(&self, worker_id: usize, receiver: DispatchReceiver) {
        debug!("Worker {} waiting for jobs", worker_id);
        loop {
            let request = tokio::select! {
                request = receiver.recv() => match request {
                    Some(request) => request,
                    None => {
                        debug!("Dispatch channel closed");
                        break;
                    }
                },
                _ = self.shutdown.cancelled() => break,
            };
            let outcome = self.execute(&request).await;
            debug!(
                "Worker {} finished job {}: {:?}",
                worker_id, request.job_id, outcome
            );
        }
        info!("Worker {} stopped", worker_id);
    }

    /// Run one attempt of the dispatched job.
    pub async fn execute(&self, request: &DispatchRequest) -> AttemptOutcome {
        let job_id = request.job_id.as_str();
        let job = match self.lifecycle.transition_status(job_id, JobStatus::Processing) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!("Job {} no longer exists, dropping dispatch", job_id);
                return AttemptOutcome::Skipped;
            }
            Err(e) => {
                warn!("Job {} cannot start processing: {}", job_id, e);
                return AttemptOutcome::Skipped;
            }
        };
        let attempt = job.attempt_count;
        info!(
            "Processing job {} (attempt {}/{})",
            job_id,
            attempt,
            self.policy.max_attempts()
        );

        let result = match self.process(&request.artifact_location).await {
            Ok(payload) if payload.trim().is_empty() => Err(ProcessingError::Failed(
                "processor returned an empty description".to_string(),
            )),
            other => other,
        };

        match result {
            Ok(payload) => match self.lifecycle.record_result(job_id, &payload) {
                Ok(Some(_)) => {
                    info!("Job {} done", job_id);
                    AttemptOutcome::Completed
                }
                Ok(None) => AttemptOutcome::Skipped,
                Err(e) => {
                    error!("Failed to store result for job {}: {}", job_id, e);
                    AttemptOutcome::Skipped
                }
            },
            Err(e) => self.handle_failure(request, attempt, &e),
        }
    }

    async fn process(&self, artifact_location: &str) -> Result<String, ProcessingError> {
        let path = self
            .storage
            .resolve(artifact_location)
            .map_err(|e| ProcessingError::Failed(e.to_string()))?;
        match tokio::time::timeout(self.processing_timeout, self.processor.process(&path)).await {
            Ok(result) => result,
            Err(_) => Err(ProcessingError::Timeout(self.processing_timeout)),
        }
    }

    fn handle_failure(
        &self,
        request: &DispatchRequest,
        attempt: u32,
        error: &ProcessingError,
    ) -> AttemptOutcome {
        let job_id = request.job_id.as_str();
        let retry_in = self
            .policy
            .should_retry(attempt)
            .then(|| self.policy.delay_after(attempt));
        if let Err(e) = self
            .lifecycle
            .record_failure(job_id, &error.to_string(), retry_in)
        {
            error!("Failed to record failure for job {}: {}", job_id, e);
            return AttemptOutcome::Skipped;
        }

        if let Some(delay) = retry_in {
            warn!(
                "Job {} attempt {} failed: {}, retrying in {}s",
                job_id,
                attempt,
                error,
                delay.as_secs()
            );
            self.schedule_retry(request.clone(), delay);
            AttemptOutcome::RetryScheduled(delay)
        } else {
            warn!(
                "Job {} failed after {} attempt(s): {}",
                job_id, attempt, error
            );
            AttemptOutcome::Failed
        }
    }

    fn schedule_retry(&self, request: DispatchRequest, delay: Duration) {
        let dispatcher = self.dispatcher.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = dispatcher.send(request.clone()) {
                        warn!("Could not re-dispatch job {}: {}", request.job_id, e);
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!("Retry of job {} left for the next startup", request.job_id);
                }
            }
        });
    }

    /// Resume jobs left unsettled by a previous run.
    ///
    /// Queued jobs are dispatched at once. RetryScheduled jobs wait out what
    /// is left of their delay. Jobs found in Processing lost their attempt:
    /// it is recorded as failed and, if the budget allows, a retry is
    /// scheduled after the policy delay.
    pub fn recover_unfinished(&self) -> Result<usize, LifecycleError> {
        let now = chrono::Utc::now().timestamp();
        let mut resumed = 0;
        for job in self.lifecycle.list_unfinished()? {
            let request = DispatchRequest {
                job_id: job.id.clone(),
                artifact_location: job.artifact_location.clone(),
            };
            match job.status {
                JobStatus::Processing => {
                    let retry_in = self
                        .policy
                        .should_retry(job.attempt_count)
                        .then(|| self.policy.delay_after(job.attempt_count));
                    self.lifecycle.record_failure(
                        &job.id,
                        "Attempt interrupted by server shutdown",
                        retry_in,
                    )?;
                    let Some(delay) = retry_in else {
                        warn!("Job {} interrupted on its last attempt, marked failed", job.id);
                        continue;
                    };
                    self.schedule_retry(request, delay);
                }
                JobStatus::RetryScheduled => {
                    let remaining = job
                        .next_attempt_at
                        .map(|due| due.saturating_sub(now).max(0) as u64)
                        .unwrap_or(0);
                    debug!("Job {} retry due in {}s", job.id, remaining);
                    self.schedule_retry(request, Duration::from_secs(remaining));
                }
                _ => {
                    if let Err(e) = self.dispatcher.send(request) {
                        warn!("Could not re-dispatch job {}: {}", job.id, e);
                        continue;
                    }
                }
            }
            resumed += 1;
        }
        if resumed > 0 {
            info!("Resumed {} unfinished job(s)", resumed);
        }
        Ok(resumed)
    }
}
