//! Inbound boundary of the job subsystem: submit, status and result.

use super::artifact_store::{ArtifactStorage, ArtifactStoreError};
use super::dispatcher::{DispatchError, TaskDispatcher};
use super::lifecycle::{JobLifecycleManager, LifecycleError};
use super::models::{Job, JobStatus};
use super::validation::{validate, AdmissionError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("Job not found")]
    NotFound,

    #[error("Job not completed")]
    NotReady(JobStatus),

    #[error("Artifact storage error: {0}")]
    Storage(#[from] ArtifactStoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResultView {
    pub job_id: String,
    pub status: JobStatus,
    pub payload: String,
    pub produced_by: String,
    pub created_at: i64,
    pub completed_at: i64,
}

pub struct JobService {
    lifecycle: Arc<JobLifecycleManager>,
    storage: ArtifactStorage,
    dispatcher: TaskDispatcher,
    max_upload_bytes: u64,
}

impl JobService {
    pub fn new(
        lifecycle: Arc<JobLifecycleManager>,
        storage: ArtifactStorage,
        dispatcher: TaskDispatcher,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            lifecycle,
            storage,
            dispatcher,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Admit an upload, persist it and hand the new job to the workers.
    ///
    /// Nothing is stored when admission fails. Returns as soon as the job is
    /// queued.
    pub async fn submit(
        &self,
        raw_bytes: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<SubmitReceipt, JobServiceError> {
        let extension = validate(content_type, filename, raw_bytes, self.max_upload_bytes)?;
        let location = self.storage.store(&extension, raw_bytes).await?;

        let job = match self.lifecycle.create_job(&location, &extension) {
            Ok(job) => job,
            Err(e) => {
                if let Err(cleanup) = self.storage.remove(&location).await {
                    warn!("Failed to remove orphan artifact {}: {}", location, cleanup);
                }
                return Err(e.into());
            }
        };
        self.dispatcher.dispatch(&job.id, &job.artifact_location)?;

        info!(
            "Accepted job {} ({} bytes, .{})",
            job.id,
            raw_bytes.len(),
            extension
        );
        Ok(SubmitReceipt {
            job_id: job.id,
            status: job.status,
        })
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatusView, JobServiceError> {
        let job = self.find(job_id)?;
        Ok(JobStatusView {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
        })
    }

    pub fn result(&self, job_id: &str) -> Result<JobResultView, JobServiceError> {
        let job = self.find(job_id)?;
        let completed_at = job.completed_at();
        match (job.result_payload, completed_at) {
            (Some(payload), Some(completed_at)) => Ok(JobResultView {
                job_id: job.id,
                status: job.status,
                payload,
                produced_by: job.produced_by,
                created_at: job.created_at,
                completed_at,
            }),
            _ => Err(JobServiceError::NotReady(job.status)),
        }
    }

    fn find(&self, job_id: &str) -> Result<Job, JobServiceError> {
        self.lifecycle
            .get_job(job_id)?
            .ok_or(JobServiceError::NotFound)
    }
}
