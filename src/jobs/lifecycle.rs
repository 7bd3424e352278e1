//! Job lifecycle manager.
//!
//! The only component allowed to change a job's status. Every write checks
//! the edge against [`JobStatus::can_transition_to`] and is applied with a
//! compare-and-set on the current status, so two writers racing on the same
//! job cannot both succeed.

use super::models::{Job, JobStatus, JobUpdate, UpdateOutcome};
use super::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("A result payload must not be empty")]
    EmptyResult,

    #[error("Job {id} changed concurrently (now {current})")]
    ConcurrentUpdate { id: String, current: JobStatus },

    #[error("Job store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

pub struct JobLifecycleManager {
    store: Arc<dyn JobStore>,
    produced_by: String,
}

impl JobLifecycleManager {
    pub fn new(store: Arc<dyn JobStore>, produced_by: impl Into<String>) -> Self {
        Self {
            store,
            produced_by: produced_by.into(),
        }
    }

    /// Create a queued job for an admitted artifact.
    pub fn create_job(&self, artifact_location: &str, extension: &str) -> LifecycleResult<Job> {
        let job = Job::new(
            Uuid::new_v4().to_string(),
            artifact_location.to_string(),
            extension.to_string(),
            self.produced_by.clone(),
        );
        self.store.insert_job(&job)?;
        debug!("Created job {} for artifact {}", job.id, artifact_location);
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> LifecycleResult<Option<Job>> {
        Ok(self.store.get_job(id)?)
    }

    /// Jobs that were not settled yet, oldest first.
    pub fn list_unfinished(&self) -> LifecycleResult<Vec<Job>> {
        Ok(self.store.list_jobs_by_status(&[
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::RetryScheduled,
        ])?)
    }

    /// Move a job to `new_status`.
    ///
    /// Returns `Ok(None)` if the job does not exist. Entering `Processing`
    /// counts a new attempt. `Done` is refused here because it needs a
    /// payload, see [`Self::record_result`].
    pub fn transition_status(
        &self,
        id: &str,
        new_status: JobStatus,
    ) -> LifecycleResult<Option<Job>> {
        if new_status == JobStatus::Done {
            return Err(LifecycleError::EmptyResult);
        }
        self.apply(id, new_status, |current| {
            JobUpdate::status(new_status, current.last_error.clone())
        })
    }

    /// Store the produced payload and mark the job Done.
    pub fn record_result(&self, id: &str, payload: &str) -> LifecycleResult<Option<Job>> {
        if payload.trim().is_empty() {
            return Err(LifecycleError::EmptyResult);
        }
        self.apply(id, JobStatus::Done, |_| JobUpdate::done(payload.to_string()))
    }

    /// Record a failed attempt.
    ///
    /// With `retry_in` the job goes to `RetryScheduled` and remembers when the
    /// next attempt is due, so the wait survives a restart. Without it the job
    /// settles as `Failed`.
    pub fn record_failure(
        &self,
        id: &str,
        error: &str,
        retry_in: Option<Duration>,
    ) -> LifecycleResult<Option<Job>> {
        let next = if retry_in.is_some() {
            JobStatus::RetryScheduled
        } else {
            JobStatus::Failed
        };
        self.apply(id, next, |_| match retry_in {
            Some(delay) => JobUpdate::retry(error.to_string(), delay),
            None => JobUpdate::status(next, Some(error.to_string())),
        })
    }

    fn apply(
        &self,
        id: &str,
        next: JobStatus,
        make_update: impl FnOnce(&Job) -> JobUpdate,
    ) -> LifecycleResult<Option<Job>> {
        let Some(current) = self.store.get_job(id)? else {
            return Ok(None);
        };
        if !current.status.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        let update = make_update(&current);
        match self.store.update_job_if_status(id, current.status, &update)? {
            UpdateOutcome::Updated(job) => {
                debug!("Job {}: {} -> {}", id, current.status, job.status);
                Ok(Some(job))
            }
            UpdateOutcome::NotFound => Ok(None),
            UpdateOutcome::StatusMismatch(now) => Err(LifecycleError::ConcurrentUpdate {
                id: id.to_string(),
                current: now,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::DEFAULT_PRODUCED_BY;
    use crate::jobs::store::SqliteJobStore;
    use std::collections::HashSet;

    fn manager() -> JobLifecycleManager {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        JobLifecycleManager::new(store, DEFAULT_PRODUCED_BY)
    }

    fn assert_payload_invariant(job: &Job) {
        assert_eq!(
            job.result_payload.is_some(),
            job.status == JobStatus::Done,
            "payload/status invariant broken: {:?}",
            job
        );
    }

    #[test]
    fn test_create_job_is_queued() {
        let manager = manager();
        let job = manager.create_job("a.png", "png").unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.artifact_location, "a.png");
        assert_eq!(job.artifact_extension, "png");
        assert_eq!(job.produced_by, DEFAULT_PRODUCED_BY);
        assert_payload_invariant(&job);
        assert_eq!(manager.get_job(&job.id).unwrap(), Some(job));
    }

    #[test]
    fn test_produced_by_is_overridable() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let manager = JobLifecycleManager::new(store, "other-model");
        let job = manager.create_job("a.png", "png").unwrap();
        assert_eq!(job.produced_by, "other-model");
    }

    #[test]
    fn test_happy_path_transitions() {
        let manager = manager();
        let job = manager.create_job("a.jpg", "jpg").unwrap();

        let processing = manager
            .transition_status(&job.id, JobStatus::Processing)
            .unwrap()
            .unwrap();
        assert_eq!(processing.status, JobStatus::Processing);
        assert_eq!(processing.attempt_count, 1);
        assert_payload_invariant(&processing);

        let done = manager
            .record_result(&job.id, "A beautiful landscape")
            .unwrap()
            .unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.result_payload.as_deref(), Some("A beautiful landscape"));
        assert_eq!(done.completed_at(), Some(done.updated_at));
        assert_payload_invariant(&done);
    }

    #[test]
    fn test_missing_job_is_absent() {
        let manager = manager();
        assert!(manager.get_job("missing").unwrap().is_none());
        assert!(manager
            .transition_status("missing", JobStatus::Processing)
            .unwrap()
            .is_none());
        assert!(manager.record_result("missing", "x").unwrap().is_none());
        assert!(manager.record_failure("missing", "x", None).unwrap().is_none());
    }

    #[test]
    fn test_queued_cannot_jump_to_terminal() {
        let manager = manager();
        let job = manager.create_job("a.jpg", "jpg").unwrap();

        assert!(matches!(
            manager.transition_status(&job.id, JobStatus::Failed),
            Err(LifecycleError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Failed
            })
        ));
        assert!(matches!(
            manager.record_result(&job.id, "too early"),
            Err(LifecycleError::InvalidTransition { .. })
        ));

        let unchanged = manager.get_job(&job.id).unwrap().unwrap();
        assert_eq!(unchanged.status, JobStatus::Queued);
        assert_payload_invariant(&unchanged);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let manager = manager();
        let job = manager.create_job("a.jpg", "jpg").unwrap();
        manager.transition_status(&job.id, JobStatus::Processing).unwrap();
        manager.record_failure(&job.id, "boom", None).unwrap();

        for next in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::RetryScheduled,
            JobStatus::Failed,
        ] {
            assert!(matches!(
                manager.transition_status(&job.id, next),
                Err(LifecycleError::InvalidTransition { .. })
            ));
        }
        assert!(manager.record_result(&job.id, "late").is_err());

        let failed = manager.get_job(&job.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("boom"));
        assert_payload_invariant(&failed);
    }

    #[test]
    fn test_retry_cycle_counts_attempts_and_keeps_error() {
        let manager = manager();
        let job = manager.create_job("a.jpg", "jpg").unwrap();

        manager.transition_status(&job.id, JobStatus::Processing).unwrap();
        let waiting = manager
            .record_failure(&job.id, "timeout", Some(Duration::from_secs(30)))
            .unwrap()
            .unwrap();
        assert_eq!(waiting.status, JobStatus::RetryScheduled);
        assert_eq!(waiting.next_attempt_at, Some(waiting.updated_at + 30));
        assert_payload_invariant(&waiting);

        let second = manager
            .transition_status(&job.id, JobStatus::Processing)
            .unwrap()
            .unwrap();
        assert_eq!(second.attempt_count, 2);
        assert_eq!(second.last_error.as_deref(), Some("timeout"));
        assert_eq!(second.next_attempt_at, None);

        let done = manager.record_result(&job.id, "ok").unwrap().unwrap();
        assert!(done.last_error.is_none());
        assert_payload_invariant(&done);
    }

    #[test]
    fn test_done_requires_payload() {
        let manager = manager();
        let job = manager.create_job("a.jpg", "jpg").unwrap();
        manager.transition_status(&job.id, JobStatus::Processing).unwrap();

        assert!(matches!(
            manager.transition_status(&job.id, JobStatus::Done),
            Err(LifecycleError::EmptyResult)
        ));
        assert!(matches!(
            manager.record_result(&job.id, "   "),
            Err(LifecycleError::EmptyResult)
        ));
        assert_eq!(
            manager.get_job(&job.id).unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[test]
    fn test_list_unfinished() {
        let manager = manager();
        let queued = manager.create_job("a.jpg", "jpg").unwrap();
        let done = manager.create_job("b.jpg", "jpg").unwrap();
        manager.transition_status(&done.id, JobStatus::Processing).unwrap();
        manager.record_result(&done.id, "ok").unwrap();

        let unfinished = manager.list_unfinished().unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, queued.id);
    }

    #[test]
    fn test_concurrent_create_produces_distinct_ids() {
        let manager = Arc::new(manager());
        let n = 64;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    manager
                        .create_job(&format!("artifact-{}.png", i), "png")
                        .unwrap()
                        .id
                })
            })
            .collect();
        let ids: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(ids.len(), n);
        for id in &ids {
            assert!(manager.get_job(id).unwrap().is_some());
        }
        assert_eq!(manager.list_unfinished().unwrap().len(), n);
    }

    #[test]
    fn test_concurrent_transitions_have_single_winner() {
        let manager = Arc::new(manager());
        let job = manager.create_job("a.jpg", "jpg").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let id = job.id.clone();
                std::thread::spawn(move || manager.transition_status(&id, JobStatus::Processing))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| matches!(r, Ok(Some(_))))
            .count();

        assert_eq!(winners, 1);
        let job = manager.get_job(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempt_count, 1);
    }
}
