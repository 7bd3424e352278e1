//! Data models for image description jobs.
//!
//! Defines the job record and its status state machine.

use serde::{Deserialize, Serialize};

/// Identifier written to `produced_by` when the configuration does not override it.
pub const DEFAULT_PRODUCED_BY: &str = "vision-node-gpt";

/// Status of a job.
///
/// ```text
/// Queued -> Processing -> Done
///              |  ^   \-> Failed
///              v  |
///         RetryScheduled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    RetryScheduled,
    Done,   // terminal
    Failed, // terminal
}

impl JobStatus {
    /// Returns true if this is a terminal state (Done or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Returns true if the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Processing, Done)
                | (Processing, RetryScheduled)
                | (Processing, Failed)
                | (RetryScheduled, Processing)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::RetryScheduled => "retry_scheduled",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "retry_scheduled" => Some(JobStatus::RetryScheduled),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted artifact's processing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Current status in the state machine
    pub status: JobStatus,
    /// File name of the stored artifact, relative to the upload directory
    pub artifact_location: String,
    /// Lowercase extension without the leading dot
    pub artifact_extension: String,
    /// Description produced by the processor, only set when Done
    pub result_payload: Option<String>,
    /// Identifier of the processor implementation
    pub produced_by: String,
    /// Number of execution attempts started so far
    pub attempt_count: u32,
    /// Message of the most recent failed attempt
    pub last_error: Option<String>,
    /// Unix timestamp (seconds) before which a RetryScheduled job must not run
    pub next_attempt_at: Option<i64>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    /// Unix timestamp (seconds) of the last status or result mutation
    pub updated_at: i64,
}

impl Job {
    /// Create a new queued job.
    pub fn new(
        id: String,
        artifact_location: String,
        artifact_extension: String,
        produced_by: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            status: JobStatus::Queued,
            artifact_location,
            artifact_extension,
            result_payload: None,
            produced_by,
            attempt_count: 0,
            last_error: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Timestamp at which the job reached Done, if it did.
    pub fn completed_at(&self) -> Option<i64> {
        (self.status == JobStatus::Done).then_some(self.updated_at)
    }
}

/// Mutation applied atomically by the store together with a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub result_payload: Option<String>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<i64>,
    pub increment_attempts: bool,
    pub updated_at: i64,
}

impl JobUpdate {
    /// Status change that keeps the current error message and payload cleared.
    pub fn status(status: JobStatus, last_error: Option<String>) -> Self {
        Self {
            status,
            result_payload: None,
            last_error,
            next_attempt_at: None,
            increment_attempts: status == JobStatus::Processing,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Transition to RetryScheduled, due `delay` from now.
    pub fn retry(last_error: String, delay: std::time::Duration) -> Self {
        let now = chrono::Utc::now().timestamp();
        let delay_secs = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);
        Self {
            status: JobStatus::RetryScheduled,
            result_payload: None,
            last_error: Some(last_error),
            next_attempt_at: Some(now.saturating_add(delay_secs)),
            increment_attempts: false,
            updated_at: now,
        }
    }

    /// Transition to Done carrying the produced payload.
    pub fn done(payload: String) -> Self {
        Self {
            status: JobStatus::Done,
            result_payload: Some(payload),
            last_error: None,
            next_attempt_at: None,
            increment_attempts: false,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Outcome of a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated(Job),
    NotFound,
    /// The job exists but its status is no longer the expected one.
    StatusMismatch(JobStatus),
}
