//! Image description jobs
//!
//! Accepts uploaded images, persists them as jobs and describes them in the
//! background with bounded retries.

mod artifact_store;
mod dispatcher;
mod lifecycle;
mod models;
mod processor;
mod retry_policy;
mod schema;
mod service;
mod store;
mod validation;
mod worker;

pub use artifact_store::{ArtifactStorage, ArtifactStoreError};
pub use dispatcher::{
    dispatch_channel, DispatchError, DispatchReceiver, DispatchRequest, TaskDispatcher,
};
pub use lifecycle::{JobLifecycleManager, LifecycleError, LifecycleResult};
pub use models::*;
pub use processor::{
    ArtifactProcessor, CannedDescriptionProcessor, ProcessingError, CANNED_DESCRIPTION,
};
pub use retry_policy::RetryPolicy;
pub use schema::JOBS_VERSIONED_SCHEMAS;
pub use service::{JobResultView, JobService, JobServiceError, JobStatusView, SubmitReceipt};
pub use store::{JobStore, SqliteJobStore};
pub use validation::{validate, AdmissionError, ALLOWED_EXTENSIONS};
pub use worker::{AttemptOutcome, WorkerPool, WorkerPoolHandle};
