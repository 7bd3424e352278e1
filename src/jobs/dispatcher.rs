//! Hands created jobs to the worker pool without waiting for them.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Request to run one attempt of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub job_id: String,
    pub artifact_location: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Worker pool is not running")]
    PoolClosed,
}

/// Sending side, cloned into the HTTP state and into the retry timers.
#[derive(Clone)]
pub struct TaskDispatcher {
    sender: mpsc::UnboundedSender<DispatchRequest>,
}

/// Receiving side, shared by all workers of a pool.
#[derive(Clone)]
pub struct DispatchReceiver {
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<DispatchRequest>>>,
}

/// Create a connected dispatcher/receiver pair.
pub fn dispatch_channel() -> (TaskDispatcher, DispatchReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        TaskDispatcher { sender },
        DispatchReceiver {
            receiver: Arc::new(Mutex::new(receiver)),
        },
    )
}

impl TaskDispatcher {
    /// Enqueue a job. Never waits for processing.
    pub fn dispatch(&self, job_id: &str, artifact_location: &str) -> Result<(), DispatchError> {
        self.send(DispatchRequest {
            job_id: job_id.to_string(),
            artifact_location: artifact_location.to_string(),
        })
    }

    pub(crate) fn send(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        self.sender
            .send(request)
            .map_err(|_| DispatchError::PoolClosed)
    }
}

impl DispatchReceiver {
    /// Next request, or `None` once every dispatcher has been dropped.
    pub async fn recv(&self) -> Option<DispatchRequest> {
        self.receiver.lock().await.recv().await
    }
}
