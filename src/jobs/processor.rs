//! Processing collaborator: turns a stored artifact into a description.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Description returned by [`CannedDescriptionProcessor`].
pub const CANNED_DESCRIPTION: &str = "A beautiful landscape with mountains and trees";

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Image file not found: {0:?}")]
    ArtifactMissing(PathBuf),

    #[error("Processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Processing failed: {0}")]
    Failed(String),
}

/// Something that can describe an image artifact.
///
/// Calls may take an unbounded amount of time; the worker pool wraps them in
/// a timeout.
#[async_trait]
pub trait ArtifactProcessor: Send + Sync {
    /// Identifier of the implementation, used in logs.
    fn name(&self) -> &str;

    async fn process(&self, artifact: &Path) -> Result<String, ProcessingError>;
}

/// Stand-in processor: checks the artifact exists, waits, and returns a
/// fixed description.
pub struct CannedDescriptionProcessor {
    delay: Duration,
}

impl CannedDescriptionProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ArtifactProcessor for CannedDescriptionProcessor {
    fn name(&self) -> &str {
        "canned-description"
    }

    async fn process(&self, artifact: &Path) -> Result<String, ProcessingError> {
        if !tokio::fs::try_exists(artifact).await? {
            return Err(ProcessingError::ArtifactMissing(artifact.to_path_buf()));
        }
        tokio::time::sleep(self.delay).await;
        Ok(CANNED_DESCRIPTION.to_string())
    }
}
