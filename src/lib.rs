//! Vision Jobs Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod jobs;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use jobs::{JobService, JobStore, SqliteJobStore};
pub use server::{run_server, RequestsLoggingLevel};
