//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own jobs database, upload
//! directory and worker pool.

use super::constants::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use vision_jobs_server::config::JobSettings;
use vision_jobs_server::jobs::{
    dispatch_channel, ArtifactProcessor, ArtifactStorage, CannedDescriptionProcessor,
    JobLifecycleManager, JobService, SqliteJobStore, WorkerPool,
};
use vision_jobs_server::server::{make_app, RequestsLoggingLevel, ServerConfig};

pub struct TestServerOptions {
    pub settings: JobSettings,
    /// Defaults to the canned processor with TEST_PROCESSING_DELAY_MS
    pub processor: Option<Arc<dyn ArtifactProcessor>>,
    /// Reuse a directory from a previous server instead of a fresh one
    pub db_dir: Option<TempDir>,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            settings: JobSettings {
                max_upload_bytes: TEST_MAX_UPLOAD_BYTES,
                retry_delay_secs: 1,
                processing_timeout_secs: 5,
                processing_delay_ms: TEST_PROCESSING_DELAY_MS,
                ..Default::default()
            },
            processor: None,
            db_dir: None,
        }
    }
}

/// Test server instance with isolated database and uploads
///
/// When dropped, the server and its workers shut down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Direct access to jobs for assertions the HTTP surface doesn't expose
    pub lifecycle: Arc<JobLifecycleManager>,

    /// Where uploaded artifacts land
    pub upload_dir: PathBuf,

    db_dir: Option<TempDir>,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port with default test settings
    pub async fn spawn() -> Self {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawns a server with custom options
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be opened, the port cannot be bound or
    /// the server doesn't become ready within timeout.
    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let db_dir = match options.db_dir {
            Some(dir) => dir,
            None => TempDir::new().expect("Failed to create temp dir"),
        };
        let settings = options.settings;

        let store = Arc::new(
            SqliteJobStore::new(db_dir.path().join("jobs.db")).expect("Failed to open job store"),
        );
        let lifecycle = Arc::new(JobLifecycleManager::new(
            store,
            settings.produced_by.clone(),
        ));

        let upload_dir = db_dir.path().join("images");
        let storage = ArtifactStorage::new(&upload_dir);
        storage.init().await.expect("Failed to create upload dir");

        let processor = options.processor.unwrap_or_else(|| {
            Arc::new(CannedDescriptionProcessor::new(Duration::from_millis(
                settings.processing_delay_ms,
            )))
        });

        let shutdown = CancellationToken::new();
        let (dispatcher, receiver) = dispatch_channel();
        let pool = Arc::new(WorkerPool::new(
            lifecycle.clone(),
            processor,
            storage.clone(),
            dispatcher.clone(),
            &settings,
            shutdown.child_token(),
        ));
        let _pool_handle = pool.start(receiver);
        pool.recover_unfinished()
            .expect("Failed to recover unfinished jobs");

        let job_service = Arc::new(JobService::new(
            lifecycle.clone(),
            storage,
            dispatcher,
            settings.max_upload_bytes,
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
        };
        let app = make_app(config, job_service);

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            lifecycle,
            upload_dir,
            db_dir: Some(db_dir),
            shutdown,
        };

        server.wait_for_ready().await;

        server
    }

    /// Stops the server and hands back its directory, so a new server can
    /// be started on the same database
    pub fn stop(mut self) -> TempDir {
        self.shutdown.cancel();
        self.db_dir.take().expect("Directory already taken")
    }

    /// Waits for the server to become ready by polling /health
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
