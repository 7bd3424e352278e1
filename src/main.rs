use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vision_jobs_server::config;
use vision_jobs_server::jobs::{
    dispatch_channel, ArtifactProcessor, ArtifactStorage, CannedDescriptionProcessor,
    JobLifecycleManager, JobService, SqliteJobStore, WorkerPool,
};
use vision_jobs_server::server::{run_server, RequestsLoggingLevel, ServerConfig};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the jobs database (jobs.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory where uploaded images are stored. Defaults to <db-dir>/images.
    #[clap(long, value_parser = parse_path)]
    pub upload_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8000)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Largest accepted upload in bytes (default 10 MiB).
    #[clap(long)]
    pub max_upload_bytes: Option<u64>,

    /// Retries after a failed processing attempt (default 3).
    #[clap(long)]
    pub max_retries: Option<u32>,

    /// Seconds to wait before retrying a failed attempt (default 60).
    #[clap(long)]
    pub retry_delay_secs: Option<u64>,

    /// Number of concurrent workers (default 1).
    #[clap(long)]
    pub worker_count: Option<usize>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            upload_dir: args.upload_dir.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
            max_upload_bytes: args.max_upload_bytes,
            max_retries: args.max_retries,
            retry_delay_secs: args.retry_delay_secs,
            worker_count: args.worker_count,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  upload_dir: {:?}", app_config.upload_dir);
    info!("  port: {}", app_config.port);

    info!("Opening jobs database at {:?}", app_config.jobs_db_path());
    let store = Arc::new(SqliteJobStore::new(app_config.jobs_db_path())?);

    let storage = ArtifactStorage::new(&app_config.upload_dir);
    storage
        .init()
        .await
        .with_context(|| format!("Failed to create upload dir {:?}", app_config.upload_dir))?;

    let settings = &app_config.jobs;
    let lifecycle = Arc::new(JobLifecycleManager::new(store, settings.produced_by.clone()));
    let processor: Arc<dyn ArtifactProcessor> = Arc::new(CannedDescriptionProcessor::new(
        Duration::from_millis(settings.processing_delay_ms),
    ));

    let shutdown_token = CancellationToken::new();
    let (dispatcher, receiver) = dispatch_channel();

    let pool = Arc::new(WorkerPool::new(
        lifecycle.clone(),
        processor,
        storage.clone(),
        dispatcher.clone(),
        settings,
        shutdown_token.child_token(),
    ));
    let pool_handle = pool.start(receiver);
    pool.recover_unfinished()
        .context("Failed to recover unfinished jobs")?;

    let job_service = Arc::new(JobService::new(
        lifecycle,
        storage,
        dispatcher,
        settings.max_upload_bytes,
    ));

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
    };

    info!("Ready to serve at port {}!", app_config.port);

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating graceful shutdown");
            signal_token.cancel();
        }
    });

    let result = run_server(server_config, job_service, shutdown_token.clone()).await;
    info!("HTTP server stopped: {:?}", result);

    shutdown_token.cancel();
    pool_handle.shutdown().await;
    info!("Shutdown complete");
    result
}
