mod file_config;

pub use file_config::{FileConfig, JobsConfig};

use crate::jobs::DEFAULT_PRODUCED_BY;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub upload_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub max_upload_bytes: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub worker_count: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub jobs: JobSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let upload_dir = file
            .upload_dir
            .map(PathBuf::from)
            .or_else(|| cli.upload_dir.clone())
            .unwrap_or_else(|| db_dir.join("images"));

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        // Job settings: TOML, then CLI, then defaults
        let jobs_file = file.jobs.unwrap_or_default();
        let defaults = JobSettings::default();
        let jobs = JobSettings {
            max_upload_bytes: jobs_file
                .max_upload_bytes
                .or(cli.max_upload_bytes)
                .unwrap_or(defaults.max_upload_bytes),
            max_retries: jobs_file
                .max_retries
                .or(cli.max_retries)
                .unwrap_or(defaults.max_retries),
            retry_delay_secs: jobs_file
                .retry_delay_secs
                .or(cli.retry_delay_secs)
                .unwrap_or(defaults.retry_delay_secs),
            max_retry_delay_secs: jobs_file
                .max_retry_delay_secs
                .unwrap_or(defaults.max_retry_delay_secs),
            backoff_multiplier: jobs_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            worker_count: jobs_file
                .worker_count
                .or(cli.worker_count)
                .unwrap_or(defaults.worker_count),
            processing_timeout_secs: jobs_file
                .processing_timeout_secs
                .unwrap_or(defaults.processing_timeout_secs),
            processing_delay_ms: jobs_file
                .processing_delay_ms
                .unwrap_or(defaults.processing_delay_ms),
            produced_by: jobs_file.produced_by.unwrap_or(defaults.produced_by),
        };

        if jobs.worker_count == 0 {
            bail!("worker_count must be at least 1");
        }
        if !jobs.backoff_multiplier.is_finite() || jobs.backoff_multiplier < 1.0 {
            bail!(
                "backoff_multiplier must be a finite number >= 1.0, got {}",
                jobs.backoff_multiplier
            );
        }
        if jobs.processing_timeout_secs == 0 {
            bail!("processing_timeout_secs must be greater than 0");
        }

        Ok(Self {
            db_dir,
            upload_dir,
            port,
            logging_level,
            jobs,
        })
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Largest accepted upload, in bytes (inclusive).
    pub max_upload_bytes: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    pub backoff_multiplier: f64,
    pub worker_count: usize,
    pub processing_timeout_secs: u64,
    /// Simulated processing time of the canned processor.
    pub processing_delay_ms: u64,
    pub produced_by: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_retries: 3,
            retry_delay_secs: 60,
            max_retry_delay_secs: 3600,
            backoff_multiplier: 1.0,
            worker_count: 1,
            processing_timeout_secs: 300,
            processing_delay_ms: 2000,
            produced_by: DEFAULT_PRODUCED_BY.to_string(),
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
