//! Job storage and persistence.
//!
//! Provides SQLite-backed storage for job records. Status writes are
//! conditional on the expected current status, which makes the store the
//! single point where concurrent writers to the same job are serialized.

use super::models::{Job, JobStatus, JobUpdate, UpdateOutcome};
use super::schema::JOBS_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Trait for job storage operations.
pub trait JobStore: Send + Sync {
    /// Persist a new job. Fails if the id already exists.
    fn insert_job(&self, job: &Job) -> Result<()>;

    /// Get a job by ID.
    fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// List jobs whose status is one of `statuses`, oldest first.
    fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;

    /// Atomically apply `update` if the job's current status is `expected`.
    fn update_job_if_status(
        &self,
        id: &str,
        expected: JobStatus,
        update: &JobUpdate,
    ) -> Result<UpdateOutcome>;
}

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            JOBS_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new jobs database at {:?}", db_path.as_ref());
            conn
        };

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Jobs database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        if version >= JOBS_VERSIONED_SCHEMAS.len() {
            bail!(
                "Jobs database version {} is too new (max supported: {})",
                version,
                JOBS_VERSIONED_SCHEMAS.len() - 1
            );
        }

        JOBS_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, used by tests and throwaway runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        JOBS_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = JOBS_VERSIONED_SCHEMAS.len() - 1;
        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating jobs database from version {} to {}",
            current_version, target_version
        );
        for schema in JOBS_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Running jobs migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }
        conn.execute(
            &format!(
                "PRAGMA user_version = {}",
                BASE_DB_VERSION + target_version
            ),
            [],
        )?;
        Ok(())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status_str: String = row.get("status")?;
        let status = JobStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown job status '{}'", status_str).into(),
            )
        })?;
        Ok(Job {
            id: row.get("id")?,
            status,
            artifact_location: row.get("artifact_location")?,
            artifact_extension: row.get("artifact_extension")?,
            result_payload: row.get("result_payload")?,
            produced_by: row.get("produced_by")?,
            attempt_count: row.get("attempt_count")?,
            last_error: row.get("last_error")?,
            next_attempt_at: row.get("next_attempt_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn select_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
        conn.query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            Self::row_to_job,
        )
        .optional()
        .context("Failed to read job")
    }
}

impl JobStore for SqliteJobStore {
    fn insert_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO jobs (
                id, status, artifact_location, artifact_extension, result_payload,
                produced_by, attempt_count, last_error, next_attempt_at, created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                job.id,
                job.status.as_str(),
                job.artifact_location,
                job.artifact_extension,
                job.result_payload,
                job.produced_by,
                job.attempt_count,
                job.last_error,
                job.next_attempt_at,
                job.created_at,
                job.updated_at,
            ],
        )
        .with_context(|| format!("Failed to insert job {}", job.id))?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        Self::select_job(&conn, id)
    }

    fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT * FROM jobs WHERE status IN ({}) ORDER BY created_at ASC",
            placeholders
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(
                rusqlite::params_from_iter(statuses.iter().map(|s| s.as_str())),
                Self::row_to_job,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn update_job_if_status(
        &self,
        id: &str,
        expected: JobStatus,
        update: &JobUpdate,
    ) -> Result<UpdateOutcome> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE jobs SET
                status = ?1,
                result_payload = ?2,
                last_error = ?3,
                next_attempt_at = ?4,
                attempt_count = attempt_count + ?5,
                updated_at = ?6
            WHERE id = ?7 AND status = ?8"#,
            params![
                update.status.as_str(),
                update.result_payload,
                update.last_error,
                update.next_attempt_at,
                if update.increment_attempts { 1 } else { 0 },
                update.updated_at,
                id,
                expected.as_str(),
            ],
        )?;

        let job = Self::select_job(&conn, id)?;
        Ok(match (changed, job) {
            (_, None) => UpdateOutcome::NotFound,
            (0, Some(current)) => UpdateOutcome::StatusMismatch(current.status),
            (_, Some(updated)) => UpdateOutcome::Updated(updated),
        })
    }
}
