//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CreateJobRequest, Job, JobError, JobFilter, JobState, JobStore, JobUpdate};

const JOB_COLUMNS: &str = "id, reference, state, progress_percent, current_step, artifact_location, error_detail, attempt, created_at, updated_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                reference TEXT NOT NULL,
                state TEXT NOT NULL,
                progress_percent INTEGER NOT NULL DEFAULT 0,
                current_step TEXT NOT NULL,
                artifact_location TEXT,
                error_detail TEXT,
                attempt INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let state_str: String = row.get(2)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        // Unknown states can only come from manual edits; surface them as failed.
        let state = JobState::parse(&state_str).unwrap_or(JobState::Failed);

        // The deadline runs from created_at, so a bad timestamp is an error.
        let created_at = parse_timestamp(8, &created_at_str)?;
        let updated_at = parse_timestamp(9, &updated_at_str)?;

        Ok(Job {
            id: row.get(0)?,
            reference: row.get(1)?,
            state,
            progress_percent: row.get(3)?,
            current_step: row.get(4)?,
            artifact_location: row.get(5)?,
            error_detail: row.get(6)?,
            attempt: row.get(7)?,
            created_at,
            updated_at,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Job>, JobError> {
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(|e| JobError::Database(e.to_string()))
    }
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobError> {
        let conn = self.lock()?;

        let job = Job::new(uuid::Uuid::new_v4().to_string(), request.reference, Utc::now());

        conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.reference,
                job.state.as_str(),
                job.progress_percent,
                job.current_step,
                job.artifact_location,
                job.error_detail,
                job.attempt,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(job)
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let conn = self.lock()?;

        let state = filter.state.map(|s| s.as_str());
        let sql = format!(
            "SELECT {} FROM jobs WHERE (?1 IS NULL OR state = ?1) ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            JOB_COLUMNS
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![state, filter.limit, filter.offset], Self::row_to_job)
            .map_err(|e| JobError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| JobError::Database(e.to_string()))
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.lock()?;

        let state = filter.state.map(|s| s.as_str());
        conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE (?1 IS NULL OR state = ?1)",
            params![state],
            |row| row.get(0),
        )
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn update(&self, id: &str, update: JobUpdate) -> Result<Job, JobError> {
        let conn = self.lock()?;

        let current = Self::fetch(&conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))?;
        let next = current.apply(&update, Utc::now())?;

        // One statement so readers never see a half-applied update.
        conn.execute(
            "UPDATE jobs SET state = ?, progress_percent = ?, current_step = ?, artifact_location = ?, error_detail = ?, attempt = ?, updated_at = ? WHERE id = ?",
            params![
                next.state.as_str(),
                next.progress_percent,
                next.current_step,
                next.artifact_location,
                next.error_detail,
                next.attempt,
                next.updated_at.to_rfc3339(),
                id,
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(next)
    }
}
