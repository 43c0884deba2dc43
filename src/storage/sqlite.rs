//! SQLite-backed store
//!
//! Connections are synchronous, so every call runs on the blocking pool. File
//! databases give each job writer its own connection; a private in-memory
//! database exists only on one connection, which is then shared.

use super::{Job, JobStore, RecordId, StageOutput, StageWriter, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    prompt      TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS stage_outputs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      TEXT NOT NULL REFERENCES jobs(id),
    stage_name  TEXT NOT NULL,
    content     TEXT NOT NULL,
    is_error    INTEGER NOT NULL DEFAULT 0,
    sequence    INTEGER NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (job_id, sequence)
);
CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs (created_at);
";

type SharedConnection = Arc<Mutex<Connection>>;

/// [`JobStore`] persisted in a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    /// `None` for a private in-memory database
    path: Option<PathBuf>,
    conn: SharedConnection,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Self::connect(&path)?;
        bootstrap(&conn)?;
        debug!(path = %path.display(), "sqlite store opened");
        Ok(Self {
            path: Some(path),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private database that lives as long as the store
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        bootstrap(&conn)?;
        Ok(Self {
            path: None,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn connect(path: &Path) -> Result<Connection, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        run_blocking(Arc::clone(&self.conn), f).await
    }
}

fn bootstrap(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn lock(conn: &SharedConnection) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_blocking<T, F>(conn: SharedConnection, f: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let guard = lock(&conn);
        f(&guard)
    })
    .await?
}

fn parse_uuid(raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Corrupt(format!("job id '{raw}': {e}")))
}

/// Fixed-width UTC text, so lexical order is chronological order
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp '{raw}': {e}")))
}

struct JobRow {
    id: String,
    title: String,
    prompt: String,
    created_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            prompt: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn into_job(self) -> Result<Job, StorageError> {
        Ok(Job {
            id: parse_uuid(&self.id)?,
            title: self.title,
            prompt: self.prompt,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct OutputRow {
    id: i64,
    job_id: String,
    stage_name: String,
    content: String,
    is_error: bool,
    sequence: u32,
    created_at: String,
}

impl OutputRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            stage_name: row.get(2)?,
            content: row.get(3)?,
            is_error: row.get(4)?,
            sequence: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_output(self) -> Result<StageOutput, StorageError> {
        Ok(StageOutput {
            id: self.id,
            job_id: parse_uuid(&self.job_id)?,
            stage_name: self.stage_name,
            content: self.content,
            is_error: self.is_error,
            sequence: self.sequence,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn job_exists(conn: &Connection, job_id: Uuid) -> Result<bool, StorageError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM jobs WHERE id = ?1",
            params![job_id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create_job(&self, title: &str, prompt: &str) -> Result<Job, StorageError> {
        let job = Job {
            id: Uuid::new_v4(),
            title: title.to_string(),
            prompt: prompt.to_string(),
            created_at: Utc::now(),
        };
        let record = job.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO jobs (id, title, prompt, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id.to_string(),
                    record.title,
                    record.prompt,
                    timestamp(&record.created_at)
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, title, prompt, created_at FROM jobs WHERE id = ?1",
                params![id.to_string()],
                JobRow::from_row,
            )
            .optional()?
            .map(JobRow::into_job)
            .transpose()
        })
        .await
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, prompt, created_at FROM jobs
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], JobRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(JobRow::into_job).collect()
        })
        .await
    }

    async fn list_stage_outputs(&self, job_id: Uuid) -> Result<Vec<StageOutput>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, job_id, stage_name, content, is_error, sequence, created_at
                 FROM stage_outputs
                 WHERE job_id = ?1
                 ORDER BY sequence ASC",
            )?;
            let rows = stmt
                .query_map(params![job_id.to_string()], OutputRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(OutputRow::into_output).collect()
        })
        .await
    }

    async fn open_writer(&self, job_id: Uuid) -> Result<Box<dyn StageWriter>, StorageError> {
        let conn = match &self.path {
            Some(path) => {
                let path = path.clone();
                let conn = tokio::task::spawn_blocking(move || Self::connect(&path)).await??;
                Arc::new(Mutex::new(conn))
            }
            None => Arc::clone(&self.conn),
        };

        let exists = run_blocking(Arc::clone(&conn), move |conn| job_exists(conn, job_id)).await?;
        if !exists {
            return Err(StorageError::JobNotFound(job_id));
        }

        Ok(Box::new(SqliteWriter {
            conn: Some(conn),
            job_id,
        }))
    }
}

struct SqliteWriter {
    /// Dropped on close
    conn: Option<SharedConnection>,
    job_id: Uuid,
}

#[async_trait]
impl StageWriter for SqliteWriter {
    async fn append_stage_output(
        &mut self,
        stage_name: &str,
        content: &str,
        is_error: bool,
    ) -> Result<RecordId, StorageError> {
        let conn = self
            .conn
            .clone()
            .ok_or(StorageError::WriterClosed(self.job_id))?;
        let job_id = self.job_id.to_string();
        let stage_name = stage_name.to_string();
        let content = content.to_string();

        run_blocking(conn, move |conn| {
            let tx = conn.unchecked_transaction()?;
            let sequence: i64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM stage_outputs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO stage_outputs (job_id, stage_name, content, is_error, sequence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    job_id,
                    stage_name,
                    content,
                    is_error,
                    sequence,
                    timestamp(&Utc::now())
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.conn = None;
        Ok(())
    }
}
