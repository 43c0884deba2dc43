//! Durable job and stage-output storage
//!
//! Jobs are written once at submission. Stage outputs are appended through a
//! per-job [`StageWriter`] that the running job holds exclusively; each append
//! receives the next per-job sequence number.
//!
//! ```
//! use autoteam::storage::{JobStore, MemoryStore};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let job = store.create_job("Notes", "Make an AI notes app").await.unwrap();
//!
//! let mut writer = store.open_writer(job.id).await.unwrap();
//! writer.append_stage_output("Boss", "Goal: notes", false).await.unwrap();
//! writer.close().await.unwrap();
//!
//! let outputs = store.list_stage_outputs(job.id).await.unwrap();
//! assert_eq!(outputs[0].sequence, 1);
//! # });
//! ```

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{StorageBackend, StorageSection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a persisted stage output
pub type RecordId = i64;

/// A submitted unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub title: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

/// One stage's persisted result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput {
    pub id: RecordId,
    pub job_id: Uuid,
    pub stage_name: String,
    pub content: String,
    pub is_error: bool,
    /// 1-based position within the job
    pub sequence: u32,
    pub created_at: DateTime<Utc>,
}

/// Storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),
    #[error("Writer for job {0} is closed")]
    WriterClosed(Uuid),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(err.to_string())
    }
}

/// Job records and read access to their outputs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job and return it with its assigned id
    async fn create_job(&self, title: &str, prompt: &str) -> Result<Job, StorageError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError>;

    /// Most recently created first
    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError>;

    /// In sequence order; empty if the job has no outputs yet
    async fn list_stage_outputs(&self, job_id: Uuid) -> Result<Vec<StageOutput>, StorageError>;

    /// Open the append handle for a job's outputs
    async fn open_writer(&self, job_id: Uuid) -> Result<Box<dyn StageWriter>, StorageError>;
}

/// Exclusive append handle for one job's outputs
#[async_trait]
pub trait StageWriter: Send {
    async fn append_stage_output(
        &mut self,
        stage_name: &str,
        content: &str,
        is_error: bool,
    ) -> Result<RecordId, StorageError>;

    /// Release the handle; further appends fail with [`StorageError::WriterClosed`]
    async fn close(&mut self) -> Result<(), StorageError>;
}

/// Build the store selected by `[storage]`
pub fn create_store(section: &StorageSection) -> Result<Arc<dyn JobStore>, StorageError> {
    match section.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Sqlite => {
            let store = match section.path.as_deref() {
                Some(path) if path.as_os_str() != ":memory:" => SqliteStore::open(path)?,
                _ => SqliteStore::in_memory()?,
            };
            Ok(Arc::new(store))
        }
    }
}
