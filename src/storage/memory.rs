//! In-process store, the default backend
//!
//! Nothing survives a restart.

use super::{Job, JobStore, RecordId, StageOutput, StageWriter, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    /// Creation order
    jobs: Vec<Job>,
    outputs: HashMap<Uuid, Vec<StageOutput>>,
    last_record_id: RecordId,
}

/// [`JobStore`] kept entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, title: &str, prompt: &str) -> Result<Job, StorageError> {
        let job = Job {
            id: Uuid::new_v4(),
            title: title.to_string(),
            prompt: prompt.to_string(),
            created_at: Utc::now(),
        };
        self.state.write().await.jobs.push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError> {
        let state = self.state.read().await;
        Ok(state.jobs.iter().find(|job| job.id == id).cloned())
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        let state = self.state.read().await;
        Ok(state.jobs.iter().rev().take(limit).cloned().collect())
    }

    async fn list_stage_outputs(&self, job_id: Uuid) -> Result<Vec<StageOutput>, StorageError> {
        let state = self.state.read().await;
        Ok(state.outputs.get(&job_id).cloned().unwrap_or_default())
    }

    async fn open_writer(&self, job_id: Uuid) -> Result<Box<dyn StageWriter>, StorageError> {
        if self.get_job(job_id).await?.is_none() {
            return Err(StorageError::JobNotFound(job_id));
        }
        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            job_id,
            closed: false,
        }))
    }
}

struct MemoryWriter {
    state: Arc<RwLock<MemoryState>>,
    job_id: Uuid,
    closed: bool,
}

#[async_trait]
impl StageWriter for MemoryWriter {
    async fn append_stage_output(
        &mut self,
        stage_name: &str,
        content: &str,
        is_error: bool,
    ) -> Result<RecordId, StorageError> {
        if self.closed {
            return Err(StorageError::WriterClosed(self.job_id));
        }

        let mut state = self.state.write().await;
        state.last_record_id += 1;
        let id = state.last_record_id;

        let outputs = state.outputs.entry(self.job_id).or_default();
        let sequence = outputs.len() as u32 + 1;
        outputs.push(StageOutput {
            id,
            job_id: self.job_id,
            stage_name: stage_name.to_string(),
            content: content.to_string(),
            is_error,
            sequence,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get_job() {
        let store = MemoryStore::new();
        let job = store.create_job("Notes", "Make an AI notes app").await.unwrap();

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched, job);
        assert!(store.get_job(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_jobs_newest_first_with_limit() {
        let store = MemoryStore::new();
        let first = store.create_job("one", "p1").await.unwrap();
        let second = store.create_job("two", "p2").await.unwrap();
        let third = store.create_job("three", "p3").await.unwrap();

        let listed = store.list_jobs(2).await.unwrap();
        assert_eq!(listed, vec![third, second]);
        assert_eq!(store.list_jobs(10).await.unwrap().last(), Some(&first));
    }

    #[tokio::test]
    async fn test_appends_are_sequenced_per_job() {
        let store = MemoryStore::new();
        let job_a = store.create_job("a", "pa").await.unwrap();
        let job_b = store.create_job("b", "pb").await.unwrap();
        let mut writer_a = store.open_writer(job_a.id).await.unwrap();
        let mut writer_b = store.open_writer(job_b.id).await.unwrap();

        let id1 = writer_a.append_stage_output("Boss", "goal", false).await.unwrap();
        writer_b.append_stage_output("Boss", "other", false).await.unwrap();
        let id2 = writer_a
            .append_stage_output("Product Manager", "oops", true)
            .await
            .unwrap();
        assert!(id2 > id1);

        let outputs = store.list_stage_outputs(job_a.id).await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].sequence, 1);
        assert_eq!(outputs[1].sequence, 2);
        assert_eq!(outputs[1].stage_name, "Product Manager");
        assert!(outputs[1].is_error);
        assert_eq!(store.list_stage_outputs(job_b.id).await.unwrap()[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_append_after_close_fails() {
        let store = MemoryStore::new();
        let job = store.create_job("t", "prompt").await.unwrap();
        let mut writer = store.open_writer(job.id).await.unwrap();

        writer.close().await.unwrap();
        let result = writer.append_stage_output("Boss", "late", false).await;
        assert!(matches!(result, Err(StorageError::WriterClosed(id)) if id == job.id));
    }

    #[tokio::test]
    async fn test_open_writer_unknown_job() {
        let store = MemoryStore::new();
        let result = store.open_writer(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StorageError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_outputs_of_unknown_job_are_empty() {
        let store = MemoryStore::new();
        assert!(store.list_stage_outputs(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
