//! Mock implementations for testing
//!
//! Scripted LLM providers, generators with controllable failure patterns, a
//! sleeper that records instead of waiting, and a store that fails on demand.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::llm::providers::MockProvider;
use crate::llm::Generate;
use crate::pipeline::retry::Sleeper;
use crate::storage::{
    Job, JobStore, MemoryStore, RecordId, StageOutput, StageWriter, StorageError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Provider that replays canned responses in order, cycling when exhausted
#[derive(Debug, Default)]
pub struct ScriptedLlmProvider {
    pub responses: Vec<String>,
    pub should_fail: bool,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Every request received so far
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlmProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut requests = self.requests.lock().await;
        let index = requests.len();
        let model = request.model.clone();
        requests.push(request);

        if self.should_fail {
            return Err(LlmError::RequestFailed("Scripted LLM failure".to_string()));
        }

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[index % self.responses.len()].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Scripted health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Generator that answers instantly in the mock provider's format
#[derive(Debug, Default)]
pub struct EchoGenerator {
    calls: StdMutex<Vec<(String, Option<String>)>>,
}

impl EchoGenerator {
    /// `(prompt, system)` of each call
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Generate for EchoGenerator {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        lock(&self.calls).push((prompt.to_string(), system.map(str::to_string)));
        Ok(MockProvider::render(system, prompt))
    }
}

/// Fails the first `failures` calls, then echoes
#[derive(Debug)]
pub struct FlakyGenerator {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyGenerator {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generate for FlakyGenerator {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(LlmError::RequestFailed(format!("transient failure {call}")));
        }
        Ok(MockProvider::render(system, prompt))
    }
}

/// Never succeeds; the error names the attempt number
#[derive(Debug, Default)]
pub struct AlwaysFailGenerator {
    calls: AtomicUsize,
}

impl AlwaysFailGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generate for AlwaysFailGenerator {
    async fn generate(&self, _prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(LlmError::NetworkError(format!(
            "connection refused on attempt {call}"
        )))
    }
}

/// Fails whenever the system instruction contains `needle`, echoes otherwise
#[derive(Debug)]
pub struct StageFailingGenerator {
    needle: String,
    failures: AtomicUsize,
}

impl StageFailingGenerator {
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generate for StageFailingGenerator {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        if system.is_some_and(|text| text.contains(&self.needle)) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(LlmError::ApiError("HTTP 503: upstream overloaded".to_string()));
        }
        Ok(MockProvider::render(system, prompt))
    }
}

/// Echoes after a fixed delay, so jobs stay observable while running
#[derive(Debug)]
pub struct SlowGenerator {
    delay: Duration,
}

impl SlowGenerator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Generate for SlowGenerator {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        tokio::time::sleep(self.delay).await;
        Ok(MockProvider::render(system, prompt))
    }
}

/// Records requested waits and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    recorded: StdMutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        lock(&self.recorded).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.recorded).push(duration);
    }
}

/// [`MemoryStore`] wrapper with injectable failures
#[derive(Debug, Clone, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_create: bool,
    /// Appends succeed this many times per writer, then fail
    fail_appends_after: Option<usize>,
}

impl FailingStore {
    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Default::default()
        }
    }

    pub fn failing_appends_after(successes: usize) -> Self {
        Self {
            fail_appends_after: Some(successes),
            ..Default::default()
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl JobStore for FailingStore {
    async fn create_job(&self, title: &str, prompt: &str) -> Result<Job, StorageError> {
        if self.fail_create {
            return Err(StorageError::Database("disk I/O error".to_string()));
        }
        self.inner.create_job(title, prompt).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StorageError> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>, StorageError> {
        self.inner.list_jobs(limit).await
    }

    async fn list_stage_outputs(&self, job_id: Uuid) -> Result<Vec<StageOutput>, StorageError> {
        self.inner.list_stage_outputs(job_id).await
    }

    async fn open_writer(&self, job_id: Uuid) -> Result<Box<dyn StageWriter>, StorageError> {
        let inner = self.inner.open_writer(job_id).await?;
        Ok(Box::new(FailingWriter {
            inner,
            remaining: self.fail_appends_after,
        }))
    }
}

struct FailingWriter {
    inner: Box<dyn StageWriter>,
    remaining: Option<usize>,
}

#[async_trait]
impl StageWriter for FailingWriter {
    async fn append_stage_output(
        &mut self,
        stage_name: &str,
        content: &str,
        is_error: bool,
    ) -> Result<RecordId, StorageError> {
        match self.remaining.as_mut() {
            Some(0) => Err(StorageError::Database("database is locked".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                self.inner
                    .append_stage_output(stage_name, content, is_error)
                    .await
            }
            None => {
                self.inner
                    .append_stage_output(stage_name, content, is_error)
                    .await
            }
        }
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
