//! Pipeline engine
//!
//! Drives one job through the stage graph: every stage is announced, run under
//! the retry policy, persisted, then broadcast. The first stage that exhausts
//! its attempts aborts the job. Whatever happens, the job's writer is closed,
//! its terminal status recorded, `workflow_end` published and its bus channel
//! released, in that order.

use crate::config::AppConfig;
use crate::error::{sanitize_error_message, AutoTeamError, AutoTeamResult};
use crate::events::{EventBus, PipelineEvent};
use crate::llm::providers::create_provider;
use crate::llm::{Generate, LlmGenerator};
use crate::observability::metrics;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::runner::{StageError, StageRunner};
use crate::pipeline::stages::{build_input, MissingOutput, StageDefinition, StageGraph};
use crate::storage::{create_store, Job, JobStore, StageWriter, StorageError};
use crate::{job_span, stage_span};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Shortest accepted prompt, in characters
pub const MIN_PROMPT_CHARS: usize = 3;

/// Title used when a run request omits one
pub const DEFAULT_RUN_TITLE: &str = "AutoTeamAI Project";

/// Title used when a project is created without one
pub const DEFAULT_PROJECT_TITLE: &str = "Untitled";

/// Submission payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub title: Option<String>,
    pub prompt: String,
}

impl JobRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            title: None,
            prompt: prompt.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn validate(&self) -> AutoTeamResult<()> {
        if self.prompt.trim().chars().count() < MIN_PROMPT_CHARS {
            return Err(AutoTeamError::invalid_input(format!(
                "prompt must be at least {MIN_PROMPT_CHARS} characters"
            )));
        }
        Ok(())
    }

    fn title_or(&self, default: &str) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => default.to_string(),
        }
    }
}

/// Lifecycle of a job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running {
        stage: String,
    },
    Completed,
    Failed {
        /// `None` when the job failed before any stage started
        stage: Option<String>,
        reason: String,
    },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }

    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running { .. })
                | (Pending, Failed { .. })
                | (Running { .. }, Running { .. })
                | (Running { .. }, Completed)
                | (Running { .. }, Failed { .. })
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running { .. } => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

/// Why a job run stopped early
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage '{stage}' failed: {source}")]
    StageExhausted {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("could not persist output of stage '{stage}': {source}")]
    Persistence {
        stage: String,
        #[source]
        source: StorageError,
    },

    #[error("could not open output writer: {0}")]
    Writer(#[source] StorageError),

    #[error("stage '{stage}' has no input: {source}")]
    MissingInput {
        stage: String,
        #[source]
        source: MissingOutput,
    },
}

impl PipelineError {
    /// Stage the job was in when it stopped
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::StageExhausted { stage, .. }
            | PipelineError::Persistence { stage, .. }
            | PipelineError::MissingInput { stage, .. } => Some(stage),
            PipelineError::Writer(_) => None,
        }
    }
}

/// One successful stage result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub stage: String,
    pub content: String,
}

/// Final status of a run plus the successful results in stage order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub results: Vec<StageResult>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Runs jobs through the stage graph
#[derive(Clone)]
pub struct PipelineEngine {
    store: Arc<dyn JobStore>,
    bus: EventBus,
    runner: StageRunner,
    graph: Arc<StageGraph>,
    statuses: Arc<RwLock<HashMap<Uuid, JobStatus>>>,
}

impl PipelineEngine {
    pub fn new(store: Arc<dyn JobStore>, bus: EventBus, runner: StageRunner) -> Self {
        Self {
            store,
            bus,
            runner,
            graph: Arc::new(StageGraph::reference()),
            statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Assemble provider, store, bus and retry policy from configuration
    pub fn from_config(config: &AppConfig) -> AutoTeamResult<Self> {
        let provider = create_provider(&config.llm)?;
        let generator: Arc<dyn Generate> =
            Arc::new(LlmGenerator::from_section(provider, &config.llm));
        let runner = StageRunner::new(generator, RetryPolicy::from_section(&config.pipeline)?);
        let bus = EventBus::new(
            config.pipeline.event_buffer,
            config.pipeline.closed_job_memory,
        );
        let store = create_store(&config.storage)?;
        let graph = StageGraph::reference().with_system_overrides(config.role_overrides());

        Ok(Self::new(store, bus, runner).with_graph(graph))
    }

    pub fn with_graph(mut self, graph: StageGraph) -> Self {
        self.graph = Arc::new(graph);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Validate and persist a job without running it
    pub async fn create_job(&self, request: &JobRequest) -> AutoTeamResult<Job> {
        self.persist(request, DEFAULT_RUN_TITLE).await
    }

    /// Persist project metadata only; the project is not run
    pub async fn create_project(&self, request: &JobRequest) -> AutoTeamResult<Job> {
        self.persist(request, DEFAULT_PROJECT_TITLE).await
    }

    async fn persist(&self, request: &JobRequest, default_title: &str) -> AutoTeamResult<Job> {
        if let Err(err) = request.validate() {
            metrics().job_rejected();
            return Err(err);
        }
        let title = request.title_or(default_title);
        let job = self.store.create_job(&title, &request.prompt).await?;
        info!(job_id = %job.id, title = %job.title, "job created");
        Ok(job)
    }

    /// Create a job and run it on a detached task
    ///
    /// Returns as soon as the job record exists.
    pub async fn submit(&self, request: &JobRequest) -> AutoTeamResult<Job> {
        let job = self.create_job(request).await?;
        metrics().job_submitted();
        self.statuses
            .write()
            .await
            .insert(job.id, JobStatus::Pending);

        let engine = self.clone();
        let spawned = job.clone();
        tokio::spawn(async move {
            engine.run_job(&spawned).await;
        });

        Ok(job)
    }

    /// Current status, if the job has been submitted or run in this process
    pub async fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.statuses.read().await.get(&job_id).cloned()
    }

    /// Run every stage of an existing job to completion or first failure
    pub async fn run_job(&self, job: &Job) -> JobOutcome {
        let span = job_span!(job_id = %job.id, title = %job.title);
        self.execute(job).instrument(span).await
    }

    async fn execute(&self, job: &Job) -> JobOutcome {
        let started = Instant::now();
        metrics().job_started();
        self.statuses
            .write()
            .await
            .entry(job.id)
            .or_insert(JobStatus::Pending);

        info!(stages = self.graph.len(), "workflow starting");
        self.bus
            .publish(job.id, PipelineEvent::workflow_start(job.id, &job.title));

        let mut results = Vec::with_capacity(self.graph.len());
        let run = match self.store.open_writer(job.id).await {
            Ok(mut writer) => {
                let run = self.run_stages(job, writer.as_mut(), &mut results).await;
                if let Err(err) = writer.close().await {
                    warn!(error = %err, "failed to close stage writer");
                }
                run
            }
            Err(err) => Err(PipelineError::Writer(err)),
        };

        let status = match &run {
            Ok(()) => {
                metrics().job_completed(started.elapsed());
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "workflow completed"
                );
                JobStatus::Completed
            }
            Err(err) => {
                metrics().job_failed(started.elapsed());
                error!(error = %err, "workflow aborted");
                JobStatus::Failed {
                    stage: err.stage().map(str::to_string),
                    reason: sanitize_error_message(&err.to_string()),
                }
            }
        };
        self.transition(job.id, status.clone()).await;

        self.bus.publish(job.id, PipelineEvent::workflow_end(job.id));
        self.bus.close_job(job.id);

        JobOutcome {
            job_id: job.id,
            status,
            results,
        }
    }

    async fn run_stages(
        &self,
        job: &Job,
        writer: &mut dyn StageWriter,
        results: &mut Vec<StageResult>,
    ) -> Result<(), PipelineError> {
        let mut outputs: HashMap<String, String> = HashMap::with_capacity(self.graph.len());

        for stage in self.graph.stages() {
            let span = stage_span!(stage = %stage.name, role = stage.role.key());
            let content = self
                .run_one(job, stage, writer, &outputs)
                .instrument(span)
                .await?;

            outputs.insert(stage.name.clone(), content.clone());
            results.push(StageResult {
                stage: stage.name.clone(),
                content,
            });
        }
        Ok(())
    }

    async fn run_one(
        &self,
        job: &Job,
        stage: &StageDefinition,
        writer: &mut dyn StageWriter,
        outputs: &HashMap<String, String>,
    ) -> Result<String, PipelineError> {
        self.transition(
            job.id,
            JobStatus::Running {
                stage: stage.name.clone(),
            },
        )
        .await;
        self.bus
            .publish(job.id, PipelineEvent::agent_start(job.id, &stage.name));

        let input = build_input(stage, &job.prompt, outputs).map_err(|source| {
            PipelineError::MissingInput {
                stage: stage.name.clone(),
                source,
            }
        })?;

        let started = Instant::now();
        match self.runner.run_stage_detailed(&input, &stage.instruction).await {
            Ok(run) => {
                metrics().stage_finished(&stage.name, run.attempts, started.elapsed(), true);
                writer
                    .append_stage_output(&stage.name, &run.content, false)
                    .await
                    .map_err(|source| PipelineError::Persistence {
                        stage: stage.name.clone(),
                        source,
                    })?;
                self.bus.publish(
                    job.id,
                    PipelineEvent::agent_result(job.id, &stage.name, run.content.clone()),
                );
                info!(attempts = run.attempts, "stage completed");
                Ok(run.content)
            }
            Err(failure) => {
                metrics().stage_finished(&stage.name, failure.attempts, started.elapsed(), false);
                let content = format!(
                    "An error occurred in agent '{}': {}",
                    stage.name,
                    sanitize_error_message(&failure.to_string())
                );
                writer
                    .append_stage_output(&stage.name, &content, true)
                    .await
                    .map_err(|source| PipelineError::Persistence {
                        stage: stage.name.clone(),
                        source,
                    })?;
                self.bus
                    .publish(job.id, PipelineEvent::error(job.id, &stage.name, content));
                Err(PipelineError::StageExhausted {
                    stage: stage.name.clone(),
                    source: failure,
                })
            }
        }
    }

    async fn transition(&self, job_id: Uuid, next: JobStatus) {
        let mut statuses = self.statuses.write().await;
        if let Some(current) = statuses.get(&job_id) {
            if !current.can_transition_to(&next) {
                warn!(
                    %job_id,
                    from = current.as_str(),
                    to = next.as_str(),
                    "invalid job status transition ignored"
                );
                return;
            }
        }
        statuses.insert(job_id, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, Subscription};
    use crate::storage::MemoryStore;
    use crate::testing::{
        AlwaysFailGenerator, EchoGenerator, FailingStore, FlakyGenerator, RecordingSleeper,
        StageFailingGenerator,
    };
    use std::time::Duration;

    fn engine_with(generator: Arc<dyn Generate>, store: Arc<dyn JobStore>) -> PipelineEngine {
        let runner = StageRunner::new(generator, RetryPolicy::default())
            .with_sleeper(Arc::new(RecordingSleeper::default()));
        PipelineEngine::new(store, EventBus::default(), runner)
    }

    async fn drain(mut subscription: Subscription) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = subscription.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_completed_run_persists_every_stage_in_order() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::new(EchoGenerator::default()), store.clone());
        let job = engine
            .create_job(&JobRequest::new("Make an AI notes app").with_title("E2E"))
            .await
            .unwrap();
        let subscription = engine.bus().subscribe(job.id);

        let outcome = engine.run_job(&job).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.results.len(), 11);

        let outputs = store.list_stage_outputs(job.id).await.unwrap();
        let names: Vec<&str> = outputs.iter().map(|o| o.stage_name.as_str()).collect();
        assert_eq!(names, engine.graph().stage_names());
        assert!(outputs.iter().all(|o| !o.is_error));

        let events = drain(subscription).await;
        assert_eq!(events.len(), 24);
        assert_eq!(events[0].event_type, EventType::WorkflowStart);
        assert_eq!(events[23].event_type, EventType::WorkflowEnd);
        assert_eq!(events[1].event_type, EventType::AgentStart);
        assert_eq!(events[2].event_type, EventType::AgentResult);
        assert_eq!(events[2].stage_name.as_deref(), Some("Boss"));
        assert_eq!(engine.status(job.id).await, Some(JobStatus::Completed));
        assert!(engine.bus().is_closed(job.id));
    }

    #[tokio::test]
    async fn test_stage_input_joins_sources_in_declared_order() {
        let generator = Arc::new(EchoGenerator::default());
        let engine = engine_with(generator.clone(), Arc::new(MemoryStore::new()));
        let job = engine
            .create_job(&JobRequest::new("Make an AI notes app"))
            .await
            .unwrap();
        assert_eq!(job.title, DEFAULT_RUN_TITLE);

        let outcome = engine.run_job(&job).await;
        let by_stage: HashMap<&str, &str> = outcome
            .results
            .iter()
            .map(|r| (r.stage.as_str(), r.content.as_str()))
            .collect();

        let expected_sources: [(&str, &[&str]); 11] = [
            ("Boss", &[]),
            ("Product Manager", &["Boss"]),
            ("Architect", &["Boss", "Product Manager"]),
            ("Product Manager (Refined)", &["Architect", "Product Manager"]),
            ("Architect (Refined)", &["Product Manager (Refined)", "Architect"]),
            ("Project Manager", &["Product Manager (Refined)", "Architect (Refined)"]),
            ("Architect (Final)", &["Project Manager", "Architect (Refined)"]),
            ("Project Manager (Refined)", &["Architect (Final)", "Project Manager"]),
            ("Engineer", &["Project Manager (Refined)", "Architect (Final)"]),
            ("QA", &["Engineer", "Project Manager (Refined)"]),
            ("Engineer (Final)", &["QA", "Engineer"]),
        ];

        let calls = generator.calls();
        assert_eq!(calls.len(), expected_sources.len());
        for (index, (name, sources)) in expected_sources.iter().enumerate() {
            let stage = &engine.graph().stages()[index];
            assert_eq!(stage.name, *name);

            let input = if sources.is_empty() {
                job.prompt.clone()
            } else {
                sources
                    .iter()
                    .map(|source| by_stage[source])
                    .collect::<Vec<_>>()
                    .join("\n\n")
            };
            assert_eq!(calls[index].0, stage.instruction.render_prompt(&input), "{name}");
        }
    }

    #[tokio::test]
    async fn test_exhausted_stage_aborts_the_job() {
        let store = Arc::new(MemoryStore::new());
        let generator = Arc::new(StageFailingGenerator::new("QA engineer"));
        let engine = engine_with(generator.clone(), store.clone());
        let job = engine.create_job(&JobRequest::new("notes app")).await.unwrap();
        let subscription = engine.bus().subscribe(job.id);

        let outcome = engine.run_job(&job).await;
        assert_eq!(outcome.results.len(), 9);
        assert!(matches!(
            &outcome.status,
            JobStatus::Failed { stage: Some(stage), .. } if stage == "QA"
        ));
        assert_eq!(generator.failures(), 3);

        let outputs = store.list_stage_outputs(job.id).await.unwrap();
        assert_eq!(outputs.len(), 10);
        let last = outputs.last().unwrap();
        assert!(last.is_error);
        assert_eq!(last.stage_name, "QA");
        assert!(last.content.starts_with("An error occurred in agent 'QA': "));

        let events = drain(subscription).await;
        let errors: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].content.as_deref(), Some(last.content.as_str()));
        assert_eq!(events.last().unwrap().event_type, EventType::WorkflowEnd);
        assert!(!events
            .iter()
            .any(|e| e.stage_name.as_deref() == Some("Engineer (Final)")));
    }

    #[tokio::test]
    async fn test_transient_failures_persist_one_output() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::new(FlakyGenerator::new(2)), store.clone());
        let job = engine.create_job(&JobRequest::new("notes app")).await.unwrap();

        let outcome = engine.run_job(&job).await;
        assert!(outcome.is_success());
        let outputs = store.list_stage_outputs(job.id).await.unwrap();
        assert_eq!(outputs.len(), 11);
        assert_eq!(outputs[0].stage_name, "Boss");
        assert_eq!(outputs[1].stage_name, "Product Manager");
    }

    #[tokio::test]
    async fn test_always_failing_generation_stops_at_boss() {
        let store = Arc::new(MemoryStore::new());
        let generator = Arc::new(AlwaysFailGenerator::default());
        let sleeper = Arc::new(RecordingSleeper::default());
        let runner = StageRunner::new(generator.clone(), RetryPolicy::default())
            .with_sleeper(sleeper.clone());
        let engine = PipelineEngine::new(store.clone(), EventBus::default(), runner);
        let job = engine.create_job(&JobRequest::new("notes app")).await.unwrap();

        let outcome = engine.run_job(&job).await;
        assert!(outcome.results.is_empty());
        assert_eq!(generator.calls(), 3);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );

        let outputs = store.list_stage_outputs(job.id).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_error);
        assert_eq!(outputs[0].stage_name, "Boss");
    }

    #[tokio::test]
    async fn test_short_prompt_is_rejected_before_creation() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::new(EchoGenerator::default()), store.clone());

        let err = engine.submit(&JobRequest::new("hi")).await.unwrap_err();
        assert!(err.is_client_error());
        assert!(store.list_jobs(10).await.unwrap().is_empty());
        assert_eq!(engine.bus().active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_failed_persistence_is_not_broadcast() {
        let store = Arc::new(FailingStore::failing_appends_after(2));
        let engine = engine_with(Arc::new(EchoGenerator::default()), store.clone());
        let job = engine.create_job(&JobRequest::new("notes app")).await.unwrap();
        let subscription = engine.bus().subscribe(job.id);

        let outcome = engine.run_job(&job).await;
        assert!(matches!(
            &outcome.status,
            JobStatus::Failed { stage: Some(stage), .. } if stage == "Architect"
        ));

        let persisted = store.list_stage_outputs(job.id).await.unwrap();
        let events = drain(subscription).await;
        let broadcast: Vec<_> = events
            .iter()
            .filter(|e| e.event_type.is_stage_output())
            .collect();
        assert_eq!(persisted.len(), 2);
        assert_eq!(broadcast.len(), persisted.len());
        assert_eq!(events.last().unwrap().event_type, EventType::WorkflowEnd);
    }

    #[tokio::test]
    async fn test_job_creation_failure_is_returned() {
        let engine = engine_with(
            Arc::new(EchoGenerator::default()),
            Arc::new(FailingStore::failing_create()),
        );
        let result = engine.submit(&JobRequest::new("notes app")).await;
        assert!(matches!(result, Err(AutoTeamError::Storage(_))));
    }

    #[tokio::test]
    async fn test_submit_returns_before_the_run_finishes() {
        let engine = engine_with(Arc::new(EchoGenerator::default()), Arc::new(MemoryStore::new()));
        let job = engine.submit(&JobRequest::new("notes app")).await.unwrap();

        let mut status = engine.status(job.id).await;
        for _ in 0..200 {
            if status.as_ref().is_some_and(JobStatus::is_terminal) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = engine.status(job.id).await;
        }
        assert_eq!(status, Some(JobStatus::Completed));
    }

    #[test]
    fn test_status_transitions() {
        let running = JobStatus::Running {
            stage: "Boss".to_string(),
        };
        let failed = JobStatus::Failed {
            stage: None,
            reason: "x".to_string(),
        };
        assert!(JobStatus::Pending.can_transition_to(&running));
        assert!(JobStatus::Pending.can_transition_to(&failed));
        assert!(running.can_transition_to(&JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(&JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(&running));
        assert!(!failed.can_transition_to(&JobStatus::Completed));
    }

    #[test]
    fn test_status_serialization() {
        let status = JobStatus::Running {
            stage: "QA".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json, serde_json::json!({"state": "running", "stage": "QA"}));
    }

    #[test]
    fn test_blank_title_falls_back() {
        let request = JobRequest::new("notes app").with_title("   ");
        assert_eq!(request.title_or(DEFAULT_PROJECT_TITLE), "Untitled");
    }
}
