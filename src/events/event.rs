//! Pipeline lifecycle events

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage name carried by job-level events
pub const ORCHESTRATOR: &str = "Orchestrator";

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStart,
    AgentStart,
    AgentResult,
    Error,
    WorkflowEnd,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WorkflowStart => "workflow_start",
            EventType::AgentStart => "agent_start",
            EventType::AgentResult => "agent_result",
            EventType::Error => "error",
            EventType::WorkflowEnd => "workflow_end",
        }
    }

    /// Whether the event mirrors a persisted stage output
    pub fn is_stage_output(&self) -> bool {
        matches!(self, EventType::AgentResult | EventType::Error)
    }
}

/// One progress notification for a job, as seen by stream subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub event_type: EventType,
    pub job_id: Uuid,
    pub stage_name: Option<String>,
    pub content: Option<String>,
}

impl PipelineEvent {
    pub fn workflow_start(job_id: Uuid, title: &str) -> Self {
        Self {
            event_type: EventType::WorkflowStart,
            job_id,
            stage_name: Some(ORCHESTRATOR.to_string()),
            content: Some(format!("Workflow started for project: '{title}'")),
        }
    }

    pub fn agent_start(job_id: Uuid, stage: &str) -> Self {
        Self {
            event_type: EventType::AgentStart,
            job_id,
            stage_name: Some(stage.to_string()),
            content: Some(format!("Agent '{stage}' is starting its task...")),
        }
    }

    pub fn agent_result(job_id: Uuid, stage: &str, content: impl Into<String>) -> Self {
        Self {
            event_type: EventType::AgentResult,
            job_id,
            stage_name: Some(stage.to_string()),
            content: Some(content.into()),
        }
    }

    pub fn error(job_id: Uuid, stage: &str, content: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Error,
            job_id,
            stage_name: Some(stage.to_string()),
            content: Some(content.into()),
        }
    }

    pub fn workflow_end(job_id: Uuid) -> Self {
        Self {
            event_type: EventType::WorkflowEnd,
            job_id,
            stage_name: Some(ORCHESTRATOR.to_string()),
            content: Some("Workflow has completed.".to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type == EventType::WorkflowEnd
    }
}
