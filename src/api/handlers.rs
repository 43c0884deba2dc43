//! Request handlers

use crate::api::errors::ApiError;
use crate::events::PipelineEvent;
use crate::observability::metrics;
use crate::pipeline::{JobRequest, JobStatus, PipelineEngine};
use crate::storage::Job;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use tracing::{debug, info};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::sse::Event;
use warp::{Rejection, Reply};

/// SSE event name for every pipeline event
pub const SSE_EVENT_NAME: &str = "agent_output";

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunAccepted {
    pub job_id: Uuid,
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectCreated {
    pub id: Uuid,
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub job: Job,
    /// `null` for projects that were never run by this process
    pub status: Option<JobStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

pub async fn index() -> Result<impl Reply, Infallible> {
    let endpoints = BTreeMap::from([
        ("GET /health", "Liveness check"),
        ("GET /metrics", "Job, stage and event bus metrics"),
        ("POST /agents/run", "Start the agent pipeline for a prompt"),
        ("GET /agents/stream/{job_id}", "Server-sent events for a running job"),
        ("POST /projects", "Create a project without running it"),
        ("GET /projects", "List projects, newest first"),
        ("GET /projects/{id}", "Project details and run status"),
        ("GET /results/{id}", "Stored stage outputs in order"),
    ]);
    Ok(warp::reply::json(&IndexResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints,
    }))
}

pub async fn health() -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&serde_json::json!({ "status": "ok" })))
}

pub async fn metrics_snapshot() -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&metrics().get_metrics()))
}

pub async fn run_agents(
    request: JobRequest,
    engine: PipelineEngine,
) -> Result<impl Reply, Rejection> {
    let job = engine
        .submit(&request)
        .await
        .map_err(|err| ApiError::from(err).reject())?;
    info!(job_id = %job.id, "pipeline run accepted");

    Ok(warp::reply::with_status(
        warp::reply::json(&RunAccepted {
            job_id: job.id,
            title: job.title,
        }),
        StatusCode::ACCEPTED,
    ))
}

/// Stream a job's events until `workflow_end`
///
/// The subscription is taken before the job's state is inspected so no event
/// published in between is missed.
pub async fn stream_job(job_id: Uuid, engine: PipelineEngine) -> Result<impl Reply, Rejection> {
    let subscription = engine.bus().subscribe(job_id);

    let finished = match engine.status(job_id).await {
        Some(status) => status.is_terminal(),
        None => {
            let known = engine
                .store()
                .get_job(job_id)
                .await
                .map_err(|err| ApiError::Internal(err.to_string()).reject())?;
            if known.is_none() {
                drop(subscription);
                engine.bus().close_job(job_id);
                return Err(ApiError::NotFound(format!("Job not found: {job_id}")).reject());
            }
            true
        }
    };

    let events: BoxStream<'static, Result<Event, serde_json::Error>> = if finished {
        debug!(%job_id, "stream requested for finished job");
        drop(subscription);
        engine.bus().close_job(job_id);
        stream::empty().boxed()
    } else {
        subscription.into_stream().map(sse_event).boxed()
    };

    Ok(warp::sse::reply(warp::sse::keep_alive().stream(events)))
}

fn sse_event(event: PipelineEvent) -> Result<Event, serde_json::Error> {
    Event::default().event(SSE_EVENT_NAME).json_data(&event)
}

pub async fn create_project(
    request: JobRequest,
    engine: PipelineEngine,
) -> Result<impl Reply, Rejection> {
    let job = engine
        .create_project(&request)
        .await
        .map_err(|err| ApiError::from(err).reject())?;

    Ok(warp::reply::with_status(
        warp::reply::json(&ProjectCreated {
            id: job.id,
            title: job.title,
        }),
        StatusCode::CREATED,
    ))
}

pub async fn list_projects(
    query: ListQuery,
    engine: PipelineEngine,
) -> Result<impl Reply, Rejection> {
    let jobs = engine
        .store()
        .list_jobs(query.limit())
        .await
        .map_err(|err| ApiError::Internal(err.to_string()).reject())?;
    Ok(warp::reply::json(&jobs))
}

pub async fn get_project(id: Uuid, engine: PipelineEngine) -> Result<impl Reply, Rejection> {
    let job = engine
        .store()
        .get_job(id)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()).reject())?
        .ok_or_else(|| ApiError::NotFound(format!("Project not found: {id}")).reject())?;
    let status = engine.status(id).await;

    Ok(warp::reply::json(&ProjectDetail { job, status }))
}

pub async fn get_results(id: Uuid, engine: PipelineEngine) -> Result<impl Reply, Rejection> {
    let outputs = engine
        .store()
        .list_stage_outputs(id)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()).reject())?;
    Ok(warp::reply::json(&outputs))
}
