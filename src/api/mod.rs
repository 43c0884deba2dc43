//! HTTP surface
//!
//! Endpoints:
//! - `GET /` - endpoint index
//! - `GET /health` - liveness
//! - `GET /metrics` - metrics snapshot
//! - `POST /agents/run` - submit a job and start it
//! - `GET /agents/stream/{job_id}` - server-sent events for a job
//! - `POST /projects`, `GET /projects`, `GET /projects/{id}` - project records
//! - `GET /results/{id}` - stored stage outputs

pub mod errors;
pub mod handlers;

pub use errors::{handle_rejection, ApiError};

use crate::error::{AutoTeamError, AutoTeamResult};
use crate::pipeline::{JobRequest, PipelineEngine};
use crate::request_span;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tracing::info;
use uuid::Uuid;
use warp::{Filter, Rejection, Reply};

/// Largest accepted JSON body
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Serves the pipeline engine over HTTP
#[derive(Clone)]
pub struct ApiServer {
    engine: PipelineEngine,
}

impl ApiServer {
    pub fn new(engine: PipelineEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &PipelineEngine {
        &self.engine
    }

    /// Every route, with rejection handling, CORS and request tracing applied
    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let engine = with_engine(self.engine.clone());

        let index = warp::path::end().and(warp::get()).and_then(handlers::index);
        let health = warp::path!("health")
            .and(warp::get())
            .and_then(handlers::health);
        let metrics = warp::path!("metrics")
            .and(warp::get())
            .and_then(handlers::metrics_snapshot);

        let run = warp::path!("agents" / "run")
            .and(warp::post())
            .and(json_body())
            .and(engine.clone())
            .and_then(handlers::run_agents);
        let stream = warp::path!("agents" / "stream" / Uuid)
            .and(warp::get())
            .and(engine.clone())
            .and_then(handlers::stream_job);

        let create_project = warp::path!("projects")
            .and(warp::post())
            .and(json_body())
            .and(engine.clone())
            .and_then(handlers::create_project);
        let list_projects = warp::path!("projects")
            .and(warp::get())
            .and(warp::query::<handlers::ListQuery>())
            .and(engine.clone())
            .and_then(handlers::list_projects);
        let get_project = warp::path!("projects" / Uuid)
            .and(warp::get())
            .and(engine.clone())
            .and_then(handlers::get_project);
        let results = warp::path!("results" / Uuid)
            .and(warp::get())
            .and(engine)
            .and_then(handlers::get_results);

        index
            .or(health)
            .or(metrics)
            .or(run)
            .or(stream)
            .or(create_project)
            .or(list_projects)
            .or(get_project)
            .or(results)
            .recover(handle_rejection)
            .with(
                warp::cors()
                    .allow_any_origin()
                    .allow_methods(vec!["GET", "POST", "OPTIONS"])
                    .allow_headers(vec!["content-type"]),
            )
            .with(warp::trace(|info| {
                request_span!(method = %info.method(), path = %info.path())
            }))
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<S>(self, addr: SocketAddr, shutdown: S) -> AutoTeamResult<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let (bound, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .map_err(|err| AutoTeamError::internal_error(format!("failed to bind {addr}: {err}")))?;

        info!(address = %bound, "HTTP server listening");
        server.await;
        info!("HTTP server stopped");
        Ok(())
    }
}

fn with_engine(
    engine: PipelineEngine,
) -> impl Filter<Extract = (PipelineEngine,), Error = Infallible> + Clone {
    warp::any().map(move || engine.clone())
}

fn json_body() -> impl Filter<Extract = (JobRequest,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}
