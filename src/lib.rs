//! AutoTeam - multi-agent product team pipeline
//!
//! Runs a fixed workflow of role-played LLM "agents" (Boss, Product Manager,
//! Architect, Project Manager, Engineer, QA) over a user's idea, with three
//! refinement loops between stage pairs.
//!
//! # Overview
//!
//! - [`pipeline`]: the stage graph, bounded retry and the job engine
//! - [`events`]: per-job, in-order broadcast of progress events
//! - [`storage`]: append-only persistence of jobs and stage outputs
//! - [`llm`]: provider integrations behind a text-in/text-out seam
//! - [`api`]: HTTP and server-sent events surface
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use autoteam::pipeline::{JobRequest, PipelineEngine};
//! use autoteam::AppConfig;
//!
//! # async fn run() -> autoteam::AutoTeamResult<()> {
//! // Mock provider and in-memory storage by default
//! let engine = PipelineEngine::from_config(&AppConfig::default())?;
//! let job = engine
//!     .create_job(&JobRequest::new("Make an AI notes app").with_title("Notes"))
//!     .await?;
//!
//! let mut events = engine.bus().subscribe(job.id);
//! let outcome = engine.run_job(&job).await;
//! assert_eq!(outcome.results.len(), 11);
//!
//! while let Some(event) = events.next().await {
//!     println!("{} {:?}", event.event_type.as_str(), event.stage_name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod storage;
pub mod testing;

pub use api::ApiServer;
pub use config::*;
pub use error::{AutoTeamError, AutoTeamResult};
pub use events::{EventBus, EventType, PipelineEvent, Subscription};
pub use pipeline::{JobOutcome, JobRequest, JobStatus, PipelineEngine, StageGraph};
pub use storage::{Job, JobStore, StageOutput};
