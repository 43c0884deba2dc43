//! Job execution: stage graph, retry policy, single-stage runner and the engine
//! that ties them to storage and the event bus.

pub mod engine;
pub mod retry;
pub mod runner;
pub mod stages;

pub use engine::{
    JobOutcome, JobRequest, JobStatus, PipelineEngine, PipelineError, StageResult,
    DEFAULT_PROJECT_TITLE, DEFAULT_RUN_TITLE, MIN_PROMPT_CHARS,
};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use runner::{StageError, StageRun, StageRunner};
pub use stages::{
    build_input, GraphError, MissingOutput, Role, RoleInstruction, StageDefinition, StageGraph,
    StageInput,
};
