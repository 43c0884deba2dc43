//! Single-stage execution with bounded retry
//!
//! The runner has no side effects beyond calling the generator and sleeping:
//! persistence and event publication belong to the engine, so retries never
//! produce duplicate records.

use crate::llm::{Generate, LlmError};
use crate::pipeline::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::pipeline::stages::RoleInstruction;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Every attempt for a stage failed
#[derive(Debug, Clone, Error)]
#[error("{last}")]
pub struct StageError {
    /// Attempts made before giving up
    pub attempts: u32,
    /// Error from the final attempt
    pub last: LlmError,
}

/// Successful stage execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRun {
    pub content: String,
    pub attempts: u32,
}

/// Runs one stage's generation call under a [`RetryPolicy`]
#[derive(Clone)]
pub struct StageRunner {
    generator: Arc<dyn Generate>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl StageRunner {
    pub fn new(generator: Arc<dyn Generate>, policy: RetryPolicy) -> Self {
        Self {
            generator,
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Generate the stage output, retrying transient failures
    pub async fn run_stage(
        &self,
        input: &str,
        instruction: &RoleInstruction,
    ) -> Result<String, StageError> {
        self.run_stage_detailed(input, instruction)
            .await
            .map(|run| run.content)
    }

    /// As [`run_stage`](Self::run_stage), also reporting how many attempts it took
    pub async fn run_stage_detailed(
        &self,
        input: &str,
        instruction: &RoleInstruction,
    ) -> Result<StageRun, StageError> {
        let prompt = instruction.render_prompt(input);
        let mut attempt: u32 = 0;

        loop {
            match self
                .generator
                .generate(&prompt, Some(&instruction.system))
                .await
            {
                Ok(content) => {
                    debug!(attempt = attempt + 1, "stage generation succeeded");
                    return Ok(StageRun {
                        content,
                        attempts: attempt + 1,
                    });
                }
                Err(error) if self.policy.should_retry(attempt) => {
                    let wait = self.policy.backoff_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        wait_secs = wait.as_secs_f64(),
                        error = %error,
                        "stage attempt failed, retrying"
                    );
                    self.sleeper.sleep(wait).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(attempts = attempt + 1, error = %error, "stage attempts exhausted");
                    return Err(StageError {
                        attempts: attempt + 1,
                        last: error,
                    });
                }
            }
        }
    }
}
