//! Stage retry policy
//!
//! Delays follow `initial_backoff * 2^attempt`, where `attempt` is the zero-based
//! index of the attempt that just failed. The policy only computes delays;
//! waiting goes through a [`Sleeper`] so tests can observe it without time
//! passing.

use crate::config::{ConfigError, PipelineSection};
use async_trait::async_trait;
use std::time::Duration;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    pub fn from_section(section: &PipelineSection) -> Result<Self, ConfigError> {
        Ok(Self {
            max_retries: section.max_retries,
            initial_backoff: section.initial_backoff()?,
        })
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total attempts a stage may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retrying after failed attempt `attempt` (zero-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Whether another attempt follows failed attempt `attempt` (zero-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Every delay a fully failing stage would wait through, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|a| self.backoff_for(a)).collect()
    }
}

/// Suspends the current task between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
