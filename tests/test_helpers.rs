//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use autoteam::config::AppConfig;
use autoteam::events::{PipelineEvent, Subscription};
use autoteam::pipeline::{PipelineEngine, RetryPolicy, StageRunner};
use autoteam::storage::JobStore;
use autoteam::testing::RecordingSleeper;
use autoteam::{llm::Generate, EventBus};
use std::sync::Arc;
use std::time::Duration;

/// Configuration with the mock provider and in-memory storage
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.initial_backoff_secs = 0.0;
    config
}

/// Engine whose retries never actually sleep
pub fn test_engine(generator: Arc<dyn Generate>, store: Arc<dyn JobStore>) -> PipelineEngine {
    let runner = StageRunner::new(generator, RetryPolicy::default())
        .with_sleeper(Arc::new(RecordingSleeper::default()));
    PipelineEngine::new(store, EventBus::default(), runner)
}

/// Collect events until the subscription ends, failing the test if it hangs
pub async fn collect_events(mut subscription: Subscription) -> Vec<PipelineEvent> {
    tokio::time::timeout(Duration::from_secs(10), async move {
        let mut events = Vec::new();
        while let Some(event) = subscription.next().await {
            events.push(event);
        }
        events
    })
    .await
    .expect("subscription did not finish in time")
}
