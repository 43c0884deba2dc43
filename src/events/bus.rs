//! Per-job broadcast bus
//!
//! Each job gets its own bounded `tokio::sync::broadcast` channel, created on
//! first use. Publishing never waits on subscribers: a subscriber that falls
//! more than `capacity` events behind loses the overflow instead of stalling
//! the job. [`EventBus::close_job`] drops the job's sender so subscribers
//! drain what is buffered and then finish.

use crate::events::event::PipelineEvent;
use crate::observability::metrics;
use futures::stream::{self, Stream};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Default per-job channel capacity
pub const DEFAULT_CAPACITY: usize = 1024;

/// Largest per-job channel capacity accepted
pub const MAX_CAPACITY: usize = 65_536;

/// Default number of closed job ids remembered
pub const DEFAULT_CLOSED_MEMORY: usize = 4096;

/// Cloneable handle to the shared bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    state: Mutex<BusState>,
    capacity: usize,
    closed_memory: usize,
}

#[derive(Default)]
struct BusState {
    channels: HashMap<Uuid, broadcast::Sender<PipelineEvent>>,
    closed: HashSet<Uuid>,
    closed_order: VecDeque<Uuid>,
}

impl BusState {
    fn remember_closed(&mut self, job_id: Uuid, limit: usize) {
        if limit == 0 || !self.closed.insert(job_id) {
            return;
        }
        self.closed_order.push_back(job_id);
        while self.closed_order.len() > limit {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_CLOSED_MEMORY)
    }
}

impl EventBus {
    /// Create a bus whose per-job channels hold `capacity` events
    ///
    /// `capacity` is clamped to `1..=MAX_CAPACITY`.
    pub fn new(capacity: usize, closed_memory: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                capacity: capacity.clamp(1, MAX_CAPACITY),
                closed_memory,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sender_for(&self, state: &mut BusState, job_id: Uuid) -> broadcast::Sender<PipelineEvent> {
        state
            .channels
            .entry(job_id)
            .or_insert_with(|| {
                trace!(%job_id, "creating event channel");
                broadcast::channel(self.inner.capacity).0
            })
            .clone()
    }

    /// Publish an event to every current subscriber of the job
    ///
    /// Returns the number of subscribers the event was delivered to.
    pub fn publish(&self, job_id: Uuid, event: PipelineEvent) -> usize {
        let sender = {
            let mut state = self.state();
            if state.closed.contains(&job_id) {
                warn!(%job_id, event_type = event.event_type.as_str(), "publish to closed job ignored");
                return 0;
            }
            self.sender_for(&mut state, job_id)
        };

        let event_type = event.event_type;
        match sender.send(event) {
            Ok(receivers) => {
                metrics().event_published(true);
                trace!(%job_id, event_type = event_type.as_str(), receivers, "event published");
                receivers
            }
            Err(_) => {
                metrics().event_published(false);
                trace!(%job_id, event_type = event_type.as_str(), "event published with no subscribers");
                0
            }
        }
    }

    /// Subscribe to a job's future events
    ///
    /// Subscribing to a job that was already closed yields a subscription that
    /// is finished from the start.
    pub fn subscribe(&self, job_id: Uuid) -> Subscription {
        let mut state = self.state();
        let receiver = if state.closed.contains(&job_id) {
            debug!(%job_id, "subscription to closed job");
            None
        } else {
            Some(self.sender_for(&mut state, job_id).subscribe())
        };
        drop(state);

        metrics().subscription_opened();
        Subscription { job_id, receiver }
    }

    /// Release the job's channel once its final event has been published
    pub fn close_job(&self, job_id: Uuid) {
        let mut state = self.state();
        let had_channel = state.channels.remove(&job_id).is_some();
        state.remember_closed(job_id, self.inner.closed_memory);
        debug!(%job_id, had_channel, "event channel closed");
    }

    /// Whether the job was closed recently enough to be remembered
    pub fn is_closed(&self, job_id: Uuid) -> bool {
        self.state().closed.contains(&job_id)
    }

    /// Number of jobs with a live channel
    pub fn active_jobs(&self) -> usize {
        self.state().channels.len()
    }

    /// Number of subscribers currently attached to a job
    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.state()
            .channels
            .get(&job_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// Receiving end for one job's events
pub struct Subscription {
    job_id: Uuid,
    receiver: Option<broadcast::Receiver<PipelineEvent>>,
}

impl Subscription {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Whether no further events will be yielded
    pub fn is_finished(&self) -> bool {
        self.receiver.is_none()
    }

    /// Next event in publish order, or `None` once the job has ended
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => {
                    if event.is_terminal() {
                        self.receiver = None;
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(job_id = %self.job_id, skipped, "subscriber lagged, events dropped");
                    metrics().events_lagged(skipped);
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Adapt into a `Stream` that ends with the job
    pub fn into_stream(self) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|event| (event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        metrics().subscription_closed();
    }
}
