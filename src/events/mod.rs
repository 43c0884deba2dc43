//! Job progress events and the per-job broadcast bus

pub mod bus;
pub mod event;

pub use bus::{EventBus, Subscription};
pub use event::{EventType, PipelineEvent, ORCHESTRATOR};
