//! Per-position arrival tracking.

pub mod manager;
pub mod window;

pub use manager::{
    PositionQueueManager, PositionQueueSnapshot, TriggerCounters, TriggerOutcome, TriggerReport,
};
pub use window::{classify, TimingClass};
