//! Arrival window classification.

use serde::Serialize;
use wds_common::types::{QueueTask, Timestamp};

/// Where a trigger falls relative to its task's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingClass {
    /// Before `earliest_dequeue_time`.
    Early,
    /// Inside `[earliest_dequeue_time, latest_dequeue_time]`.
    OnTime,
    /// After `latest_dequeue_time`.
    Late,
}

/// Classify a trigger at `timestamp` against `task`. Both bounds are inclusive.
#[inline]
pub fn classify(task: &QueueTask, timestamp: Timestamp) -> TimingClass {
    if timestamp < task.earliest_dequeue_time {
        TimingClass::Early
    } else if timestamp > task.latest_dequeue_time() {
        TimingClass::Late
    } else {
        TimingClass::OnTime
    }
}
