//! Core data model shared by the routing engine and drivers.
//!
//! - Identifier aliases (`ParcelId`, `ChuteId`, `DiverterId`, ...)
//! - `SwitchingPath` / `DiverterPathSegment` - timed diverter actuation plan
//! - `QueueTask` - per-position arrival expectation
//! - `PathExecutionResult` - outcome of one execution attempt
//! - `SensorTriggerEvent` - raw sensor edge delivered by a driver
//!
//! All timestamps are milliseconds on the engine clock.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Parcel identifier. `0` marks an unidentified trigger.
pub type ParcelId = u64;
/// Chute (destination bin) identifier.
pub type ChuteId = u32;
/// Diverter identifier.
pub type DiverterId = u32;
/// Sensor identifier.
pub type SensorId = u32;
/// Conveyor segment identifier.
pub type SegmentId = u32;
/// Diverter position along the line (1 = closest to the entry).
pub type PositionIndex = u32;
/// Milliseconds on the engine clock.
pub type Timestamp = u64;

/// Parcel id carried by triggers from sensors that cannot read a label.
pub const UNIDENTIFIED_PARCEL: ParcelId = 0;

/// Logical diverter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiverterDirection {
    /// Pass through, no diversion.
    #[default]
    Straight,
    /// Divert to the left-hand chute.
    Left,
    /// Divert to the right-hand chute.
    Right,
}

impl fmt::Display for DiverterDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Straight => write!(f, "straight"),
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// One timed diverter actuation within a switching path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiverterPathSegment {
    /// Diverter to actuate.
    pub diverter_id: DiverterId,
    /// Direction the diverter must take for this parcel.
    pub target_direction: DiverterDirection,
    /// 1-based execution order.
    pub sequence_number: u32,
    /// Maximum time allowed for this step before it counts as failed.
    pub ttl_milliseconds: u64,
}

/// Ordered diverter actuations routing a parcel to `target_chute_id`.
///
/// Immutable once generated and owned by exactly one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchingPath {
    /// Destination chute.
    pub target_chute_id: ChuteId,
    /// Chute used when the path cannot complete.
    pub fallback_chute_id: ChuteId,
    /// Generation time.
    pub generated_at: Timestamp,
    /// Actuations in sequence order.
    pub segments: Vec<DiverterPathSegment>,
}

impl SwitchingPath {
    /// Compare two paths ignoring their generation time.
    pub fn same_route(&self, other: &SwitchingPath) -> bool {
        self.target_chute_id == other.target_chute_id
            && self.fallback_chute_id == other.fallback_chute_id
            && self.segments == other.segments
    }
}

/// Expectation that `parcel_id` trips the sensor at `position_index`
/// inside `[earliest_dequeue_time, latest_dequeue_time]`.
///
/// Window values are snapshotted from the topology at creation; later
/// configuration changes do not affect an existing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTask {
    /// Parcel expected at this position.
    pub parcel_id: ParcelId,
    /// Diverter position the task belongs to.
    pub position_index: PositionIndex,
    /// Diverter at this position.
    pub diverter_id: DiverterId,
    /// Direction this parcel needs at this position.
    pub target_direction: DiverterDirection,
    /// Creation time.
    pub created_at: Timestamp,
    /// Nominal arrival time.
    pub expected_arrival_time: Timestamp,
    /// `max(created_at, expected_arrival_time - tolerance_ms)`.
    pub earliest_dequeue_time: Timestamp,
    /// Transit time of the segment leading to this position.
    pub transit_time_ms: u64,
    /// Tolerance of the segment leading to this position.
    pub tolerance_ms: u64,
    /// `transit_time_ms + tolerance_ms` of the segment leading here.
    pub timeout_threshold_ms: u64,
}

impl QueueTask {
    /// Last on-time arrival: the segment timeout measured from the moment the
    /// parcel was expected at the previous position.
    #[inline]
    pub fn latest_dequeue_time(&self) -> Timestamp {
        self.expected_arrival_time
            .saturating_sub(self.transit_time_ms)
            .saturating_add(self.timeout_threshold_ms)
    }
}

/// Result of one switching path execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathExecutionResult {
    /// Whether the path executed as planned.
    pub is_success: bool,
    /// Chute the parcel is routed to.
    pub actual_chute_id: ChuteId,
    /// Why the parcel did not reach its target.
    pub failure_reason: Option<String>,
}

impl PathExecutionResult {
    /// Successful execution to `chute_id`.
    pub fn success(chute_id: ChuteId) -> Self {
        Self {
            is_success: true,
            actual_chute_id: chute_id,
            failure_reason: None,
        }
    }

    /// Failed execution, parcel routed to `fallback_chute_id`.
    pub fn failure(fallback_chute_id: ChuteId, reason: impl Into<String>) -> Self {
        Self {
            is_success: false,
            actual_chute_id: fallback_chute_id,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Raw sensor edge. Consumed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorTriggerEvent {
    /// Parcel read by the sensor, or [`UNIDENTIFIED_PARCEL`].
    pub parcel_id: ParcelId,
    /// Sensor that fired.
    pub sensor_id: SensorId,
    /// Trigger time.
    pub timestamp: Timestamp,
}
