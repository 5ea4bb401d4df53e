//! Sorting events published to subscribers.

use crate::plan::{AssignmentOutcome, RoutePlanState};
use crate::queue::TriggerReport;
use serde::Serialize;
use wds_common::types::{
    ChuteId, ParcelId, PathExecutionResult, PositionIndex, SensorId, Timestamp,
};

/// Something that happened to a parcel or at a sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SortingEvent {
    /// Route plan created for a new parcel.
    ParcelDetected {
        /// Parcel
        parcel_id: ParcelId,
        /// Detection sensor
        sensor_id: SensorId,
        /// Detection time
        at: Timestamp,
    },
    /// Upstream assignment or manual override applied.
    AssignmentApplied {
        /// Parcel
        parcel_id: ParcelId,
        /// Requested chute
        chute_id: ChuteId,
        /// Outcome
        outcome: AssignmentOutcome,
        /// Application time
        at: Timestamp,
    },
    /// Position sensor trigger classified.
    SensorTriggered {
        /// Position
        position_index: PositionIndex,
        /// Parcel reported by the sensor
        parcel_id: ParcelId,
        /// Classification label
        outcome: &'static str,
        /// Parcels displaced by a sequence violation
        displaced: Vec<ParcelId>,
        /// Trigger time
        at: Timestamp,
    },
    /// Parcel sent to the exception chute after a timing fault.
    Rerouted {
        /// Parcel
        parcel_id: ParcelId,
        /// Position where the fault was seen
        position_index: PositionIndex,
        /// What went wrong
        reason: String,
    },
    /// Finalized path executed.
    Sorted {
        /// Parcel
        parcel_id: ParcelId,
        /// Plan state at execution
        plan_state: RoutePlanState,
        /// Execution result
        result: PathExecutionResult,
    },
    /// Defect signal: a request referenced a parcel the engine does not know,
    /// or a plan was created twice.
    InvariantViolation {
        /// Parcel
        parcel_id: ParcelId,
        /// Error text
        detail: String,
    },
}

impl SortingEvent {
    /// Event for a classified trigger.
    pub fn from_report(report: &TriggerReport) -> Self {
        Self::SensorTriggered {
            position_index: report.position_index,
            parcel_id: report.trigger_parcel_id,
            outcome: report.outcome.label(),
            displaced: report.displaced.iter().map(|t| t.parcel_id).collect(),
            at: report.timestamp,
        }
    }

    /// Parcel the event concerns, if any.
    pub fn parcel_id(&self) -> Option<ParcelId> {
        match self {
            Self::ParcelDetected { parcel_id, .. }
            | Self::AssignmentApplied { parcel_id, .. }
            | Self::Rerouted { parcel_id, .. }
            | Self::Sorted { parcel_id, .. }
            | Self::InvariantViolation { parcel_id, .. } => Some(*parcel_id),
            Self::SensorTriggered { parcel_id, .. } => {
                (*parcel_id != wds_common::types::UNIDENTIFIED_PARCEL).then_some(*parcel_id)
            }
        }
    }
}
