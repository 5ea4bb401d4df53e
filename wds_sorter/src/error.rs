//! Error types for the sorting engine.
//!
//! Physical-world failures (late parcels, actuation timeouts, upstream loss)
//! never appear here: they resolve to the exception chute. These enums cover
//! invariant violations and composition-time failures.

use thiserror::Error;
use wds_common::config::ConfigError;
use wds_common::driver::DriverError;
use wds_common::types::{ChuteId, ParcelId};

/// Route plan store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutePlanError {
    /// An assignment or override referenced a parcel with no plan.
    #[error("No route plan for parcel {0} (assignment before detection)")]
    PlanNotFound(ParcelId),

    /// A second plan was requested for a live parcel.
    #[error("Route plan for parcel {0} already exists")]
    AlreadyExists(ParcelId),

    /// Operation requires a terminal plan.
    #[error("Route plan for parcel {0} is not terminal")]
    NotTerminal(ParcelId),

    /// Persistence port failure.
    #[error("Route plan persistence failed: {0}")]
    Persistence(String),
}

/// Upstream routing client errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// No connection to the rule engine.
    #[error("Upstream disconnected")]
    Disconnected,

    /// Message could not be delivered.
    #[error("Upstream send failed: {0}")]
    SendFailed(String),
}

/// Composition-level errors returned by the sorting service.
#[derive(Debug, Error)]
pub enum SorterError {
    /// Route plan store rejected the operation.
    #[error(transparent)]
    Plan(#[from] RoutePlanError),

    /// Chute is unknown or disabled in the current topology.
    #[error("Chute {chute_id} is unknown or disabled")]
    UnknownChute {
        /// Requested chute
        chute_id: ChuteId,
    },

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Driver error.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Upstream client error.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Real-time process setup failed.
    #[error("RT setup failed: {0}")]
    RtSetup(String),
}
