//! Prelude module for common re-exports.
//!
//! ```rust
//! use wds_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, EngineConfig, FullConfig, HalConfig, LogLevel, SharedConfig,
    SorterConfig, UpstreamConfig, load_config_dir,
};

// ─── Topology ───────────────────────────────────────────────────────
pub use crate::topology::{
    ChuteConfig, ChuteRoute, ConveyorSegment, DiverterNode, RouteStop, TopologyConfig,
    TopologySnapshot, TopologyStore,
};

// ─── Data model ─────────────────────────────────────────────────────
pub use crate::types::{
    ChuteId, DiverterDirection, DiverterId, DiverterPathSegment, ParcelId, PathExecutionResult,
    PositionIndex, QueueTask, SegmentId, SensorId, SensorTriggerEvent, SwitchingPath, Timestamp,
    UNIDENTIFIED_PARCEL,
};

// ─── Drivers ────────────────────────────────────────────────────────
pub use crate::driver::{DiverterDriver, DriverDiagnostics, DriverError, DriverFactory};
