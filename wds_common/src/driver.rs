//! Diverter driver trait and error types.
//!
//! This module defines:
//! - `DiverterDriver` trait - one capability interface for diverter IO
//!   (actuation port + sensor event source), implemented per vendor
//! - `DriverError` enum - Error types for driver operations
//! - `DriverFactory` type alias - Factory function type
//! - `DriverDiagnostics` struct - Optional driver diagnostics
//!
//! The engine only talks to `dyn DiverterDriver`; which implementation runs
//! is decided once at composition time by the driver registry.

use crate::topology::TopologySnapshot;
use crate::types::{DiverterDirection, DiverterId, SensorTriggerEvent};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Error types for driver operations.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// Driver initialization failed
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Hardware communication error
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),

    /// Driver not found
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Diverter refused or failed the actuation
    #[error("Diverter {diverter_id} rejected {direction}: {reason}")]
    ActuationRejected {
        /// Diverter that was commanded
        diverter_id: DiverterId,
        /// Requested direction
        direction: DiverterDirection,
        /// Driver-specific reason
        reason: String,
    },

    /// Diverter is not known to the driver
    #[error("Unknown diverter: {0}")]
    UnknownDiverter(DiverterId),
}

/// Factory function type for creating driver instances.
pub type DriverFactory = fn() -> Box<dyn DiverterDriver>;

/// Optional driver diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DriverDiagnostics {
    /// Number of actuations confirmed
    pub actuation_count: u64,
    /// Number of actuations that failed
    pub actuation_failures: u64,
    /// Number of sensor events published
    pub sensor_events: u64,
    /// Driver-specific diagnostics (JSON string)
    pub custom: Option<String>,
}

/// Capability interface for diverter IO.
///
/// # Lifecycle
///
/// 1. `init()` - Called once with the topology and the driver's TOML table
/// 2. `actuate()` / `subscribe_sensors()` - Called concurrently while sorting
/// 3. `shutdown()` - Called when the service stops
///
/// # Timing Contracts
///
/// | Operation | Bound |
/// |-----------|-------|
/// | `init()` | none (before sorting) |
/// | `actuate()` | caller enforces the path segment TTL |
/// | `shutdown()` | should complete within 1 second |
#[async_trait]
pub trait DiverterDriver: Send + Sync {
    /// Returns the driver's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Returns the driver's semantic version.
    fn version(&self) -> &'static str;

    /// Initialize the driver.
    ///
    /// # Arguments
    /// * `topology` - Line layout; drivers map diverter/sensor ids to IO here
    /// * `driver_config` - This driver's `[hal.driver_config.<name>]` table, if any
    ///
    /// # Errors
    /// Return `DriverError::InitFailed` or `DriverError::ConfigError` if the
    /// driver cannot serve the topology.
    fn init(
        &mut self,
        topology: &TopologySnapshot,
        driver_config: Option<&toml::Value>,
    ) -> Result<(), DriverError>;

    /// Move `diverter_id` to `direction` and resolve once the diverter confirms.
    ///
    /// Must be safe to call concurrently for different diverters.
    async fn actuate(
        &self,
        diverter_id: DiverterId,
        direction: DiverterDirection,
    ) -> Result<(), DriverError>;

    /// Subscribe to sensor trigger events. Each subscriber sees every event.
    fn subscribe_sensors(&self) -> broadcast::Receiver<SensorTriggerEvent>;

    /// Graceful shutdown of the driver.
    fn shutdown(&self) -> Result<(), DriverError>;

    /// Get driver-specific diagnostics.
    /// Default: None
    fn diagnostics(&self) -> Option<DriverDiagnostics> {
        None
    }
}
