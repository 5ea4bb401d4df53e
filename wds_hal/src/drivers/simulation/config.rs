//! Simulation driver settings (`[hal.driver_config.simulation]`).

use serde::{Deserialize, Serialize};
use wds_common::driver::DriverError;
use wds_common::types::DiverterId;

/// Behaviour of the simulated diverters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Time a diverter takes to confirm an actuation [ms].
    #[serde(default)]
    pub actuation_latency_ms: u64,

    /// Diverters that reject every actuation.
    #[serde(default)]
    pub failing_diverters: Vec<DiverterId>,

    /// Diverters that never confirm an actuation.
    #[serde(default)]
    pub stuck_diverters: Vec<DiverterId>,
}

impl SimulationConfig {
    /// Parse from the driver's TOML table. `None` yields defaults.
    pub fn from_value(value: Option<&toml::Value>) -> Result<Self, DriverError> {
        match value {
            None => Ok(Self::default()),
            Some(value) => value
                .clone()
                .try_into::<SimulationConfig>()
                .map_err(|e| DriverError::ConfigError(format!("simulation: {e}"))),
        }
    }
}
