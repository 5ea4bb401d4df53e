//! Simulation driver module.
//!
//! Software diverters and sensors for development and testing without
//! physical hardware.

mod config;
mod driver;

pub use config::SimulationConfig;
pub use driver::{ActuationRecord, SimulationDriver};

use wds_common::driver::DiverterDriver;

/// Factory function to create a simulation driver instance.
pub fn create_driver() -> Box<dyn DiverterDriver> {
    Box::new(SimulationDriver::new())
}
