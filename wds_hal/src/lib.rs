//! # WDS HAL Library
//!
//! Diverter hardware abstraction with pluggable driver architecture.
//! Drivers implement the `DiverterDriver` trait defined in `wds_common::driver`.
//!
//! # Module Structure
//!
//! - [`driver_registry`] - Driver factory registration
//! - [`drivers`] - Driver implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      wds_sorter (engine)                         │
//! │   executor ──actuate()──┐          ┌──subscribe_sensors()── svc  │
//! └─────────────────────────┼──────────┼─────────────────────────────┘
//!                           ▼          ▼
//!                   ┌──────────────────────┐     ┌─────────────────┐
//!                   │  DiverterDriver      │◄────│ DriverRegistry  │
//!                   │  (trait object)      │     │ (by name)       │
//!                   └──────────────────────┘     └─────────────────┘
//!                     simulation | vendor drivers
//! ```

#![deny(missing_docs)]

pub mod driver_registry;
pub mod drivers;

pub use crate::driver_registry::DriverRegistry;
pub use crate::drivers::simulation::SimulationDriver;
