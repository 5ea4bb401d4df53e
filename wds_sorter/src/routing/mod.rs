//! Path generation and execution.
//!
//! - [`generator`] - chute → switching path, parcel → queue tasks
//! - [`executor`] - drives diverters along a path with per-step TTL

pub mod executor;
pub mod generator;

pub use executor::SwitchingPathExecutor;
pub use generator::{GeneratedRoute, SwitchingPathGenerator};
