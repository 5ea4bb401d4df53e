//! WDS Common Library
//!
//! Shared types, topology model and configuration loading for the
//! wheel-diverter sorter workspace.
//!
//! # Module Structure
//!
//! - [`types`] - Identifiers, switching paths, queue tasks, execution results
//! - [`topology`] - Conveyor segments, diverters, chutes, versioned snapshots
//! - [`config`] - TOML configuration loading and validation
//! - [`driver`] - Diverter driver capability trait
//! - [`consts`] - Defaults and file names
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! wds_common = { path = "../wds_common" }
//! ```
//!
//! ```rust
//! use wds_common::prelude::*;
//! ```

pub mod config;
pub mod consts;
pub mod driver;
pub mod prelude;
pub mod topology;
pub mod types;
