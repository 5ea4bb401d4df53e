//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! for the sorter. A configuration directory holds two files:
//!
//! - `sorter.toml` - `[shared]`, `[engine]`, `[hal]`, `[upstream]`
//! - `topology.toml` - segments, diverters, chutes (see [`crate::topology`])
//!
//! # Usage
//!
//! ```rust,no_run
//! use wds_common::config::{load_config_dir, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = load_config_dir(Path::new("config/"))?;
//!     println!("Service: {}", config.sorter.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_ASSIGNMENT_TIMEOUT_MS, DEFAULT_EVENT_CHANNEL_CAPACITY,
    DEFAULT_MAX_SEQUENCE_REEVALUATIONS, DEFAULT_QUEUE_SWEEP_INTERVAL_MS,
    DEFAULT_TASK_EXPIRY_GRACE_MS, SORTER_CONFIG_FILE, TOPOLOGY_CONFIG_FILE,
};
use crate::topology::TopologyConfig;
use crate::types::ChuteId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "wds-line-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_assignment_timeout_ms() -> u64 {
    DEFAULT_ASSIGNMENT_TIMEOUT_MS
}

fn default_max_sequence_reevaluations() -> u32 {
    DEFAULT_MAX_SEQUENCE_REEVALUATIONS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_task_expiry_grace_ms() -> u64 {
    DEFAULT_TASK_EXPIRY_GRACE_MS
}

fn default_queue_sweep_interval_ms() -> u64 {
    DEFAULT_QUEUE_SWEEP_INTERVAL_MS
}

/// Routing engine settings (`[engine]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Safe destination for every parcel that cannot be routed normally.
    pub exception_chute_id: ChuteId,

    /// Time from detection until an unassigned parcel falls back [ms].
    #[serde(default = "default_assignment_timeout_ms")]
    pub assignment_timeout_ms: u64,

    /// How often a mismatched trigger is re-evaluated against the next queue head.
    #[serde(default = "default_max_sequence_reevaluations")]
    pub max_sequence_reevaluations: u32,

    /// Capacity of the sorting event broadcast channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Time past `latest_dequeue_time` before an unmatched queue task expires [ms].
    #[serde(default = "default_task_expiry_grace_ms")]
    pub task_expiry_grace_ms: u64,

    /// Period of the overdue queue task sweep [ms].
    #[serde(default = "default_queue_sweep_interval_ms")]
    pub queue_sweep_interval_ms: u64,
}

impl EngineConfig {
    /// Engine settings with defaults for everything but the exception chute.
    pub fn with_exception_chute(exception_chute_id: ChuteId) -> Self {
        Self {
            exception_chute_id,
            assignment_timeout_ms: DEFAULT_ASSIGNMENT_TIMEOUT_MS,
            max_sequence_reevaluations: DEFAULT_MAX_SEQUENCE_REEVALUATIONS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            task_expiry_grace_ms: DEFAULT_TASK_EXPIRY_GRACE_MS,
            queue_sweep_interval_ms: DEFAULT_QUEUE_SWEEP_INTERVAL_MS,
        }
    }

    /// Validate bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assignment_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "assignment_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "event_channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.queue_sweep_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "queue_sweep_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The exception chute must exist in `topology` and be enabled.
    pub fn validate_exception_chute(&self, topology: &TopologyConfig) -> Result<(), ConfigError> {
        let exception = self.exception_chute_id;
        match topology.chutes.iter().find(|c| c.chute_id == exception) {
            None => Err(ConfigError::ValidationError(format!(
                "exception chute {exception} is not defined in the topology"
            ))),
            Some(chute) if !chute.enabled => Err(ConfigError::ValidationError(format!(
                "exception chute {exception} is disabled"
            ))),
            Some(_) => Ok(()),
        }
    }
}

fn default_driver() -> String {
    "simulation".to_string()
}

/// Diverter driver selection (`[hal]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HalConfig {
    /// Registered driver name.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Per-driver configuration sections.
    /// Key = driver name, Value = driver-specific TOML table.
    #[serde(default)]
    pub driver_config: HashMap<String, toml::Value>,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            driver_config: HashMap::new(),
        }
    }
}

/// Loopback upstream settings (`[upstream]`), used in simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Chutes assigned round-robin to detected parcels. Empty = no auto-assignment.
    #[serde(default)]
    pub auto_assign_chutes: Vec<ChuteId>,

    /// Delay between detection and auto-assignment [ms].
    #[serde(default)]
    pub auto_assign_latency_ms: u64,
}

/// Contents of `sorter.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SorterConfig {
    /// Common fields.
    pub shared: SharedConfig,
    /// Engine settings.
    pub engine: EngineConfig,
    /// Driver selection.
    #[serde(default)]
    pub hal: HalConfig,
    /// Loopback upstream settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// Complete configuration from a config directory.
#[derive(Debug, Clone)]
pub struct FullConfig {
    /// `sorter.toml`.
    pub sorter: SorterConfig,
    /// `topology.toml`.
    pub topology: TopologyConfig,
}

impl FullConfig {
    /// Validate each part and their cross references.
    ///
    /// The exception chute must exist in the topology and be enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sorter.shared.validate()?;
        self.sorter.engine.validate()?;
        self.topology.validate()?;

        self.sorter.engine.validate_exception_chute(&self.topology)
    }
}

/// Trait for loading configuration from TOML files.
///
/// Blanket-implemented for any type implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Load and validate `sorter.toml` + `topology.toml` from `dir`.
pub fn load_config_dir(dir: &Path) -> Result<FullConfig, ConfigError> {
    let sorter = SorterConfig::load(&dir.join(SORTER_CONFIG_FILE))?;
    let topology = TopologyConfig::load(&dir.join(TOPOLOGY_CONFIG_FILE))?;

    let config = FullConfig { sorter, topology };
    config.validate()?;
    Ok(config)
}
