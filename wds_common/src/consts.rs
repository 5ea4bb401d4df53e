//! System-wide constants for the sorter workspace.
//!
//! Single source of truth for default limits, timeouts and file names.

/// Default time from detection until an unassigned parcel falls back [ms].
pub const DEFAULT_ASSIGNMENT_TIMEOUT_MS: u64 = 10_000;

/// Default bound on re-evaluating a mismatched sensor trigger.
pub const DEFAULT_MAX_SEQUENCE_REEVALUATIONS: u32 = 1;

/// Default capacity of the sorting event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default time past a queue task's window before it expires unmatched [ms].
pub const DEFAULT_TASK_EXPIRY_GRACE_MS: u64 = 1_000;

/// Default period of the overdue queue task sweep [ms].
pub const DEFAULT_QUEUE_SWEEP_INTERVAL_MS: u64 = 100;

/// Capacity of a driver's sensor event broadcast channel.
pub const SENSOR_CHANNEL_CAPACITY: usize = 4096;

/// Default configuration directory path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wds/config";

/// Engine configuration file name inside a config directory.
pub const SORTER_CONFIG_FILE: &str = "sorter.toml";

/// Topology file name inside a config directory.
pub const TOPOLOGY_CONFIG_FILE: &str = "topology.toml";

/// Service name used when registering with the host.
pub const SORTER_SERVICE_NAME: &str = "wds_sorter";
