//! Static conveyor topology.
//!
//! This module contains:
//! - `ConveyorSegment` / `DiverterNode` / `ChuteConfig` - TOML-backed line description
//! - `TopologyConfig` - the complete line, with validation
//! - `TopologySnapshot` - indexed, immutable, versioned view used by the engine
//! - `TopologyStore` - owner of the current snapshot, supports hot reload
//!
//! Generators take an `Arc<TopologySnapshot>` for the duration of one call,
//! so a reload never yields a mixed view to in-flight work.

use crate::config::ConfigError;
use crate::types::{ChuteId, DiverterDirection, DiverterId, PositionIndex, SegmentId, SensorId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

fn default_true() -> bool {
    true
}

/// Conveyor segment between two consecutive positions (or entry and the first diverter).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConveyorSegment {
    /// Segment identifier.
    pub segment_id: SegmentId,
    /// Segment length [mm], > 0.
    pub length_mm: f64,
    /// Belt speed [mm/s], > 0.
    pub speed_mmps: f64,
    /// Allowed deviation from nominal transit time [ms].
    #[serde(default)]
    pub time_tolerance_ms: u64,
}

impl ConveyorSegment {
    /// Nominal transit time [ms].
    #[inline]
    pub fn transit_time_ms(&self) -> u64 {
        (self.length_mm / self.speed_mmps * 1000.0).round() as u64
    }

    /// Transit time plus tolerance [ms].
    #[inline]
    pub fn timeout_threshold_ms(&self) -> u64 {
        self.transit_time_ms() + self.time_tolerance_ms
    }
}

/// A diverter and the sensor mounted at its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiverterNode {
    /// Diverter identifier.
    pub diverter_id: DiverterId,
    /// Position along the line (1 = first after entry).
    pub position_index: PositionIndex,
    /// Segment feeding this position.
    pub segment_id: SegmentId,
    /// Sensor that fires when a parcel reaches this position.
    pub sensor_id: SensorId,
    /// Routes through a disabled diverter cannot be resolved.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Chute attached to a diverter, or to the end of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChuteConfig {
    /// Chute identifier.
    pub chute_id: ChuteId,
    /// Diverter feeding the chute. `None` = end of line.
    #[serde(default)]
    pub diverter_id: Option<DiverterId>,
    /// Direction the diverter takes for this chute.
    #[serde(default)]
    pub direction: DiverterDirection,
    /// Disabled chutes cannot be routed to.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Complete line description loaded from `topology.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    /// Sensors that announce a new parcel at the line entry.
    #[serde(default)]
    pub detection_sensor_ids: Vec<SensorId>,
    /// Conveyor segments.
    #[serde(default)]
    pub segments: Vec<ConveyorSegment>,
    /// Diverters, any order.
    #[serde(default)]
    pub diverters: Vec<DiverterNode>,
    /// Chutes.
    #[serde(default)]
    pub chutes: Vec<ChuteConfig>,
}

impl TopologyConfig {
    /// Parse a topology from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate the topology.
    ///
    /// # Validation Rules
    /// 1. At least one diverter
    /// 2. Segment ids unique, `length_mm` and `speed_mmps` finite and > 0
    /// 3. Diverter ids, position indices and sensor ids unique
    /// 4. Every diverter references a known segment
    /// 5. Detection sensors are not diverter sensors
    /// 6. Chute ids unique, diverter chutes divert (not straight),
    ///    at most one end-of-line chute, one chute per diverter side
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.diverters.is_empty() {
            return Err(ConfigError::ValidationError(
                "topology must contain at least one diverter".to_string(),
            ));
        }

        let mut segment_ids = HashSet::new();
        for seg in &self.segments {
            if !segment_ids.insert(seg.segment_id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate segment id: {}",
                    seg.segment_id
                )));
            }
            if !(seg.length_mm.is_finite() && seg.length_mm > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "segment {}: length_mm must be > 0 (got {})",
                    seg.segment_id, seg.length_mm
                )));
            }
            if !(seg.speed_mmps.is_finite() && seg.speed_mmps > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "segment {}: speed_mmps must be > 0 (got {})",
                    seg.segment_id, seg.speed_mmps
                )));
            }
        }

        let mut diverter_ids = HashSet::new();
        let mut positions = HashSet::new();
        let mut sensors = HashSet::new();
        for node in &self.diverters {
            if !diverter_ids.insert(node.diverter_id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate diverter id: {}",
                    node.diverter_id
                )));
            }
            if !positions.insert(node.position_index) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate position index: {}",
                    node.position_index
                )));
            }
            if !sensors.insert(node.sensor_id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate sensor id: {}",
                    node.sensor_id
                )));
            }
            if !segment_ids.contains(&node.segment_id) {
                return Err(ConfigError::ValidationError(format!(
                    "diverter {}: unknown segment {}",
                    node.diverter_id, node.segment_id
                )));
            }
        }

        for sensor in &self.detection_sensor_ids {
            if sensors.contains(sensor) {
                return Err(ConfigError::ValidationError(format!(
                    "sensor {sensor} is both a detection sensor and a diverter sensor"
                )));
            }
        }

        let mut chute_ids = HashSet::new();
        let mut outlets = HashSet::new();
        let mut end_of_line = None;
        for chute in &self.chutes {
            if !chute_ids.insert(chute.chute_id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate chute id: {}",
                    chute.chute_id
                )));
            }
            match chute.diverter_id {
                Some(diverter_id) => {
                    if !diverter_ids.contains(&diverter_id) {
                        return Err(ConfigError::ValidationError(format!(
                            "chute {}: unknown diverter {}",
                            chute.chute_id, diverter_id
                        )));
                    }
                    if chute.direction == DiverterDirection::Straight {
                        return Err(ConfigError::ValidationError(format!(
                            "chute {}: a diverter chute needs direction left or right",
                            chute.chute_id
                        )));
                    }
                    if !outlets.insert((diverter_id, chute.direction)) {
                        return Err(ConfigError::ValidationError(format!(
                            "chute {}: diverter {} {} already has a chute",
                            chute.chute_id, diverter_id, chute.direction
                        )));
                    }
                }
                None => {
                    if chute.direction != DiverterDirection::Straight {
                        return Err(ConfigError::ValidationError(format!(
                            "chute {}: end-of-line chute must be straight",
                            chute.chute_id
                        )));
                    }
                    if let Some(existing) = end_of_line.replace(chute.chute_id) {
                        return Err(ConfigError::ValidationError(format!(
                            "chutes {existing} and {} are both end-of-line",
                            chute.chute_id
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// One diverter a parcel passes on its way to a chute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteStop {
    /// Diverter at this stop.
    pub diverter: DiverterNode,
    /// Segment feeding the stop.
    pub segment: ConveyorSegment,
    /// Direction required at this stop.
    pub direction: DiverterDirection,
}

/// Resolved route from the line entry to a chute.
#[derive(Debug, Clone, PartialEq)]
pub struct ChuteRoute {
    /// Destination chute.
    pub chute_id: ChuteId,
    /// Stops in line order.
    pub stops: Vec<RouteStop>,
}

/// Indexed, immutable view of one topology version.
#[derive(Debug, Clone)]
pub struct TopologySnapshot {
    version: u64,
    config: TopologyConfig,
    /// Diverters sorted by position.
    line: Vec<DiverterNode>,
    segments: HashMap<SegmentId, ConveyorSegment>,
    chutes: HashMap<ChuteId, ChuteConfig>,
    sensor_positions: HashMap<SensorId, PositionIndex>,
}

impl TopologySnapshot {
    /// Validate `config` and build the lookup indices.
    pub fn build(config: TopologyConfig, version: u64) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut line = config.diverters.clone();
        line.sort_by_key(|d| d.position_index);

        let segments = config.segments.iter().map(|s| (s.segment_id, *s)).collect();
        let chutes = config.chutes.iter().map(|c| (c.chute_id, *c)).collect();
        let sensor_positions = line.iter().map(|d| (d.sensor_id, d.position_index)).collect();

        Ok(Self {
            version,
            config,
            line,
            segments,
            chutes,
            sensor_positions,
        })
    }

    /// Snapshot version (monotonic per store).
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Source configuration.
    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// Diverters in line order.
    pub fn diverters(&self) -> &[DiverterNode] {
        &self.line
    }

    /// Chute by id, enabled or not.
    pub fn chute(&self, chute_id: ChuteId) -> Option<&ChuteConfig> {
        self.chutes.get(&chute_id)
    }

    /// Position whose sensor is `sensor_id`.
    pub fn position_for_sensor(&self, sensor_id: SensorId) -> Option<PositionIndex> {
        self.sensor_positions.get(&sensor_id).copied()
    }

    /// Position of `diverter_id`.
    pub fn position_of_diverter(&self, diverter_id: DiverterId) -> Option<PositionIndex> {
        self.line
            .iter()
            .find(|d| d.diverter_id == diverter_id)
            .map(|d| d.position_index)
    }

    /// Whether `sensor_id` announces new parcels.
    pub fn is_detection_sensor(&self, sensor_id: SensorId) -> bool {
        self.config.detection_sensor_ids.contains(&sensor_id)
    }

    /// Resolve the route to `chute_id`.
    ///
    /// Returns `None` for unknown or disabled chutes, and when a diverter on
    /// the way is disabled. Every diverter before
    /// the chute's diverter is passed straight; an end-of-line chute passes
    /// all diverters straight.
    pub fn get_by_chute_id(&self, chute_id: ChuteId) -> Option<ChuteRoute> {
        let chute = self.chutes.get(&chute_id).filter(|c| c.enabled)?;

        let target_position = match chute.diverter_id {
            Some(diverter_id) => Some(self.position_of_diverter(diverter_id)?),
            None => None,
        };

        let mut stops = Vec::with_capacity(self.line.len());
        for node in &self.line {
            if target_position.is_some_and(|target| node.position_index > target) {
                break;
            }
            if !node.enabled {
                return None;
            }
            let segment = *self.segments.get(&node.segment_id)?;
            let direction = if Some(node.position_index) == target_position {
                chute.direction
            } else {
                DiverterDirection::Straight
            };
            stops.push(RouteStop {
                diverter: *node,
                segment,
                direction,
            });
        }

        Some(ChuteRoute { chute_id, stops })
    }
}

/// Owner of the current topology snapshot.
///
/// Readers clone the `Arc` and keep a consistent view for as long as they
/// hold it; `reload` swaps in a new validated snapshot with a bumped version.
#[derive(Debug)]
pub struct TopologyStore {
    current: RwLock<Arc<TopologySnapshot>>,
}

impl TopologyStore {
    /// Create a store holding version 1 of `config`.
    pub fn new(config: TopologyConfig) -> Result<Self, ConfigError> {
        let snapshot = TopologySnapshot::build(config, 1)?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<TopologySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.current.read().version()
    }

    /// Validate and install a new topology. Returns the new version.
    ///
    /// On validation failure the current snapshot stays in place.
    pub fn reload(&self, config: TopologyConfig) -> Result<u64, ConfigError> {
        let mut guard = self.current.write();
        let version = guard.version() + 1;
        let snapshot = TopologySnapshot::build(config, version)?;
        info!(
            "Topology reloaded: version {} ({} diverters, {} chutes)",
            version,
            snapshot.line.len(),
            snapshot.chutes.len()
        );
        *guard = Arc::new(snapshot);
        Ok(version)
    }
}
