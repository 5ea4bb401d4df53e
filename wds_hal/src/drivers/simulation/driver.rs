//! Simulation driver implementation.
//!
//! The `SimulationDriver` implements the `DiverterDriver` trait with
//! software diverters (configurable latency, failing or stuck diverters)
//! and a sensor bus that tests and harnesses feed with `inject_trigger()`.

use super::config::SimulationConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use wds_common::consts::SENSOR_CHANNEL_CAPACITY;
use wds_common::driver::{DiverterDriver, DriverDiagnostics, DriverError};
use wds_common::topology::TopologySnapshot;
use wds_common::types::{DiverterDirection, DiverterId, SensorTriggerEvent};

/// One confirmed actuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActuationRecord {
    /// Diverter that moved.
    pub diverter_id: DiverterId,
    /// Direction it moved to.
    pub direction: DiverterDirection,
}

/// Simulation driver implementing the DiverterDriver trait.
pub struct SimulationDriver {
    /// Driver name
    name: &'static str,
    /// Driver version
    version: &'static str,
    /// Initialized flag
    initialized: AtomicBool,
    /// Confirmation latency [ms]
    latency_ms: AtomicU64,
    /// Diverters that reject actuations
    failing: Mutex<HashSet<DiverterId>>,
    /// Diverters that never confirm
    stuck: Mutex<HashSet<DiverterId>>,
    /// Current direction of every known diverter
    positions: Mutex<BTreeMap<DiverterId, DiverterDirection>>,
    /// Confirmed actuations in order
    log: Mutex<Vec<ActuationRecord>>,
    /// Sensor bus
    sensor_tx: broadcast::Sender<SensorTriggerEvent>,
    actuation_count: AtomicU64,
    actuation_failures: AtomicU64,
    sensor_events: AtomicU64,
}

impl SimulationDriver {
    /// Create a new simulation driver instance.
    pub fn new() -> Self {
        let (sensor_tx, _) = broadcast::channel(SENSOR_CHANNEL_CAPACITY);
        Self {
            name: "simulation",
            version: env!("CARGO_PKG_VERSION"),
            initialized: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            failing: Mutex::new(HashSet::new()),
            stuck: Mutex::new(HashSet::new()),
            positions: Mutex::new(BTreeMap::new()),
            log: Mutex::new(Vec::new()),
            sensor_tx,
            actuation_count: AtomicU64::new(0),
            actuation_failures: AtomicU64::new(0),
            sensor_events: AtomicU64::new(0),
        }
    }

    /// Create and initialize a driver in one step.
    pub fn with_topology(
        topology: &TopologySnapshot,
        config: SimulationConfig,
    ) -> Result<Self, DriverError> {
        let mut driver = Self::new();
        driver.init_with(topology, config)?;
        Ok(driver)
    }

    fn init_with(
        &mut self,
        topology: &TopologySnapshot,
        config: SimulationConfig,
    ) -> Result<(), DriverError> {
        let known: HashSet<DiverterId> =
            topology.diverters().iter().map(|d| d.diverter_id).collect();
        for id in config.failing_diverters.iter().chain(&config.stuck_diverters) {
            if !known.contains(id) {
                return Err(DriverError::ConfigError(format!(
                    "simulation: diverter {id} is not in the topology"
                )));
            }
        }

        *self.positions.lock() = known
            .iter()
            .map(|id| (*id, DiverterDirection::Straight))
            .collect();
        *self.failing.lock() = config.failing_diverters.iter().copied().collect();
        *self.stuck.lock() = config.stuck_diverters.iter().copied().collect();
        self.latency_ms
            .store(config.actuation_latency_ms, Ordering::Relaxed);
        self.initialized.store(true, Ordering::SeqCst);

        info!(
            "Simulation driver initialized: {} diverters, latency={}ms, failing={:?}, stuck={:?}",
            known.len(),
            config.actuation_latency_ms,
            config.failing_diverters,
            config.stuck_diverters
        );
        Ok(())
    }

    /// Publish a sensor trigger. Returns the number of subscribers reached.
    pub fn inject_trigger(&self, event: SensorTriggerEvent) -> usize {
        self.sensor_events.fetch_add(1, Ordering::Relaxed);
        match self.sensor_tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Sensor {} fired with no subscribers", event.sensor_id);
                0
            }
        }
    }

    /// Make `diverter_id` reject (`true`) or accept (`false`) actuations.
    pub fn set_failing(&self, diverter_id: DiverterId, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(diverter_id);
        } else {
            set.remove(&diverter_id);
        }
    }

    /// Make `diverter_id` never confirm (`true`) or behave normally (`false`).
    pub fn set_stuck(&self, diverter_id: DiverterId, stuck: bool) {
        let mut set = self.stuck.lock();
        if stuck {
            set.insert(diverter_id);
        } else {
            set.remove(&diverter_id);
        }
    }

    /// Change the confirmation latency.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Current direction of `diverter_id`.
    pub fn position(&self, diverter_id: DiverterId) -> Option<DiverterDirection> {
        self.positions.lock().get(&diverter_id).copied()
    }

    /// All confirmed actuations, oldest first.
    pub fn actuations(&self) -> Vec<ActuationRecord> {
        self.log.lock().clone()
    }
}

impl Default for SimulationDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiverterDriver for SimulationDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn version(&self) -> &'static str {
        self.version
    }

    fn init(
        &mut self,
        topology: &TopologySnapshot,
        driver_config: Option<&toml::Value>,
    ) -> Result<(), DriverError> {
        let config = SimulationConfig::from_value(driver_config)?;
        self.init_with(topology, config)
    }

    async fn actuate(
        &self,
        diverter_id: DiverterId,
        direction: DiverterDirection,
    ) -> Result<(), DriverError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(DriverError::InitFailed(
                "simulation driver not initialized".to_string(),
            ));
        }
        let known = self.positions.lock().contains_key(&diverter_id);
        let failing = self.failing.lock().contains(&diverter_id);
        let stuck = self.stuck.lock().contains(&diverter_id);

        if !known {
            self.actuation_failures.fetch_add(1, Ordering::Relaxed);
            return Err(DriverError::UnknownDiverter(diverter_id));
        }
        if failing {
            self.actuation_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Simulated diverter {} rejected {}", diverter_id, direction);
            return Err(DriverError::ActuationRejected {
                diverter_id,
                direction,
                reason: "simulated fault".to_string(),
            });
        }
        if stuck {
            debug!("Simulated diverter {} is stuck, never confirming", diverter_id);
            std::future::pending::<()>().await;
        }

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.positions.lock().insert(diverter_id, direction);
        self.log.lock().push(ActuationRecord {
            diverter_id,
            direction,
        });
        self.actuation_count.fetch_add(1, Ordering::Relaxed);
        debug!("Simulated diverter {} -> {}", diverter_id, direction);
        Ok(())
    }

    fn subscribe_sensors(&self) -> broadcast::Receiver<SensorTriggerEvent> {
        self.sensor_tx.subscribe()
    }

    fn shutdown(&self) -> Result<(), DriverError> {
        info!(
            "Shutting down simulation driver ({} actuations, {} failures)",
            self.actuation_count.load(Ordering::Relaxed),
            self.actuation_failures.load(Ordering::Relaxed)
        );
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn diagnostics(&self) -> Option<DriverDiagnostics> {
        let custom = serde_json::to_string(&*self.positions.lock()).ok();
        Some(DriverDiagnostics {
            actuation_count: self.actuation_count.load(Ordering::Relaxed),
            actuation_failures: self.actuation_failures.load(Ordering::Relaxed),
            sensor_events: self.sensor_events.load(Ordering::Relaxed),
            custom,
        })
    }
}
