//! Shared fixtures for the service-level tests.

mod concurrency;
mod end_to_end;
mod late_assignment;
mod sensors;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use wds_common::config::EngineConfig;
use wds_common::topology::{TopologyConfig, TopologyStore};
use wds_common::types::{ParcelId, PathExecutionResult, SensorId};
use wds_hal::SimulationDriver;
use wds_hal::drivers::simulation::SimulationConfig;
use wds_sorter::plan::InMemoryRoutePlanRepository;
use wds_sorter::upstream::LoopbackUpstream;
use wds_sorter::{Clock, SortingEvent, SortingService, TokioClock};

pub const DETECTION_SENSOR: SensorId = 100;
pub const EXCEPTION_CHUTE: u32 = 999;
pub const ASSIGNMENT_TIMEOUT_MS: u64 = 10_000;

/// Three diverters at 6000 / 9000 / 12000 mm, belt at 1300 mm/s.
///
/// Position 1 window for a parcel detected at 0: [3915, 5315], expected 4615.
pub const LINE: &str = r#"
detection_sensor_ids = [100]

[[segments]]
segment_id = 1
length_mm = 6000.0
speed_mmps = 1300.0
time_tolerance_ms = 700

[[segments]]
segment_id = 2
length_mm = 3000.0
speed_mmps = 1300.0
time_tolerance_ms = 400

[[segments]]
segment_id = 3
length_mm = 3000.0
speed_mmps = 1300.0
time_tolerance_ms = 400

[[diverters]]
diverter_id = 1
position_index = 1
segment_id = 1
sensor_id = 101

[[diverters]]
diverter_id = 2
position_index = 2
segment_id = 2
sensor_id = 102

[[diverters]]
diverter_id = 3
position_index = 3
segment_id = 3
sensor_id = 103

[[chutes]]
chute_id = 1
diverter_id = 1
direction = "left"

[[chutes]]
chute_id = 2
diverter_id = 1
direction = "right"

[[chutes]]
chute_id = 3
diverter_id = 2
direction = "left"

[[chutes]]
chute_id = 4
diverter_id = 3
direction = "right"

[[chutes]]
chute_id = 999
"#;

pub fn line() -> TopologyConfig {
    TopologyConfig::from_toml(LINE).unwrap()
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        assignment_timeout_ms: ASSIGNMENT_TIMEOUT_MS,
        ..EngineConfig::with_exception_chute(EXCEPTION_CHUTE)
    }
}

/// Service wired to a simulated line and a loopback upstream.
pub struct Harness {
    pub service: Arc<SortingService>,
    pub driver: Arc<SimulationDriver>,
    pub upstream: Arc<LoopbackUpstream>,
    pub repository: Arc<InMemoryRoutePlanRepository>,
    pub topology: Arc<TopologyStore>,
}

impl Harness {
    /// Must be called inside the test runtime so the clock follows it.
    pub fn new() -> Self {
        Self::with(engine_config(), LoopbackUpstream::new(), Arc::new(TokioClock::new()))
    }

    pub fn with(config: EngineConfig, upstream: LoopbackUpstream, clock: Arc<dyn Clock>) -> Self {
        let topology = Arc::new(TopologyStore::new(line()).unwrap());
        let driver = Arc::new(
            SimulationDriver::with_topology(&topology.current(), SimulationConfig::default())
                .unwrap(),
        );
        let upstream = Arc::new(upstream);
        let repository = Arc::new(InMemoryRoutePlanRepository::new());

        let service = Arc::new(SortingService::new(
            config,
            Arc::clone(&topology),
            driver.clone(),
            upstream.clone(),
            repository.clone(),
            clock,
        ));

        Self {
            service,
            driver,
            upstream,
            repository,
            topology,
        }
    }

    /// Start the flow of a parcel detected now.
    pub fn detect(&self, parcel_id: ParcelId) -> JoinHandle<PathExecutionResult> {
        let service = Arc::clone(&self.service);
        tokio::spawn(async move { service.process_parcel(parcel_id, DETECTION_SENSOR).await })
    }
}

/// Let spawned tasks run up to their next timer without moving the clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Sleep on the paused clock until `ms` after the test started.
pub async fn advance_to(start: tokio::time::Instant, ms: u64) {
    tokio::time::sleep_until(start + Duration::from_millis(ms)).await;
}

/// Next event matching `pred`, within a bounded wait.
pub async fn next_event<F>(rx: &mut broadcast::Receiver<SortingEvent>, mut pred: F) -> SortingEvent
where
    F: FnMut(&SortingEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not published")
}
