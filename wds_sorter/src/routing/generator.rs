//! Switching path generator.
//!
//! Target chute → ordered diverter actuations, and parcel + detection time →
//! per-position queue tasks. Both are pure functions of one topology
//! snapshot: no state is written, so any number of callers may run
//! concurrently and equal inputs give structurally equal outputs.

use crate::clock::Clock;
use std::sync::Arc;
use tracing::{debug, warn};
use wds_common::topology::{ChuteRoute, TopologySnapshot, TopologyStore};
use wds_common::types::{
    ChuteId, DiverterPathSegment, ParcelId, QueueTask, SwitchingPath, Timestamp,
};

/// Path and queue tasks generated from the same topology version.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedRoute {
    /// Diverter actuations.
    pub path: SwitchingPath,
    /// Arrival expectations, one per position on the path.
    pub tasks: Vec<QueueTask>,
    /// Topology version both were derived from.
    pub topology_version: u64,
}

/// Generates switching paths and queue tasks from the current topology.
pub struct SwitchingPathGenerator {
    topology: Arc<TopologyStore>,
    clock: Arc<dyn Clock>,
    fallback_chute_id: ChuteId,
}

impl SwitchingPathGenerator {
    /// Create a generator whose paths fall back to `fallback_chute_id`.
    pub fn new(
        topology: Arc<TopologyStore>,
        clock: Arc<dyn Clock>,
        fallback_chute_id: ChuteId,
    ) -> Self {
        Self {
            topology,
            clock,
            fallback_chute_id,
        }
    }

    /// Exception chute used as every path's fallback.
    #[inline]
    pub fn fallback_chute_id(&self) -> ChuteId {
        self.fallback_chute_id
    }

    /// Current topology snapshot.
    pub fn topology(&self) -> Arc<TopologySnapshot> {
        self.topology.current()
    }

    /// Switching path to `target_chute_id`.
    ///
    /// Returns `None` for unknown or disabled chutes; retrying does not help
    /// until the topology is reloaded.
    pub fn generate_path(&self, target_chute_id: ChuteId) -> Option<SwitchingPath> {
        let snapshot = self.topology.current();
        let route = resolve(&snapshot, target_chute_id)?;
        Some(self.build_path(&route))
    }

    /// Queue tasks for `parcel_id` travelling to `target_chute_id`.
    ///
    /// `expected_arrival_time` at each position is `detection_time` plus the
    /// summed transit times of every segment up to that position. Returns an
    /// empty list exactly when [`generate_path`](Self::generate_path) returns `None`.
    pub fn generate_queue_tasks(
        &self,
        parcel_id: ParcelId,
        target_chute_id: ChuteId,
        detection_time: Timestamp,
    ) -> Vec<QueueTask> {
        let snapshot = self.topology.current();
        match resolve(&snapshot, target_chute_id) {
            Some(route) => self.build_tasks(&route, parcel_id, detection_time),
            None => Vec::new(),
        }
    }

    /// Path and tasks from one snapshot.
    pub fn generate(
        &self,
        parcel_id: ParcelId,
        target_chute_id: ChuteId,
        detection_time: Timestamp,
    ) -> Option<GeneratedRoute> {
        let snapshot = self.topology.current();
        let route = resolve(&snapshot, target_chute_id)?;
        Some(GeneratedRoute {
            path: self.build_path(&route),
            tasks: self.build_tasks(&route, parcel_id, detection_time),
            topology_version: snapshot.version(),
        })
    }

    fn build_path(&self, route: &ChuteRoute) -> SwitchingPath {
        let segments = route
            .stops
            .iter()
            .enumerate()
            .map(|(idx, stop)| DiverterPathSegment {
                diverter_id: stop.diverter.diverter_id,
                target_direction: stop.direction,
                sequence_number: idx as u32 + 1,
                ttl_milliseconds: stop.segment.timeout_threshold_ms(),
            })
            .collect();

        SwitchingPath {
            target_chute_id: route.chute_id,
            fallback_chute_id: self.fallback_chute_id,
            generated_at: self.clock.now(),
            segments,
        }
    }

    fn build_tasks(
        &self,
        route: &ChuteRoute,
        parcel_id: ParcelId,
        detection_time: Timestamp,
    ) -> Vec<QueueTask> {
        let created_at = self.clock.now();
        let mut elapsed = 0u64;

        route
            .stops
            .iter()
            .map(|stop| {
                let transit = stop.segment.transit_time_ms();
                let tolerance = stop.segment.time_tolerance_ms;
                elapsed += transit;
                let expected = detection_time + elapsed;
                QueueTask {
                    parcel_id,
                    position_index: stop.diverter.position_index,
                    diverter_id: stop.diverter.diverter_id,
                    target_direction: stop.direction,
                    created_at,
                    expected_arrival_time: expected,
                    earliest_dequeue_time: created_at.max(expected.saturating_sub(tolerance)),
                    transit_time_ms: transit,
                    tolerance_ms: tolerance,
                    timeout_threshold_ms: stop.segment.timeout_threshold_ms(),
                }
            })
            .collect()
    }
}

fn resolve(snapshot: &TopologySnapshot, chute_id: ChuteId) -> Option<ChuteRoute> {
    match snapshot.get_by_chute_id(chute_id) {
        Some(route) => {
            debug!(
                "Resolved chute {} over {} diverters (topology v{})",
                chute_id,
                route.stops.len(),
                snapshot.version()
            );
            Some(route)
        }
        None => {
            warn!(
                "No route to chute {} (unknown or disabled, topology v{})",
                chute_id,
                snapshot.version()
            );
            None
        }
    }
}
