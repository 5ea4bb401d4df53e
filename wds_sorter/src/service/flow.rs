//! Per-parcel flow bookkeeping and in-flight tracking.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use wds_common::types::{DiverterDirection, PositionIndex, QueueTask, Timestamp};

/// What the engine knows about a parcel on the conveyor.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParcelFlow {
    pub detected_at: Timestamp,
    /// Direction planned at each position of the committed route.
    pub directions: HashMap<PositionIndex, DiverterDirection>,
    /// Positions whose sensor matched this parcel.
    pub passed: BTreeSet<PositionIndex>,
    /// Sent to the exception chute after a timing fault.
    pub rerouted: bool,
    /// Finalized path has been executed.
    pub executed: bool,
}

impl ParcelFlow {
    pub fn new(detected_at: Timestamp, tasks: &[QueueTask]) -> Self {
        let mut flow = Self {
            detected_at,
            ..Self::default()
        };
        flow.commit(tasks);
        flow
    }

    /// Record the directions of a newly committed route.
    pub fn commit(&mut self, tasks: &[QueueTask]) {
        self.directions = tasks
            .iter()
            .map(|t| (t.position_index, t.target_direction))
            .collect();
    }

    /// First passed position where `tasks` needs a different direction than
    /// the parcel took, or which `tasks` does not reach at all.
    pub fn conflict_with(&self, tasks: &[QueueTask]) -> Option<PositionIndex> {
        self.passed.iter().copied().find(|pos| {
            let needed = tasks
                .iter()
                .find(|t| t.position_index == *pos)
                .map(|t| t.target_direction);
            let taken = self.directions.get(pos).copied().unwrap_or_default();
            needed != Some(taken)
        })
    }
}

/// Counts parcel flows in progress so a stop can wait for them.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { owner: self }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolve once no flow is in progress.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            idle.await;
        }
    }
}

pub(crate) struct InFlightGuard<'a> {
    owner: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.owner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.owner.idle.notify_waiters();
        }
    }
}
