//! Position-indexed queue manager.
//!
//! One FIFO of [`QueueTask`]s per diverter position, each behind its own
//! lock. Triggers at one position are matched strictly in arrival order;
//! different positions never contend.
//!
//! # Trigger Classification
//!
//! | Queue state | Trigger | Outcome |
//! |-------------|---------|---------|
//! | empty | any | `Interference` (queue untouched) |
//! | head matches | `< earliest` | `Early` |
//! | head matches | `> latest` | `Late` |
//! | head matches | otherwise | `OnTime` |
//! | head differs | any | head displaced, trigger re-evaluated (bounded) |
//!
//! A trigger with parcel id `0` (unidentified) always matches the head.
//!
//! Tasks whose window closed more than a grace period ago without a trigger
//! are removed by [`PositionQueueManager::expire_overdue`], so a parcel that
//! left the belt never absorbs another parcel's trigger.

use super::window::{classify, TimingClass};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wds_common::types::{ParcelId, PositionIndex, QueueTask, Timestamp, UNIDENTIFIED_PARCEL};

type PositionQueue = Arc<Mutex<VecDeque<QueueTask>>>;

/// Result of matching a trigger against the position queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Nothing queued: foreign or residual object.
    Interference,
    /// Matched inside the window.
    OnTime(QueueTask),
    /// Matched before the window opened.
    Early(QueueTask),
    /// Matched after the window closed.
    Late(QueueTask),
    /// Re-evaluation budget exhausted without a match.
    Unmatched,
}

impl TriggerOutcome {
    /// Matched task, if any.
    pub fn task(&self) -> Option<&QueueTask> {
        match self {
            Self::OnTime(t) | Self::Early(t) | Self::Late(t) => Some(t),
            Self::Interference | Self::Unmatched => None,
        }
    }

    /// Short label for logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Interference => "interference",
            Self::OnTime(_) => "on_time",
            Self::Early(_) => "early",
            Self::Late(_) => "late",
            Self::Unmatched => "unmatched",
        }
    }
}

/// Everything one trigger did to a position queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerReport {
    /// Position that fired.
    pub position_index: PositionIndex,
    /// Parcel id reported by the sensor.
    pub trigger_parcel_id: ParcelId,
    /// Trigger time.
    pub timestamp: Timestamp,
    /// Classification.
    pub outcome: TriggerOutcome,
    /// Heads removed because of sequence violations, in removal order.
    /// Their parcels must be routed to the fallback chute.
    pub displaced: Vec<QueueTask>,
}

impl TriggerReport {
    /// Whether any sequence violation was detected.
    pub fn is_sequence_violation(&self) -> bool {
        !self.displaced.is_empty() || self.outcome == TriggerOutcome::Unmatched
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriggerCounters {
    /// Triggers inside the window
    pub on_time: u64,
    /// Triggers before the window
    pub early: u64,
    /// Triggers after the window
    pub late: u64,
    /// Triggers on an empty queue
    pub interference: u64,
    /// Heads displaced by a mismatching trigger
    pub sequence_violations: u64,
    /// Triggers left unmatched after re-evaluation
    pub unmatched: u64,
    /// Tasks removed after their window closed without a trigger
    pub expired: u64,
}

#[derive(Debug, Default)]
struct TriggerStats {
    on_time: AtomicU64,
    early: AtomicU64,
    late: AtomicU64,
    interference: AtomicU64,
    sequence_violations: AtomicU64,
    unmatched: AtomicU64,
    expired: AtomicU64,
}

impl TriggerStats {
    fn record(&self, outcome: &TriggerOutcome, displaced: usize) {
        let counter = match outcome {
            TriggerOutcome::Interference => &self.interference,
            TriggerOutcome::OnTime(_) => &self.on_time,
            TriggerOutcome::Early(_) => &self.early,
            TriggerOutcome::Late(_) => &self.late,
            TriggerOutcome::Unmatched => &self.unmatched,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.sequence_violations
            .fetch_add(displaced as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TriggerCounters {
        TriggerCounters {
            on_time: self.on_time.load(Ordering::Relaxed),
            early: self.early.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            interference: self.interference.load(Ordering::Relaxed),
            sequence_violations: self.sequence_violations.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

/// Contents of one position queue at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionQueueSnapshot {
    /// Position.
    pub position_index: PositionIndex,
    /// Tasks, head first.
    pub tasks: Vec<QueueTask>,
}

/// Per-position FIFO queues of arrival expectations.
pub struct PositionQueueManager {
    queues: RwLock<HashMap<PositionIndex, PositionQueue>>,
    max_sequence_reevaluations: u32,
    stats: TriggerStats,
}

impl PositionQueueManager {
    /// Create a manager. A mismatching trigger is re-evaluated against the
    /// next head at most `max_sequence_reevaluations` times.
    pub fn new(max_sequence_reevaluations: u32) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            max_sequence_reevaluations,
            stats: TriggerStats::default(),
        }
    }

    /// Create empty queues for `positions` up front.
    pub fn with_positions(
        positions: impl IntoIterator<Item = PositionIndex>,
        max_sequence_reevaluations: u32,
    ) -> Self {
        let manager = Self::new(max_sequence_reevaluations);
        {
            let mut queues = manager.queues.write();
            for position in positions {
                queues.entry(position).or_default();
            }
        }
        manager
    }

    fn queue(&self, position: PositionIndex) -> Option<PositionQueue> {
        self.queues.read().get(&position).cloned()
    }

    fn queue_or_create(&self, position: PositionIndex) -> PositionQueue {
        if let Some(queue) = self.queue(position) {
            return queue;
        }
        Arc::clone(self.queues.write().entry(position).or_default())
    }

    fn all_queues(&self) -> Vec<(PositionIndex, PositionQueue)> {
        let mut queues: Vec<_> = self
            .queues
            .read()
            .iter()
            .map(|(pos, q)| (*pos, Arc::clone(q)))
            .collect();
        queues.sort_by_key(|(pos, _)| *pos);
        queues
    }

    /// Append `task` to its position queue.
    pub fn enqueue_task(&self, task: QueueTask) {
        let queue = self.queue_or_create(task.position_index);
        queue.lock().push_back(task);
        debug!(
            "Enqueued parcel {} at position {} (window {}..={})",
            task.parcel_id,
            task.position_index,
            task.earliest_dequeue_time,
            task.latest_dequeue_time()
        );
    }

    /// Head of the queue at `position`, without removing it.
    pub fn peek_task(&self, position: PositionIndex) -> Option<QueueTask> {
        self.queue(position)?.lock().front().copied()
    }

    /// Match a sensor trigger at `position` against the queue head.
    pub fn on_sensor_triggered(
        &self,
        position: PositionIndex,
        parcel_id: ParcelId,
        timestamp: Timestamp,
    ) -> TriggerReport {
        let mut displaced = Vec::new();
        let outcome = match self.queue(position) {
            None => TriggerOutcome::Interference,
            Some(queue) => {
                let mut queue = queue.lock();
                self.match_trigger(&mut queue, parcel_id, timestamp, &mut displaced)
            }
        };

        self.stats.record(&outcome, displaced.len());
        let report = TriggerReport {
            position_index: position,
            trigger_parcel_id: parcel_id,
            timestamp,
            outcome,
            displaced,
        };
        log_report(&report);
        report
    }

    fn match_trigger(
        &self,
        queue: &mut VecDeque<QueueTask>,
        parcel_id: ParcelId,
        timestamp: Timestamp,
        displaced: &mut Vec<QueueTask>,
    ) -> TriggerOutcome {
        if queue.is_empty() {
            return TriggerOutcome::Interference;
        }

        let mut reevaluations = 0u32;
        while let Some(head) = queue.front().copied() {
            if parcel_id == UNIDENTIFIED_PARCEL || head.parcel_id == parcel_id {
                queue.pop_front();
                return match classify(&head, timestamp) {
                    TimingClass::OnTime => TriggerOutcome::OnTime(head),
                    TimingClass::Early => TriggerOutcome::Early(head),
                    TimingClass::Late => TriggerOutcome::Late(head),
                };
            }

            if reevaluations >= self.max_sequence_reevaluations {
                break;
            }
            queue.pop_front();
            displaced.push(head);
            reevaluations += 1;
        }
        TriggerOutcome::Unmatched
    }

    /// Remove every task whose window closed more than `grace_ms` before
    /// `now`. Returns the removed tasks ordered by position.
    pub fn expire_overdue(&self, now: Timestamp, grace_ms: u64) -> Vec<QueueTask> {
        let mut expired = Vec::new();
        for (_, queue) in self.all_queues() {
            queue.lock().retain(|t| {
                if now > t.latest_dequeue_time().saturating_add(grace_ms) {
                    expired.push(*t);
                    false
                } else {
                    true
                }
            });
        }

        for task in &expired {
            warn!(
                "Parcel {} never reached position {}: window closed at {}ms, now {}ms",
                task.parcel_id,
                task.position_index,
                task.latest_dequeue_time(),
                now
            );
        }
        self.stats
            .expired
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired
    }

    /// Swap the tasks of `parcel_id` for `tasks`.
    ///
    /// Positions present in both keep their place in the FIFO. Positions only
    /// in `tasks` are inserted ahead of the first task expected later.
    /// Positions no longer on the path are dropped. Returns the number of
    /// tasks now queued for the parcel.
    pub fn replace_parcel_tasks(&self, parcel_id: ParcelId, tasks: &[QueueTask]) -> usize {
        let mut replacements: HashMap<PositionIndex, QueueTask> = tasks
            .iter()
            .filter(|t| t.parcel_id == parcel_id)
            .map(|t| (t.position_index, *t))
            .collect();
        let mut queued = 0;

        for (position, queue) in self.all_queues() {
            let mut queue = queue.lock();
            match replacements.remove(&position) {
                Some(task) => {
                    if let Some(slot) = queue.iter_mut().find(|t| t.parcel_id == parcel_id) {
                        *slot = task;
                    } else {
                        insert_by_arrival(&mut queue, task);
                    }
                    queued += 1;
                }
                None => queue.retain(|t| t.parcel_id != parcel_id),
            }
        }

        for task in replacements.into_values() {
            let queue = self.queue_or_create(task.position_index);
            insert_by_arrival(&mut queue.lock(), task);
            queued += 1;
        }

        debug!("Replaced tasks of parcel {}: {} queued", parcel_id, queued);
        queued
    }

    /// Drop every queued task of `parcel_id`. Returns the removed tasks.
    pub fn remove_parcel_tasks(&self, parcel_id: ParcelId) -> Vec<QueueTask> {
        let mut removed = Vec::new();
        for (_, queue) in self.all_queues() {
            let mut queue = queue.lock();
            queue.retain(|t| {
                if t.parcel_id == parcel_id {
                    removed.push(*t);
                    false
                } else {
                    true
                }
            });
        }
        if !removed.is_empty() {
            debug!("Removed {} tasks of parcel {}", removed.len(), parcel_id);
        }
        removed
    }

    /// Drop tasks of `parcel_id` at `position` and every position before it.
    /// A parcel seen at `position` is no longer expected upstream of it.
    pub fn remove_parcel_tasks_through(&self, parcel_id: ParcelId, position: PositionIndex) -> usize {
        let mut removed = 0;
        for (pos, queue) in self.all_queues() {
            if pos > position {
                break;
            }
            let mut queue = queue.lock();
            let before = queue.len();
            queue.retain(|t| t.parcel_id != parcel_id);
            removed += before - queue.len();
        }
        if removed > 0 {
            debug!(
                "Dropped {} stale tasks of parcel {} up to position {}",
                removed, parcel_id, position
            );
        }
        removed
    }

    /// Whether any task of `parcel_id` is still queued.
    pub fn has_tasks_for(&self, parcel_id: ParcelId) -> bool {
        self.all_queues()
            .iter()
            .any(|(_, q)| q.lock().iter().any(|t| t.parcel_id == parcel_id))
    }

    /// Number of tasks at `position`.
    pub fn queue_len(&self, position: PositionIndex) -> usize {
        self.queue(position).map_or(0, |q| q.lock().len())
    }

    /// Number of tasks across all positions.
    pub fn total_len(&self) -> usize {
        self.all_queues().iter().map(|(_, q)| q.lock().len()).sum()
    }

    /// Per-position contents, ordered by position.
    pub fn snapshot(&self) -> Vec<PositionQueueSnapshot> {
        self.all_queues()
            .into_iter()
            .map(|(position_index, q)| PositionQueueSnapshot {
                position_index,
                tasks: q.lock().iter().copied().collect(),
            })
            .collect()
    }

    /// Trigger counters.
    pub fn stats(&self) -> TriggerCounters {
        self.stats.snapshot()
    }
}

fn insert_by_arrival(queue: &mut VecDeque<QueueTask>, task: QueueTask) {
    let at = queue
        .iter()
        .position(|t| t.expected_arrival_time > task.expected_arrival_time)
        .unwrap_or(queue.len());
    queue.insert(at, task);
}

fn log_report(report: &TriggerReport) {
    for task in &report.displaced {
        warn!(
            "Sequence violation at position {}: trigger for parcel {} displaced parcel {}",
            report.position_index, report.trigger_parcel_id, task.parcel_id
        );
    }

    match &report.outcome {
        TriggerOutcome::Interference => warn!(
            "Interference at position {}: trigger (parcel {}) at {} with empty queue",
            report.position_index, report.trigger_parcel_id, report.timestamp
        ),
        TriggerOutcome::OnTime(task) => debug!(
            "Parcel {} on time at position {} ({}ms vs expected {}ms)",
            task.parcel_id, report.position_index, report.timestamp, task.expected_arrival_time
        ),
        TriggerOutcome::Early(task) => info!(
            "Parcel {} early at position {}: {}ms < earliest {}ms",
            task.parcel_id, report.position_index, report.timestamp, task.earliest_dequeue_time
        ),
        TriggerOutcome::Late(task) => warn!(
            "Parcel {} late at position {}: {}ms > latest {}ms",
            task.parcel_id,
            report.position_index,
            report.timestamp,
            task.latest_dequeue_time()
        ),
        TriggerOutcome::Unmatched => warn!(
            "Trigger for parcel {} at position {} unmatched after re-evaluation",
            report.trigger_parcel_id, report.position_index
        ),
    }
}
