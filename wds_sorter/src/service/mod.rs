//! Sorting orchestrator.
//!
//! Composes the generator, queue manager, plan store and executor into one
//! flow per parcel:
//!
//! 1. Detection → route plan (before anything else references the parcel)
//! 2. Provisional queue tasks toward the exception chute
//! 3. "Parcel detected" sent upstream
//! 4. Wait for a terminal plan (assignment, deadline, or exception)
//! 5. Replan to the assigned chute if the parcel can still get there
//! 6. Execute the finalized path, report completion upstream
//!
//! Sensor triggers at diverter positions are matched independently by the
//! queue manager; late or displaced parcels are rerouted to the exception
//! chute on the spot. Parcels that never reach a position expire from the
//! queues once their window has closed and are rerouted the same way.

pub mod events;
mod flow;

pub use events::SortingEvent;

use crate::clock::Clock;
use crate::error::SorterError;
use crate::plan::{
    AssignmentOutcome, ChangeChuteCommand, ExceptionReason, RoutePlan, RoutePlanRepository,
    RoutePlanState, RoutePlanStore,
};
use crate::queue::{PositionQueueManager, PositionQueueSnapshot, TriggerCounters, TriggerOutcome, TriggerReport};
use crate::routing::{SwitchingPathExecutor, SwitchingPathGenerator};
use crate::upstream::{ChuteAssignment, UpstreamMessage, UpstreamRoutingClient};
use flow::{InFlight, ParcelFlow};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use wds_common::config::EngineConfig;
use wds_common::driver::DiverterDriver;
use wds_common::topology::{TopologyConfig, TopologyStore};
use wds_common::types::{
    ChuteId, DiverterDirection, ParcelId, PathExecutionResult, PositionIndex, SensorId,
    SensorTriggerEvent, SwitchingPath, Timestamp, UNIDENTIFIED_PARCEL,
};

// ─── Statistics ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FlowStats {
    detected: AtomicU64,
    sorted_to_target: AtomicU64,
    sorted_to_exception: AtomicU64,
    execution_failures: AtomicU64,
    rerouted: AtomicU64,
}

/// Service counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceCounters {
    /// Parcels accepted at detection
    pub detected: u64,
    /// Parcels sorted to their assigned chute
    pub sorted_to_target: u64,
    /// Parcels sorted to the exception chute
    pub sorted_to_exception: u64,
    /// Executions reporting failure
    pub execution_failures: u64,
    /// Parcels rerouted after a timing fault
    pub rerouted: u64,
    /// Route plan invariant violations
    pub invariant_violations: u64,
    /// Parcel flows in progress
    pub in_flight: usize,
    /// Sensor trigger classification
    pub triggers: TriggerCounters,
}

// ─── Service ────────────────────────────────────────────────────────

/// Real-time sorting service.
pub struct SortingService {
    config: EngineConfig,
    topology: Arc<TopologyStore>,
    clock: Arc<dyn Clock>,
    generator: SwitchingPathGenerator,
    queues: PositionQueueManager,
    plans: RoutePlanStore,
    executor: SwitchingPathExecutor,
    driver: Arc<dyn DiverterDriver>,
    upstream: Arc<dyn UpstreamRoutingClient>,
    events: broadcast::Sender<SortingEvent>,
    flows: Mutex<HashMap<ParcelId, ParcelFlow>>,
    in_flight: InFlight,
    stopping: AtomicBool,
    stop_tx: watch::Sender<bool>,
    stats: FlowStats,
}

impl SortingService {
    /// Compose a service.
    ///
    /// `config` is expected to be validated against `topology` already
    /// (exception chute present and enabled).
    pub fn new(
        config: EngineConfig,
        topology: Arc<TopologyStore>,
        driver: Arc<dyn DiverterDriver>,
        upstream: Arc<dyn UpstreamRoutingClient>,
        repository: Arc<dyn RoutePlanRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let positions: Vec<PositionIndex> = topology
            .current()
            .diverters()
            .iter()
            .map(|d| d.position_index)
            .collect();
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (stop_tx, _) = watch::channel(false);

        info!(
            "Sorting service: {} positions, exception chute {}, assignment timeout {}ms",
            positions.len(),
            config.exception_chute_id,
            config.assignment_timeout_ms
        );

        Self {
            generator: SwitchingPathGenerator::new(
                Arc::clone(&topology),
                Arc::clone(&clock),
                config.exception_chute_id,
            ),
            queues: PositionQueueManager::with_positions(positions, config.max_sequence_reevaluations),
            plans: RoutePlanStore::new(repository),
            executor: SwitchingPathExecutor::new(Arc::clone(&driver)),
            config,
            topology,
            clock,
            driver,
            upstream,
            events,
            flows: Mutex::new(HashMap::new()),
            in_flight: InFlight::default(),
            stopping: AtomicBool::new(false),
            stop_tx,
            stats: FlowStats::default(),
        }
    }

    /// Subscribe to sorting events.
    pub fn subscribe(&self) -> broadcast::Receiver<SortingEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SortingEvent) {
        let _ = self.events.send(event);
    }

    /// Exception chute.
    pub fn exception_chute_id(&self) -> ChuteId {
        self.config.exception_chute_id
    }

    // ─── Parcel flow ────────────────────────────────────────────────

    /// Sort one parcel detected at `sensor_id`, end to end.
    ///
    /// Never fails: every physical or upstream problem resolves to the
    /// exception chute and shows in the returned result.
    pub async fn process_parcel(&self, parcel_id: ParcelId, sensor_id: SensorId) -> PathExecutionResult {
        let _flight = self.in_flight.enter();
        let fallback = self.config.exception_chute_id;
        let detected_at = self.clock.now();

        if !self.topology.current().is_detection_sensor(sensor_id) {
            warn!("Parcel {} detected at non-detection sensor {}", parcel_id, sensor_id);
        }

        let deadline = detected_at + self.config.assignment_timeout_ms;
        if let Err(e) = self
            .plans
            .create_route_plan(parcel_id, fallback, detected_at, Some(deadline))
        {
            self.publish(SortingEvent::InvariantViolation {
                parcel_id,
                detail: e.to_string(),
            });
            return PathExecutionResult::failure(fallback, e.to_string());
        }
        self.stats.detected.fetch_add(1, Ordering::Relaxed);
        self.publish(SortingEvent::ParcelDetected {
            parcel_id,
            sensor_id,
            at: detected_at,
        });

        self.begin_flow(parcel_id, detected_at);

        if self.stopping.load(Ordering::SeqCst) {
            self.resolve_exception(parcel_id, ExceptionReason::ShutdownRequested);
        } else {
            self.notify_detected(parcel_id, detected_at).await;
        }

        let plan = self.await_terminal(parcel_id, deadline).await;
        let result = self.finish(parcel_id, plan.as_ref()).await;

        self.report_completion(parcel_id, &result).await;
        if let Some(flow) = self.flows.lock().get_mut(&parcel_id) {
            flow.executed = true;
        }
        self.try_archive(parcel_id);
        result
    }

    fn begin_flow(&self, parcel_id: ParcelId, detected_at: Timestamp) {
        let fallback = self.config.exception_chute_id;
        let tasks = match self.generator.generate(parcel_id, fallback, detected_at) {
            Some(route) => route.tasks,
            None => {
                error!(
                    "Exception chute {} has no route; parcel {} is untracked",
                    fallback, parcel_id
                );
                Vec::new()
            }
        };

        let mut flows = self.flows.lock();
        for task in &tasks {
            self.queues.enqueue_task(*task);
        }
        flows.insert(parcel_id, ParcelFlow::new(detected_at, &tasks));
    }

    async fn notify_detected(&self, parcel_id: ParcelId, detected_at: Timestamp) {
        if !self.upstream.is_connected() {
            self.resolve_exception(parcel_id, ExceptionReason::UpstreamDisconnected);
            return;
        }
        let message = UpstreamMessage::ParcelDetected {
            parcel_id,
            detected_at,
        };
        if let Err(e) = self.upstream.send(message).await {
            self.resolve_exception(parcel_id, ExceptionReason::UpstreamSendFailed(e.to_string()));
        }
    }

    fn resolve_exception(&self, parcel_id: ParcelId, reason: ExceptionReason) {
        if let Err(e) = self.plans.mark_exception(parcel_id, reason, self.clock.now()) {
            error!("Parcel {}: cannot exception-route plan: {}", parcel_id, e);
        }
    }

    /// Wait until the plan is terminal, expiring it at the deadline.
    async fn await_terminal(&self, parcel_id: ParcelId, deadline: Timestamp) -> Option<RoutePlan> {
        let Some(mut rx) = self.plans.subscribe(parcel_id) else {
            return self.plans.get(parcel_id);
        };

        loop {
            let plan = rx.borrow_and_update().clone();
            if plan.is_terminal() {
                return Some(plan);
            }

            let remaining = deadline.saturating_sub(self.clock.now());
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return self.plans.get(parcel_id);
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(remaining)) => {
                    if let Err(e) = self.plans.expire_if_due(parcel_id, self.clock.now()) {
                        error!("Parcel {}: deadline expiry failed: {}", parcel_id, e);
                        return self.plans.get(parcel_id);
                    }
                }
            }
        }
    }

    /// Commit the route for a terminal plan and execute what is left of it.
    async fn finish(&self, parcel_id: ParcelId, plan: Option<&RoutePlan>) -> PathExecutionResult {
        let fallback = self.config.exception_chute_id;

        let (chute, reason) = match plan {
            Some(plan) if plan.state == RoutePlanState::Completed => {
                let target = plan.effective_chute_id.unwrap_or(fallback);
                if target == fallback {
                    (fallback, None)
                } else {
                    match self.replan(parcel_id, target) {
                        Ok(()) => (target, None),
                        Err(reason) => {
                            warn!(
                                "Parcel {}: cannot route to chute {}: {}",
                                parcel_id, target, reason
                            );
                            (fallback, Some(reason))
                        }
                    }
                }
            }
            Some(plan) if plan.state == RoutePlanState::ExceptionRouted => (fallback, None),
            _ => (fallback, Some("route plan did not resolve".to_string())),
        };

        let rerouted = self
            .flows
            .lock()
            .get(&parcel_id)
            .is_some_and(|flow| flow.rerouted);

        let executed = match self.generator.generate_path(chute) {
            // The reroute already dispatched the exception path.
            Some(_) if rerouted => {
                debug!("Parcel {}: exception route already dispatched", parcel_id);
                PathExecutionResult::success(fallback)
            }
            Some(path) => {
                let path = self.remaining_path(parcel_id, path);
                if path.segments.is_empty() {
                    PathExecutionResult::success(path.target_chute_id)
                } else {
                    self.executor.execute(&path).await
                }
            }
            None => PathExecutionResult::failure(fallback, format!("no route to chute {chute}")),
        };

        let result = match reason {
            Some(reason) => PathExecutionResult::failure(fallback, reason),
            None => executed,
        };

        if !result.is_success {
            self.stats.execution_failures.fetch_add(1, Ordering::Relaxed);
        }
        if result.actual_chute_id == fallback {
            self.stats.sorted_to_exception.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.sorted_to_target.fetch_add(1, Ordering::Relaxed);
        }

        self.publish(SortingEvent::Sorted {
            parcel_id,
            plan_state: plan.map_or(RoutePlanState::Created, |p| p.state),
            result: result.clone(),
        });
        result
    }

    /// Swap the provisional tasks for the route to `target`.
    ///
    /// Fails when the parcel was rerouted, or already passed a diverter in a
    /// direction the new route cannot use.
    fn replan(&self, parcel_id: ParcelId, target: ChuteId) -> Result<(), String> {
        let mut flows = self.flows.lock();
        let Some(flow) = flows.get_mut(&parcel_id) else {
            return Err("parcel is no longer tracked".to_string());
        };
        if flow.rerouted {
            return Err("parcel was rerouted after a timing fault".to_string());
        }

        let Some(route) = self.generator.generate(parcel_id, target, flow.detected_at) else {
            return Err(format!("chute {target} is unknown or disabled"));
        };
        if let Some(position) = flow.conflict_with(&route.tasks) {
            return Err(format!("parcel already passed position {position}"));
        }

        let pending: Vec<_> = route
            .tasks
            .iter()
            .filter(|t| !flow.passed.contains(&t.position_index))
            .copied()
            .collect();
        self.queues.replace_parcel_tasks(parcel_id, &pending);
        flow.commit(&route.tasks);
        debug!(
            "Parcel {} replanned to chute {} ({} positions pending)",
            parcel_id,
            target,
            pending.len()
        );
        Ok(())
    }

    /// Drop segments at positions the parcel has already passed.
    fn remaining_path(&self, parcel_id: ParcelId, mut path: SwitchingPath) -> SwitchingPath {
        let passed = match self.flows.lock().get(&parcel_id) {
            Some(flow) => flow.passed.clone(),
            None => return path,
        };
        if passed.is_empty() {
            return path;
        }
        let snapshot = self.topology.current();
        path.segments.retain(|s| {
            snapshot
                .position_of_diverter(s.diverter_id)
                .is_none_or(|pos| !passed.contains(&pos))
        });
        path
    }

    async fn report_completion(&self, parcel_id: ParcelId, result: &PathExecutionResult) {
        if !self.upstream.is_connected() {
            debug!("Upstream disconnected, completion of parcel {} not reported", parcel_id);
            return;
        }
        let message = UpstreamMessage::SortingCompleted {
            parcel_id,
            actual_chute_id: result.actual_chute_id,
            is_success: result.is_success,
            completed_at: self.clock.now(),
        };
        if let Err(e) = self.upstream.send(message).await {
            warn!("Parcel {}: completion not reported: {}", parcel_id, e);
        }
    }

    fn try_archive(&self, parcel_id: ParcelId) {
        let executed = self
            .flows
            .lock()
            .get(&parcel_id)
            .is_some_and(|flow| flow.executed);
        if !executed || self.queues.has_tasks_for(parcel_id) {
            return;
        }
        match self.plans.archive(parcel_id) {
            Ok(_) => {
                self.flows.lock().remove(&parcel_id);
            }
            Err(e) => debug!("Parcel {} not archived: {}", parcel_id, e),
        }
    }

    // ─── Assignments ────────────────────────────────────────────────

    /// Apply a rule engine assignment received now.
    pub fn handle_assignment(&self, assignment: ChuteAssignment) -> Option<AssignmentOutcome> {
        let at = self.clock.now();
        match self
            .plans
            .apply_upstream_assignment(assignment.parcel_id, assignment.chute_id, at)
        {
            Ok(outcome) => {
                self.publish(SortingEvent::AssignmentApplied {
                    parcel_id: assignment.parcel_id,
                    chute_id: assignment.chute_id,
                    outcome,
                    at,
                });
                Some(outcome)
            }
            Err(e) => {
                self.publish(SortingEvent::InvariantViolation {
                    parcel_id: assignment.parcel_id,
                    detail: e.to_string(),
                });
                None
            }
        }
    }

    /// Operator override of a parcel's chute.
    ///
    /// # Errors
    /// `UnknownChute` if the chute cannot be routed to, `Plan` if the parcel
    /// has no route plan.
    pub fn change_parcel_chute(&self, command: ChangeChuteCommand) -> Result<AssignmentOutcome, SorterError> {
        if self.generator.generate_path(command.chute_id).is_none() {
            return Err(SorterError::UnknownChute {
                chute_id: command.chute_id,
            });
        }

        let outcome = self.plans.change_chute(&command).inspect_err(|e| {
            self.publish(SortingEvent::InvariantViolation {
                parcel_id: command.parcel_id,
                detail: e.to_string(),
            });
        })?;
        self.publish(SortingEvent::AssignmentApplied {
            parcel_id: command.parcel_id,
            chute_id: command.chute_id,
            outcome,
            at: command.requested_at,
        });
        Ok(outcome)
    }

    // ─── Sensors ────────────────────────────────────────────────────

    /// Match a diverter-position trigger and react to its classification.
    ///
    /// Returns `None` for detection sensors and sensors not in the topology.
    /// Reroutes spawn their actuation, so this must run inside a tokio runtime.
    pub fn handle_sensor_event(&self, event: SensorTriggerEvent) -> Option<TriggerReport> {
        let snapshot = self.topology.current();
        if snapshot.is_detection_sensor(event.sensor_id) {
            return None;
        }
        let Some(position) = snapshot.position_for_sensor(event.sensor_id) else {
            warn!("Trigger from unknown sensor {} ignored", event.sensor_id);
            return None;
        };

        self.expire_overdue_tasks();

        // Passage is recorded under the flows lock taken before the match, so
        // a concurrent replan sees either the queued task or the passage.
        let report = {
            let mut flows = self.flows.lock();
            let report = self
                .queues
                .on_sensor_triggered(position, event.parcel_id, event.timestamp);
            if let Some(task) = report.outcome.task() {
                self.record_passage(&mut flows, task.parcel_id, position, task.target_direction);
            }
            report
        };
        self.publish(SortingEvent::from_report(&report));

        if let Some(task) = report.outcome.task() {
            if matches!(report.outcome, TriggerOutcome::Late(_)) {
                self.reroute(
                    task.parcel_id,
                    position,
                    format!("late at position {position}"),
                );
            }
            self.try_archive(task.parcel_id);
        }
        for displaced in &report.displaced {
            self.reroute(
                displaced.parcel_id,
                position,
                format!("sequence violation at position {position}"),
            );
            self.try_archive(displaced.parcel_id);
        }

        Some(report)
    }

    fn record_passage(
        &self,
        flows: &mut HashMap<ParcelId, ParcelFlow>,
        parcel_id: ParcelId,
        position: PositionIndex,
        direction: DiverterDirection,
    ) {
        if let Some(flow) = flows.get_mut(&parcel_id) {
            flow.passed.insert(position);
            flow.directions.insert(position, direction);
        }
        self.queues.remove_parcel_tasks_through(parcel_id, position);
    }

    /// Drop queue tasks whose window closed more than the configured grace
    /// ago and reroute their parcels. Returns the number of expired tasks.
    pub fn expire_overdue_tasks(&self) -> usize {
        let expired = self
            .queues
            .expire_overdue(self.clock.now(), self.config.task_expiry_grace_ms);
        if expired.is_empty() {
            return 0;
        }

        let mut seen = HashSet::new();
        for task in &expired {
            if !seen.insert(task.parcel_id) {
                continue;
            }
            self.reroute(
                task.parcel_id,
                task.position_index,
                format!("missed window at position {}", task.position_index),
            );
            self.try_archive(task.parcel_id);
        }
        expired.len()
    }

    /// Send a parcel to the exception chute from `position` on.
    fn reroute(&self, parcel_id: ParcelId, position: PositionIndex, reason: String) {
        {
            let mut flows = self.flows.lock();
            self.queues.remove_parcel_tasks(parcel_id);
            if let Some(flow) = flows.get_mut(&parcel_id) {
                flow.rerouted = true;
            }
        }
        self.stats.rerouted.fetch_add(1, Ordering::Relaxed);

        match self.plans.mark_exception(
            parcel_id,
            ExceptionReason::TimingViolation(reason.clone()),
            self.clock.now(),
        ) {
            Ok(_) => {}
            Err(e) => debug!("Parcel {}: no plan to exception-route: {}", parcel_id, e),
        }

        warn!(
            "Parcel {} rerouted to exception chute {}: {}",
            parcel_id, self.config.exception_chute_id, reason
        );
        self.publish(SortingEvent::Rerouted {
            parcel_id,
            position_index: position,
            reason,
        });

        let Some(mut path) = self.generator.generate_path(self.config.exception_chute_id) else {
            return;
        };
        let snapshot = self.topology.current();
        path.segments.retain(|s| {
            snapshot
                .position_of_diverter(s.diverter_id)
                .is_some_and(|pos| pos > position)
        });
        if path.segments.is_empty() {
            return;
        }

        let executor = self.executor.clone();
        tokio::spawn(async move {
            let result = executor.execute(&path).await;
            if !result.is_success {
                error!(
                    "Parcel {}: exception route failed: {}",
                    parcel_id,
                    result.failure_reason.unwrap_or_default()
                );
            }
        });
    }

    // ─── Runtime ────────────────────────────────────────────────────

    /// Consume sensor events and upstream assignments until stopped.
    ///
    /// Detection sensor triggers start a [`process_parcel`](Self::process_parcel)
    /// task each.
    pub async fn run(self: Arc<Self>) {
        let mut sensors = self.driver.subscribe_sensors();
        let mut assignments = self.upstream.subscribe();
        let mut stop = self.stop_tx.subscribe();
        let mut sweep = interval(Duration::from_millis(self.config.queue_sweep_interval_ms.max(1)));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Sorting service running");

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    self.expire_overdue_tasks();
                }
                event = sensors.recv() => match event {
                    Ok(event) => self.dispatch_sensor(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!("Sensor stream lagged, {} triggers lost", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Sensor stream closed");
                        break;
                    }
                },
                assignment = assignments.recv() => match assignment {
                    Ok(assignment) => {
                        self.handle_assignment(assignment);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!("Assignment stream lagged, {} assignments lost", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Assignment stream closed");
                        break;
                    }
                },
            }
        }
        info!("Sorting service loop exited");
    }

    fn dispatch_sensor(self: &Arc<Self>, event: SensorTriggerEvent) {
        if !self.topology.current().is_detection_sensor(event.sensor_id) {
            self.handle_sensor_event(event);
            return;
        }
        if event.parcel_id == UNIDENTIFIED_PARCEL {
            warn!("Detection at sensor {} without parcel id ignored", event.sensor_id);
            return;
        }
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.process_parcel(event.parcel_id, event.sensor_id).await;
        });
    }

    /// Stop: waiting plans go to the exception chute, then wait for every
    /// parcel flow in progress to finish.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            self.in_flight.wait_idle().await;
            return;
        }
        info!("Stopping sorting service ({} parcels in flight)", self.in_flight.count());
        self.stop_tx.send_replace(true);

        let marked = self
            .plans
            .mark_all_pending(ExceptionReason::ShutdownRequested, self.clock.now());
        if !marked.is_empty() {
            info!("{} waiting parcels routed to the exception chute", marked.len());
        }

        self.in_flight.wait_idle().await;
        info!("Sorting service stopped");
    }

    /// Whether a stop was requested.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    // ─── Diagnostics ────────────────────────────────────────────────

    /// Position queue contents.
    pub fn queue_snapshot(&self) -> Vec<PositionQueueSnapshot> {
        self.queues.snapshot()
    }

    /// Path the engine would execute for `chute_id` right now.
    pub fn preview_path(&self, chute_id: ChuteId) -> Option<SwitchingPath> {
        self.generator.generate_path(chute_id)
    }

    /// Route plan of `parcel_id`, live or archived.
    pub fn route_plan(&self, parcel_id: ParcelId) -> Option<RoutePlan> {
        self.plans.get(parcel_id)
    }

    /// Install a new topology. In-flight tasks keep their windows.
    ///
    /// # Errors
    /// `Config` if the topology is invalid or drops or disables the exception
    /// chute. The current topology stays in place.
    pub fn reload_topology(&self, config: TopologyConfig) -> Result<u64, SorterError> {
        self.config.validate_exception_chute(&config)?;
        Ok(self.topology.reload(config)?)
    }

    /// Counters.
    pub fn stats(&self) -> ServiceCounters {
        ServiceCounters {
            detected: self.stats.detected.load(Ordering::Relaxed),
            sorted_to_target: self.stats.sorted_to_target.load(Ordering::Relaxed),
            sorted_to_exception: self.stats.sorted_to_exception.load(Ordering::Relaxed),
            execution_failures: self.stats.execution_failures.load(Ordering::Relaxed),
            rerouted: self.stats.rerouted.load(Ordering::Relaxed),
            invariant_violations: self.plans.invariant_violations(),
            in_flight: self.in_flight.count(),
            triggers: self.queues.stats(),
        }
    }
}
