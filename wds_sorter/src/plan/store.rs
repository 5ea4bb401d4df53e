//! Route plan store.
//!
//! Live plans sit in one table behind a short-held lock. Every mutation is
//! computed on a copy, written through the repository, then committed and
//! published on the plan's `watch` channel. Two racing requests for the
//! same parcel (late assignment vs. deadline expiry) serialize on the table
//! lock: the first moves the plan to a terminal state, the second sees it
//! terminal and is reported as ignored.

use super::model::{
    AssignmentOutcome, AssignmentSource, ChangeChuteCommand, ExceptionReason, RoutePlan,
};
use super::repository::RoutePlanRepository;
use crate::error::RoutePlanError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{error, info, warn};
use wds_common::types::{ChuteId, ParcelId, Timestamp};

struct LivePlan {
    plan: RoutePlan,
    tx: watch::Sender<RoutePlan>,
}

/// Owner of all route plans.
pub struct RoutePlanStore {
    live: Mutex<HashMap<ParcelId, LivePlan>>,
    repository: Arc<dyn RoutePlanRepository>,
    invariant_violations: AtomicU64,
}

impl RoutePlanStore {
    /// Create a store persisting through `repository`.
    pub fn new(repository: Arc<dyn RoutePlanRepository>) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            repository,
            invariant_violations: AtomicU64::new(0),
        }
    }

    /// Create the plan for a newly detected parcel.
    ///
    /// Must happen before anything else references the parcel.
    ///
    /// # Errors
    /// `AlreadyExists` if a live plan exists, `Persistence` if it cannot be saved.
    pub fn create_route_plan(
        &self,
        parcel_id: ParcelId,
        fallback_chute_id: ChuteId,
        created_at: Timestamp,
        deadline: Option<Timestamp>,
    ) -> Result<RoutePlan, RoutePlanError> {
        let mut live = self.live.lock();
        if live.contains_key(&parcel_id) {
            self.invariant_violations.fetch_add(1, Ordering::Relaxed);
            error!("Invariant violation: route plan for parcel {} created twice", parcel_id);
            return Err(RoutePlanError::AlreadyExists(parcel_id));
        }

        let plan = RoutePlan::new(parcel_id, fallback_chute_id, created_at, deadline);
        self.repository.save(&plan)?;
        let (tx, _) = watch::channel(plan.clone());
        live.insert(
            parcel_id,
            LivePlan {
                plan: plan.clone(),
                tx,
            },
        );
        info!(
            "Route plan created for parcel {} (fallback {}, deadline {:?})",
            parcel_id, fallback_chute_id, deadline
        );
        Ok(plan)
    }

    /// Apply a rule engine assignment.
    ///
    /// # Errors
    /// `PlanNotFound` when the parcel was never detected. This is an
    /// invariant violation; no plan is created.
    pub fn apply_upstream_assignment(
        &self,
        parcel_id: ParcelId,
        chute_id: ChuteId,
        assigned_at: Timestamp,
    ) -> Result<AssignmentOutcome, RoutePlanError> {
        self.apply(parcel_id, chute_id, assigned_at, AssignmentSource::Upstream)
    }

    /// Apply an operator override under the same rules as an assignment.
    pub fn change_chute(&self, command: &ChangeChuteCommand) -> Result<AssignmentOutcome, RoutePlanError> {
        self.apply(
            command.parcel_id,
            command.chute_id,
            command.requested_at,
            AssignmentSource::Manual,
        )
    }

    fn apply(
        &self,
        parcel_id: ParcelId,
        chute_id: ChuteId,
        at: Timestamp,
        source: AssignmentSource,
    ) -> Result<AssignmentOutcome, RoutePlanError> {
        let mut live = self.live.lock();
        let Some(entry) = live.get_mut(&parcel_id) else {
            drop(live);
            return self.apply_archived(parcel_id, chute_id, at, source);
        };

        let mut next = entry.plan.clone();
        let outcome = next.apply_assignment(chute_id, at, source);
        self.repository.save(&next)?;
        entry.plan = next.clone();
        entry.tx.send_replace(next);
        drop(live);

        log_outcome(parcel_id, chute_id, at, source, outcome);
        Ok(outcome)
    }

    fn apply_archived(
        &self,
        parcel_id: ParcelId,
        chute_id: ChuteId,
        at: Timestamp,
        source: AssignmentSource,
    ) -> Result<AssignmentOutcome, RoutePlanError> {
        match self.repository.get_by_parcel_id(parcel_id)? {
            Some(mut plan) if plan.is_terminal() => {
                let outcome = plan.apply_assignment(chute_id, at, source);
                self.repository.save(&plan)?;
                log_outcome(parcel_id, chute_id, at, source, outcome);
                Ok(outcome)
            }
            _ => {
                self.invariant_violations.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Invariant violation: {:?} assignment of chute {} for parcel {} with no route plan",
                    source, chute_id, parcel_id
                );
                Err(RoutePlanError::PlanNotFound(parcel_id))
            }
        }
    }

    /// Route the plan to the fallback chute if its deadline has passed.
    /// Returns whether this call made the transition.
    pub fn expire_if_due(&self, parcel_id: ParcelId, now: Timestamp) -> Result<bool, RoutePlanError> {
        self.transition(parcel_id, |plan| plan.expire_if_due(now))
            .inspect(|expired| {
                if *expired {
                    warn!(
                        "Parcel {}: no assignment by deadline, routing to exception chute",
                        parcel_id
                    );
                }
            })
    }

    /// Route the plan to the fallback chute for `reason`. Returns whether
    /// this call made the transition.
    pub fn mark_exception(
        &self,
        parcel_id: ParcelId,
        reason: ExceptionReason,
        at: Timestamp,
    ) -> Result<bool, RoutePlanError> {
        let label = reason.to_string();
        self.transition(parcel_id, |plan| plan.mark_exception(reason, at))
            .inspect(|marked| {
                if *marked {
                    warn!("Parcel {} exception-routed: {}", parcel_id, label);
                }
            })
    }

    fn transition(
        &self,
        parcel_id: ParcelId,
        f: impl FnOnce(&mut RoutePlan) -> bool,
    ) -> Result<bool, RoutePlanError> {
        let mut live = self.live.lock();
        let Some(entry) = live.get_mut(&parcel_id) else {
            return match self.repository.get_by_parcel_id(parcel_id)? {
                Some(_) => Ok(false),
                None => Err(RoutePlanError::PlanNotFound(parcel_id)),
            };
        };

        let mut next = entry.plan.clone();
        if !f(&mut next) {
            return Ok(false);
        }
        self.repository.save(&next)?;
        entry.plan = next.clone();
        entry.tx.send_replace(next);
        Ok(true)
    }

    /// Exception-route every plan still waiting. Returns the affected parcels.
    pub fn mark_all_pending(&self, reason: ExceptionReason, at: Timestamp) -> Vec<ParcelId> {
        let pending: Vec<ParcelId> = self
            .live
            .lock()
            .values()
            .filter(|entry| !entry.plan.is_terminal())
            .map(|entry| entry.plan.parcel_id)
            .collect();

        pending
            .into_iter()
            .filter(|parcel_id| {
                match self.mark_exception(*parcel_id, reason.clone(), at) {
                    Ok(marked) => marked,
                    Err(e) => {
                        error!("Failed to exception-route parcel {}: {}", parcel_id, e);
                        false
                    }
                }
            })
            .collect()
    }

    /// Watch a live plan. Every committed mutation is published; the channel
    /// closes when the plan is archived or purged.
    pub fn subscribe(&self, parcel_id: ParcelId) -> Option<watch::Receiver<RoutePlan>> {
        self.live.lock().get(&parcel_id).map(|entry| entry.tx.subscribe())
    }

    /// Current plan, live or archived.
    pub fn get(&self, parcel_id: ParcelId) -> Option<RoutePlan> {
        if let Some(entry) = self.live.lock().get(&parcel_id) {
            return Some(entry.plan.clone());
        }
        match self.repository.get_by_parcel_id(parcel_id) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Route plan lookup for parcel {} failed: {}", parcel_id, e);
                None
            }
        }
    }

    /// Whether the parcel has a live plan.
    pub fn is_live(&self, parcel_id: ParcelId) -> bool {
        self.live.lock().contains_key(&parcel_id)
    }

    /// Move a terminal plan out of the live table once the parcel has left
    /// the conveyor. It stays readable through the repository.
    ///
    /// # Errors
    /// `NotTerminal` while the plan is still waiting, `PlanNotFound` if not live.
    pub fn archive(&self, parcel_id: ParcelId) -> Result<RoutePlan, RoutePlanError> {
        let mut live = self.live.lock();
        match live.get(&parcel_id) {
            None => Err(RoutePlanError::PlanNotFound(parcel_id)),
            Some(entry) if !entry.plan.is_terminal() => Err(RoutePlanError::NotTerminal(parcel_id)),
            Some(_) => {
                let entry = live
                    .remove(&parcel_id)
                    .ok_or(RoutePlanError::PlanNotFound(parcel_id))?;
                info!(
                    "Route plan for parcel {} archived ({:?}, chute {:?})",
                    parcel_id, entry.plan.state, entry.plan.effective_chute_id
                );
                Ok(entry.plan)
            }
        }
    }

    /// Delete a plan everywhere. Returns whether anything was removed.
    pub fn purge(&self, parcel_id: ParcelId) -> Result<bool, RoutePlanError> {
        let was_live = self.live.lock().remove(&parcel_id).is_some();
        let was_stored = self.repository.delete(parcel_id)?;
        Ok(was_live || was_stored)
    }

    /// Number of live plans.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Invariant violations observed so far.
    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }
}

fn log_outcome(
    parcel_id: ParcelId,
    chute_id: ChuteId,
    at: Timestamp,
    source: AssignmentSource,
    outcome: AssignmentOutcome,
) {
    match outcome {
        AssignmentOutcome::Accepted => info!(
            "Parcel {}: {:?} assignment to chute {} accepted at {}",
            parcel_id, source, chute_id, at
        ),
        AssignmentOutcome::RejectedTooLate => warn!(
            "Parcel {}: {:?} assignment to chute {} at {} is past the deadline",
            parcel_id, source, chute_id, at
        ),
        AssignmentOutcome::IgnoredAlreadyCompleted | AssignmentOutcome::IgnoredExceptionRouted => info!(
            "Parcel {}: {:?} assignment to chute {} ignored ({:?})",
            parcel_id, source, chute_id, outcome
        ),
    }
}
