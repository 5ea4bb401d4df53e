//! Route plan data model and state machine.
//!
//! ```text
//!              assignment ≤ deadline
//!   Created ───────────────────────────► Completed
//!      │
//!      │ deadline passed / late assignment / upstream failure / shutdown
//!      └────────────────────────────────► ExceptionRouted
//! ```
//!
//! Transitions are one-way. Once terminal, `effective_chute_id` is frozen;
//! later requests only touch the audit fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use wds_common::types::{ChuteId, ParcelId, Timestamp};

/// Lifecycle state of a route plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePlanState {
    /// Waiting for an assignment.
    Created,
    /// Upstream or manual assignment accepted.
    Completed,
    /// Routed to the fallback chute.
    ExceptionRouted,
}

impl RoutePlanState {
    /// Whether no further transition is possible.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created)
    }
}

/// Why a plan ended in the exception chute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionReason {
    /// No accepted assignment before the deadline.
    DeadlineExpired,
    /// Upstream was not connected at detection.
    UpstreamDisconnected,
    /// Detection notification could not be sent.
    UpstreamSendFailed(String),
    /// Service stop requested while waiting.
    ShutdownRequested,
    /// Parcel arrived late or out of sequence before its plan resolved.
    TimingViolation(String),
}

impl fmt::Display for ExceptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeadlineExpired => write!(f, "assignment deadline expired"),
            Self::UpstreamDisconnected => write!(f, "upstream disconnected"),
            Self::UpstreamSendFailed(e) => write!(f, "upstream send failed: {e}"),
            Self::ShutdownRequested => write!(f, "shutdown requested"),
            Self::TimingViolation(e) => write!(f, "timing violation: {e}"),
        }
    }
}

/// Result of applying an assignment or override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOutcome {
    /// Plan completed with the requested chute.
    Accepted,
    /// Arrived after the deadline; plan went to the exception chute.
    RejectedTooLate,
    /// Plan was already completed.
    IgnoredAlreadyCompleted,
    /// Plan was already exception-routed.
    IgnoredExceptionRouted,
}

impl AssignmentOutcome {
    /// Whether the requested chute became effective.
    #[inline]
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// Origin of a plan mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    /// Rule engine assignment.
    Upstream,
    /// Operator override.
    Manual,
    /// Deadline timer.
    Deadline,
    /// Engine decision (upstream failure, shutdown).
    System,
}

/// What an audit entry recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Assignment or override with its outcome.
    Assignment(AssignmentOutcome),
    /// Transition to the exception chute.
    Exception(ExceptionReason),
}

/// One entry of a plan's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAuditEntry {
    /// When it happened.
    pub at: Timestamp,
    /// Who asked.
    pub source: AssignmentSource,
    /// Chute requested (or fallback for exceptions).
    pub chute_id: ChuteId,
    /// What happened.
    pub action: AuditAction,
}

/// Manual chute override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeChuteCommand {
    /// Parcel to re-route.
    pub parcel_id: ParcelId,
    /// Requested chute.
    pub chute_id: ChuteId,
    /// Request time, compared against the deadline.
    pub requested_at: Timestamp,
}

/// Authoritative routing decision record of one parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePlan {
    /// Parcel.
    pub parcel_id: ParcelId,
    /// Latest requested chute, rejected or not. Starts at the fallback.
    pub current_target_chute_id: ChuteId,
    /// Chute the parcel goes to; set once at the terminal transition.
    pub effective_chute_id: Option<ChuteId>,
    /// Exception chute.
    pub fallback_chute_id: ChuteId,
    /// Creation time.
    pub created_at: Timestamp,
    /// Latest accepted assignment time. `None` = wait indefinitely.
    pub deadline: Option<Timestamp>,
    /// Lifecycle state.
    pub state: RoutePlanState,
    /// Terminal transition time.
    pub resolved_at: Option<Timestamp>,
    /// Set when exception-routed.
    pub exception_reason: Option<ExceptionReason>,
    /// Every mutation, oldest first.
    pub audit: Vec<PlanAuditEntry>,
}

impl RoutePlan {
    /// New plan in `Created`.
    pub fn new(
        parcel_id: ParcelId,
        fallback_chute_id: ChuteId,
        created_at: Timestamp,
        deadline: Option<Timestamp>,
    ) -> Self {
        Self {
            parcel_id,
            current_target_chute_id: fallback_chute_id,
            effective_chute_id: None,
            fallback_chute_id,
            created_at,
            deadline,
            state: RoutePlanState::Created,
            resolved_at: None,
            exception_reason: None,
            audit: Vec::new(),
        }
    }

    /// Whether the plan reached `Completed` or `ExceptionRouted`.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the deadline has passed at `now` while still waiting.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.state == RoutePlanState::Created && self.deadline.is_some_and(|d| now >= d)
    }

    /// Apply an assignment or override for `chute_id` at `at`.
    ///
    /// `current_target_chute_id` always records the request. Only an
    /// on-time request against a `Created` plan changes the effective chute;
    /// a late one expires the plan.
    pub fn apply_assignment(
        &mut self,
        chute_id: ChuteId,
        at: Timestamp,
        source: AssignmentSource,
    ) -> AssignmentOutcome {
        let outcome = match self.state {
            RoutePlanState::Completed => AssignmentOutcome::IgnoredAlreadyCompleted,
            RoutePlanState::ExceptionRouted => AssignmentOutcome::IgnoredExceptionRouted,
            RoutePlanState::Created => {
                if self.deadline.is_some_and(|d| at > d) {
                    self.resolve_exception(ExceptionReason::DeadlineExpired, at);
                    AssignmentOutcome::RejectedTooLate
                } else {
                    self.state = RoutePlanState::Completed;
                    self.effective_chute_id = Some(chute_id);
                    self.resolved_at = Some(at);
                    AssignmentOutcome::Accepted
                }
            }
        };

        self.current_target_chute_id = chute_id;
        self.audit.push(PlanAuditEntry {
            at,
            source,
            chute_id,
            action: AuditAction::Assignment(outcome),
        });
        outcome
    }

    /// Route to the fallback chute if the deadline has passed. Returns
    /// whether the transition happened.
    pub fn expire_if_due(&mut self, now: Timestamp) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.resolve_exception(ExceptionReason::DeadlineExpired, now);
        self.audit.push(PlanAuditEntry {
            at: now,
            source: AssignmentSource::Deadline,
            chute_id: self.fallback_chute_id,
            action: AuditAction::Exception(ExceptionReason::DeadlineExpired),
        });
        true
    }

    /// Route to the fallback chute for `reason`. Returns whether the
    /// transition happened; terminal plans are left unchanged.
    pub fn mark_exception(&mut self, reason: ExceptionReason, at: Timestamp) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.resolve_exception(reason.clone(), at);
        self.audit.push(PlanAuditEntry {
            at,
            source: AssignmentSource::System,
            chute_id: self.fallback_chute_id,
            action: AuditAction::Exception(reason),
        });
        true
    }

    fn resolve_exception(&mut self, reason: ExceptionReason, at: Timestamp) {
        self.state = RoutePlanState::ExceptionRouted;
        self.effective_chute_id = Some(self.fallback_chute_id);
        self.resolved_at = Some(at);
        self.exception_reason = Some(reason);
    }
}
