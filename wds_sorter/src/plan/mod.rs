//! Route plan reconciliation.
//!
//! - [`model`] - `RoutePlan` and its one-way state machine
//! - [`repository`] - persistence port + in-memory implementation
//! - [`store`] - live plan table with atomic transitions and subscriptions

pub mod model;
pub mod repository;
pub mod store;

pub use model::{
    AssignmentOutcome, AssignmentSource, AuditAction, ChangeChuteCommand, ExceptionReason,
    PlanAuditEntry, RoutePlan, RoutePlanState,
};
pub use repository::{InMemoryRoutePlanRepository, RoutePlanRepository};
pub use store::RoutePlanStore;
