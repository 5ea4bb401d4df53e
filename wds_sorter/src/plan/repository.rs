//! Route plan persistence port.

use super::model::RoutePlan;
use crate::error::RoutePlanError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use wds_common::types::ParcelId;

/// Storage for route plans.
///
/// The store writes every mutation through this port before making it
/// visible, so a plan read back from here is never older than the last
/// committed transition.
pub trait RoutePlanRepository: Send + Sync {
    /// Plan for `parcel_id`, if stored.
    fn get_by_parcel_id(&self, parcel_id: ParcelId) -> Result<Option<RoutePlan>, RoutePlanError>;

    /// Insert or overwrite.
    fn save(&self, plan: &RoutePlan) -> Result<(), RoutePlanError>;

    /// Remove. Returns whether a plan was stored.
    fn delete(&self, parcel_id: ParcelId) -> Result<bool, RoutePlanError>;
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct InMemoryRoutePlanRepository {
    plans: RwLock<HashMap<ParcelId, RoutePlan>>,
    fail_saves: AtomicBool,
}

impl InMemoryRoutePlanRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored plans.
    pub fn len(&self) -> usize {
        self.plans.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.plans.read().is_empty()
    }

    /// Make `save` fail, simulating an unavailable backend.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl RoutePlanRepository for InMemoryRoutePlanRepository {
    fn get_by_parcel_id(&self, parcel_id: ParcelId) -> Result<Option<RoutePlan>, RoutePlanError> {
        Ok(self.plans.read().get(&parcel_id).cloned())
    }

    fn save(&self, plan: &RoutePlan) -> Result<(), RoutePlanError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RoutePlanError::Persistence(format!(
                "save of parcel {} refused",
                plan.parcel_id
            )));
        }
        self.plans.write().insert(plan.parcel_id, plan.clone());
        Ok(())
    }

    fn delete(&self, parcel_id: ParcelId) -> Result<bool, RoutePlanError> {
        Ok(self.plans.write().remove(&parcel_id).is_some())
    }
}
