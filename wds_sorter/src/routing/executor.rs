//! Switching path executor.
//!
//! Walks a path in sequence order and actuates each diverter through the
//! driver, bounding every step by the segment TTL. Any invalid path, driver
//! error or timeout ends the attempt and reports the fallback chute. Steps
//! are never retried: a parcel past a diverter cannot be un-diverted.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use wds_common::driver::DiverterDriver;
use wds_common::types::{PathExecutionResult, SwitchingPath};

/// Executes switching paths against a diverter driver.
///
/// Holds only the shared driver handle, so any number of executions may run
/// concurrently.
#[derive(Clone)]
pub struct SwitchingPathExecutor {
    driver: Arc<dyn DiverterDriver>,
}

impl SwitchingPathExecutor {
    /// Create an executor bound to `driver`.
    pub fn new(driver: Arc<dyn DiverterDriver>) -> Self {
        Self { driver }
    }

    /// Driver handle.
    pub fn driver(&self) -> &Arc<dyn DiverterDriver> {
        &self.driver
    }

    /// Execute `path`.
    ///
    /// On success `actual_chute_id` is the path target; on any failure it is
    /// the path fallback and `failure_reason` says which step failed.
    pub async fn execute(&self, path: &SwitchingPath) -> PathExecutionResult {
        if let Err(reason) = validate_path(path) {
            warn!(
                "Rejected switching path to chute {}: {}",
                path.target_chute_id, reason
            );
            return PathExecutionResult::failure(path.fallback_chute_id, reason);
        }

        for segment in &path.segments {
            let ttl = Duration::from_millis(segment.ttl_milliseconds);
            let actuation = self
                .driver
                .actuate(segment.diverter_id, segment.target_direction);

            match tokio::time::timeout(ttl, actuation).await {
                Ok(Ok(())) => {
                    debug!(
                        "Step {}: diverter {} -> {}",
                        segment.sequence_number, segment.diverter_id, segment.target_direction
                    );
                }
                Ok(Err(e)) => {
                    let reason = format!(
                        "step {} (diverter {}) failed: {}",
                        segment.sequence_number, segment.diverter_id, e
                    );
                    warn!(
                        "Path to chute {} aborted, {}; routing to chute {}",
                        path.target_chute_id, reason, path.fallback_chute_id
                    );
                    return PathExecutionResult::failure(path.fallback_chute_id, reason);
                }
                Err(_) => {
                    let reason = format!(
                        "step {} (diverter {}) not confirmed within {}ms",
                        segment.sequence_number, segment.diverter_id, segment.ttl_milliseconds
                    );
                    warn!(
                        "Path to chute {} aborted, {}; routing to chute {}",
                        path.target_chute_id, reason, path.fallback_chute_id
                    );
                    return PathExecutionResult::failure(path.fallback_chute_id, reason);
                }
            }
        }

        info!(
            "Executed path to chute {} ({} steps)",
            path.target_chute_id,
            path.segments.len()
        );
        PathExecutionResult::success(path.target_chute_id)
    }
}

/// Structural checks before anything moves.
///
/// # Validation Rules
/// 1. At least one segment
/// 2. Sequence numbers strictly increasing
/// 3. Every TTL greater than 0
fn validate_path(path: &SwitchingPath) -> Result<(), String> {
    if path.segments.is_empty() {
        return Err("path has no segments".to_string());
    }

    let mut previous = 0u32;
    for segment in &path.segments {
        if segment.sequence_number <= previous {
            return Err(format!(
                "sequence number {} out of order after {}",
                segment.sequence_number, previous
            ));
        }
        if segment.ttl_milliseconds == 0 {
            return Err(format!(
                "step {} has zero TTL",
                segment.sequence_number
            ));
        }
        previous = segment.sequence_number;
    }
    Ok(())
}
