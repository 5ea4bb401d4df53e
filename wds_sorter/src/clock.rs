//! Injectable engine clock.
//!
//! All engine timestamps are milliseconds from the clock's origin.
//! `TokioClock` follows `tokio::time`, so paused-time tests see timestamps
//! that agree with `tokio::time::sleep`. `ManualClock` is set by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use wds_common::types::Timestamp;

/// Source of engine timestamps.
pub trait Clock: Send + Sync {
    /// Current time [ms].
    fn now(&self) -> Timestamp;
}

/// Clock driven by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Clock whose zero is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        self.origin.elapsed().as_millis() as Timestamp
    }
}

/// Hand-driven clock for synchronous tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Clock reading `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Jump to `t`.
    pub fn set(&self, t: Timestamp) {
        self.now.store(t, Ordering::SeqCst);
    }

    /// Move forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
