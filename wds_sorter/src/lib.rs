//! # WDS Sorter
//!
//! Real-time routing and execution engine for wheel-diverter parcel sorting.
//!
//! # Module Structure
//!
//! - [`clock`] - Injectable engine clock
//! - [`routing`] - Switching path generation and execution
//! - [`queue`] - Position-indexed arrival queues and trigger classification
//! - [`plan`] - Route plan reconciliation against upstream assignments
//! - [`upstream`] - Rule engine client port + loopback implementation
//! - [`service`] - Per-parcel orchestration, sensor and assignment loops
//! - [`rt`] - Memory locking and FIFO scheduling for the binary
//! - [`error`] - Error types
//!
//! # Data Flow
//!
//! ```text
//!  detection ──► RoutePlanStore ──► upstream "parcel detected"
//!       │                                   │
//!       ▼                                   ▼ ChuteAssignment (maybe late)
//!  SwitchingPathGenerator ──► PositionQueueManager ◄── sensor triggers
//!       │
//!       ▼
//!  SwitchingPathExecutor ──► DiverterDriver (actuate, TTL-bounded)
//! ```

pub mod clock;
pub mod error;
pub mod plan;
pub mod queue;
pub mod routing;
pub mod rt;
pub mod service;
pub mod upstream;

pub use clock::{Clock, ManualClock, TokioClock};
pub use error::{RoutePlanError, SorterError, UpstreamError};
pub use service::{ServiceCounters, SortingEvent, SortingService};
