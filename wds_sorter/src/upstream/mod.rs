//! Upstream routing client port.
//!
//! The rule engine deciding chutes is an opaque network peer. The engine
//! notifies it of detections and completions and listens for chute
//! assignments, which may arrive late, twice, or never. Reconnection is the
//! client's business; the engine never retries per parcel.

pub mod loopback;

use crate::error::UpstreamError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use wds_common::types::{ChuteId, ParcelId, Timestamp};

pub use loopback::LoopbackUpstream;

/// Message from the engine to the rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamMessage {
    /// A parcel entered the line and needs a chute.
    ParcelDetected {
        /// Parcel
        parcel_id: ParcelId,
        /// Detection time
        detected_at: Timestamp,
    },
    /// A parcel was sorted.
    SortingCompleted {
        /// Parcel
        parcel_id: ParcelId,
        /// Chute the parcel was routed to
        actual_chute_id: ChuteId,
        /// Whether the finalized path executed
        is_success: bool,
        /// Completion time
        completed_at: Timestamp,
    },
}

impl UpstreamMessage {
    /// Parcel the message is about.
    pub fn parcel_id(&self) -> ParcelId {
        match self {
            Self::ParcelDetected { parcel_id, .. } | Self::SortingCompleted { parcel_id, .. } => {
                *parcel_id
            }
        }
    }
}

/// Chute decision from the rule engine. The engine timestamps it on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChuteAssignment {
    /// Parcel
    pub parcel_id: ParcelId,
    /// Assigned chute
    pub chute_id: ChuteId,
}

/// Connection to the rule engine.
#[async_trait]
pub trait UpstreamRoutingClient: Send + Sync {
    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Deliver `message`.
    ///
    /// # Errors
    /// `Disconnected` without a connection, `SendFailed` if delivery failed.
    async fn send(&self, message: UpstreamMessage) -> Result<(), UpstreamError>;

    /// Subscribe to chute assignments.
    fn subscribe(&self) -> broadcast::Receiver<ChuteAssignment>;
}
