//! In-process upstream client.
//!
//! Records everything sent and publishes assignments handed to it with
//! [`LoopbackUpstream::assign`]. With auto-assignment configured it answers
//! each detection with the next chute of a round-robin list after a fixed
//! latency, which is enough to drive the service end to end in simulation.

use super::{ChuteAssignment, UpstreamMessage, UpstreamRoutingClient};
use crate::error::UpstreamError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};
use wds_common::config::UpstreamConfig;
use wds_common::types::{ChuteId, ParcelId};

const ASSIGNMENT_CHANNEL_CAPACITY: usize = 1024;

/// Loopback implementation of [`UpstreamRoutingClient`].
pub struct LoopbackUpstream {
    connected: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<UpstreamMessage>>,
    assignments: broadcast::Sender<ChuteAssignment>,
    auto_chutes: Vec<ChuteId>,
    auto_latency: Duration,
    next_auto: AtomicUsize,
}

impl LoopbackUpstream {
    /// Connected client without auto-assignment.
    pub fn new() -> Self {
        Self::with_auto_assign(Vec::new(), Duration::ZERO)
    }

    /// Connected client answering detections round-robin from `chutes`.
    pub fn with_auto_assign(chutes: Vec<ChuteId>, latency: Duration) -> Self {
        let (assignments, _) = broadcast::channel(ASSIGNMENT_CHANNEL_CAPACITY);
        Self {
            connected: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            assignments,
            auto_chutes: chutes,
            auto_latency: latency,
            next_auto: AtomicUsize::new(0),
        }
    }

    /// Client configured from `[upstream]`.
    pub fn from_config(config: &UpstreamConfig) -> Self {
        info!(
            "Loopback upstream: auto-assign {:?} after {}ms",
            config.auto_assign_chutes, config.auto_assign_latency_ms
        );
        Self::with_auto_assign(
            config.auto_assign_chutes.clone(),
            Duration::from_millis(config.auto_assign_latency_ms),
        )
    }

    /// Connect or disconnect.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make every send fail while connected.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Publish an assignment. Returns the number of listeners reached.
    pub fn assign(&self, parcel_id: ParcelId, chute_id: ChuteId) -> usize {
        debug!("Loopback assigns chute {} to parcel {}", chute_id, parcel_id);
        self.assignments
            .send(ChuteAssignment { parcel_id, chute_id })
            .unwrap_or(0)
    }

    /// Messages delivered so far, oldest first.
    pub fn sent(&self) -> Vec<UpstreamMessage> {
        self.sent.lock().clone()
    }

    fn schedule_auto_assignment(&self, parcel_id: ParcelId) {
        if self.auto_chutes.is_empty() {
            return;
        }
        let idx = self.next_auto.fetch_add(1, Ordering::Relaxed) % self.auto_chutes.len();
        let chute_id = self.auto_chutes[idx];
        let latency = self.auto_latency;
        let tx = self.assignments.clone();

        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let _ = tx.send(ChuteAssignment { parcel_id, chute_id });
        });
    }
}

impl Default for LoopbackUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamRoutingClient for LoopbackUpstream {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: UpstreamMessage) -> Result<(), UpstreamError> {
        if !self.is_connected() {
            return Err(UpstreamError::Disconnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(UpstreamError::SendFailed(format!(
                "loopback refused message for parcel {}",
                message.parcel_id()
            )));
        }

        let detected = match message {
            UpstreamMessage::ParcelDetected { parcel_id, .. } => Some(parcel_id),
            UpstreamMessage::SortingCompleted { .. } => None,
        };
        self.sent.lock().push(message);

        if let Some(parcel_id) = detected {
            self.schedule_auto_assignment(parcel_id);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChuteAssignment> {
        self.assignments.subscribe()
    }
}
