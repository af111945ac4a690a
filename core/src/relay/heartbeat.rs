//! Relay liveness announcements
//!
//! A registered relay pings the directory with its address twice per
//! liveness window. A failed ping is logged and the next tick simply tries
//! again; there is no backoff.

use super::client::DirectoryClient;
use super::transport::TransportError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Pings sent per liveness window
pub const HEARTBEAT_MULTIPLIER: u32 = 2;

pub struct HeartbeatScheduler {
    directory: Arc<dyn DirectoryClient>,
    address: String,
    period: Duration,
}

impl HeartbeatScheduler {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        address: impl Into<String>,
        liveness_window: Duration,
    ) -> Self {
        Self {
            directory,
            address: address.into(),
            period: (liveness_window / HEARTBEAT_MULTIPLIER).max(Duration::from_millis(1)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Send a single keep-alive
    pub async fn beat(&self) -> Result<(), TransportError> {
        self.directory.keep_alive(&self.address).await
    }

    /// Runs the heartbeat loop until shutdown signal received.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("Heartbeat started for {} ({:?})", self.address, self.period);
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Heartbeat stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.beat().await {
                        Ok(()) => debug!("Keep-alive sent for {}", self.address),
                        Err(e) => warn!("Keep-alive failed: {}", e),
                    }
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
