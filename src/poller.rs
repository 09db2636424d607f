//! Background device discovery, scoped to a single launch attempt.
//!
//! The poller repeatedly diffs the live device listing against the attempt's
//! pre-launch snapshot. It never decides readiness itself: the same serial is
//! re-reported every cycle so the supervisor sees its state transitions
//! (freshly booted emulators typically appear `offline` first).

use crate::registry::{DeviceSnapshot, DiscoveredDevice, RegistryClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sleep between polling cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Every this many cycles the registry connection is reset proactively, as a
/// self-healing measure against silently stuck queries.
const HEARTBEAT_RESET_CYCLES: u32 = 10;

/// Continuously searches for a device that is not in `snapshot` and reports
/// every sighting on `reports`.
///
/// Runs until `cancel` fires; the token is the attempt scope, so a retried
/// attempt cannot receive reports from a stale poller.
pub struct DiscoveryPoller {
    registry: Arc<dyn RegistryClient>,
    snapshot: DeviceSnapshot,
    interval: Duration,
}

impl DiscoveryPoller {
    pub fn new(registry: Arc<dyn RegistryClient>, snapshot: DeviceSnapshot) -> Self {
        Self {
            registry,
            snapshot,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the cycle interval. Tests run with a few milliseconds.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the polling task. The returned receiver carries one
    /// [`DiscoveredDevice`] per sighting.
    pub fn spawn(self, cancel: CancellationToken) -> mpsc::Receiver<DiscoveredDevice> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(self.run(tx, cancel));
        rx
    }

    async fn run(self, tx: mpsc::Sender<DiscoveredDevice>, cancel: CancellationToken) {
        let mut cycle: u32 = 0;

        loop {
            cycle += 1;

            if cycle % HEARTBEAT_RESET_CYCLES == 0 {
                tracing::warn!("restarting registry connection (heartbeat)...");
                if let Err(e) = self.registry.reset().await {
                    tracing::warn!("heartbeat registry reset failed: {}", e);
                }
            }

            match self.registry.find_new_device(&self.snapshot).await {
                Err(e) => {
                    tracing::warn!("failed to query for new device: {}", e);
                    tracing::warn!("resetting registry connection and retrying");
                    if let Err(e) = self.registry.reset().await {
                        tracing::warn!("registry reset failed: {}", e);
                    }
                    // Zero the counter so the heartbeat cannot fire a second
                    // reset right after this one.
                    cycle = 0;
                }
                Ok(Some(found)) => {
                    tracing::info!("new device found: {}, state: {}", found.serial, found.state);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        res = tx.send(found) => {
                            if res.is_err() {
                                // Supervisor abandoned the attempt.
                                return;
                            }
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!("no new device yet");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
