use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{GovernorError, GovernorResult};

use super::engine::{RequestGovernor, WeakGovernor};

/// Background sweep that fails queued items past their deadline, so callers
/// hear back even while their key's worker is busy with a long action.
/// Also discards idle rate windows.
pub struct DeadlineReaper {
    governor: WeakGovernor,
    interval: Duration,
}

impl DeadlineReaper {
    /// Reaper using the governor's `queue.reaper_interval_ms`
    pub fn new(governor: &RequestGovernor) -> Self {
        Self::with_interval(governor, governor.config().queue.reaper_interval())
    }

    pub fn with_interval(governor: &RequestGovernor, interval: Duration) -> Self {
        Self {
            governor: governor.downgrade(),
            interval,
        }
    }

    /// Run one sweep. Returns how many items expired.
    pub fn reap(&self) -> usize {
        match self.governor.upgrade() {
            Some(governor) => Self::sweep(&governor),
            None => 0,
        }
    }

    fn sweep(governor: &RequestGovernor) -> usize {
        let expired = governor.sweep_expired();
        let pruned = governor.limiters().prune();

        if expired > 0 {
            info!(expired, "Expired queued work items");
        }
        if pruned > 0 {
            debug!(pruned, "Pruned idle rate windows");
        }
        expired
    }

    /// Start the sweep loop. It ends on shutdown or once the governor has
    /// been dropped.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Starting deadline reaper with interval: {:?}", self.interval);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(governor) = self.governor.upgrade() else {
                            debug!("Governor dropped, stopping reaper");
                            break;
                        };
                        Self::sweep(&governor);
                    }
                }
            }
        });

        ReaperHandle {
            shutdown_tx,
            join_handle,
        }
    }
}

/// Handle for stopping a running [`DeadlineReaper`]
pub struct ReaperHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the sweep loop and wait for it to finish
    pub async fn shutdown(self) -> GovernorResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| GovernorError::Internal(format!("Reaper join error: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

impl RequestGovernor {
    /// Spawn a [`DeadlineReaper`] for this governor
    pub fn spawn_reaper(&self) -> ReaperHandle {
        DeadlineReaper::new(self).spawn()
    }
}
