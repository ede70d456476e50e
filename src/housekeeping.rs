//! Periodic sweep that keeps throttle and cache state from growing without bound.
//!
//! Nothing depends on the sweep for correctness: counters are pruned and
//! entries expire lazily on access. The sweep only reclaims state that is
//! never touched again.

use crate::cache_registry::CacheRegistry;
use crate::throttler::RequestThrottle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub counters_removed: usize,
    pub blocks_removed: usize,
    pub cache_entries_expired: usize,
}

/// Run one sweep over throttle state and every cache namespace.
pub fn sweep(throttle: &RequestThrottle, caches: &CacheRegistry) -> HousekeepingReport {
    let throttle_report = throttle.sweep();
    let cache_entries_expired = caches.purge_expired();

    HousekeepingReport {
        counters_removed: throttle_report.counters_removed,
        blocks_removed: throttle_report.blocks_removed,
        cache_entries_expired,
    }
}

/// Handle to the background sweep task.
pub struct Housekeeping {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Housekeeping {
    /// Spawn the sweep on the current tokio runtime.
    pub fn spawn(
        throttle: Arc<RequestThrottle>,
        caches: Arc<CacheRegistry>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let report = sweep(&throttle, &caches);
                        debug!(
                            target: "storefront_guard::housekeeping",
                            counters_removed = report.counters_removed,
                            blocks_removed = report.blocks_removed,
                            cache_entries_expired = report.cache_entries_expired,
                            "Housekeeping sweep finished"
                        );
                    }
                }
            }
        });

        info!(
            target: "storefront_guard::housekeeping",
            interval = ?interval,
            "Housekeeping started"
        );

        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Stop the sweep and wait for the task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(
                target: "storefront_guard::housekeeping",
                error = %err,
                "Housekeeping task ended abnormally"
            );
        }
        info!(target: "storefront_guard::housekeeping", "Housekeeping stopped");
    }
}

impl Drop for Housekeeping {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}
