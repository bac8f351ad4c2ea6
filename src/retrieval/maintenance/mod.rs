
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::cache::CacheLayer;
use crate::pool::CollectionPool;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Periods for the background housekeeping passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    pub sweep_interval: Duration,
    pub max_idle: Duration,
    pub compaction_interval: Duration,
}

/// Running idle sweep and cache compaction.
///
/// Dropping the handle also stops the task; `shutdown` additionally waits
/// for the pass in progress to finish.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub(crate) fn spawn(
        pool: Arc<CollectionPool>,
        cache: Arc<CacheLayer>,
        schedule: MaintenanceSchedule,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            let sweep_period = schedule.sweep_interval.max(MIN_PERIOD);
            let compaction_period = schedule.compaction_interval.max(MIN_PERIOD);
            let mut sweep = interval_at(Instant::now() + sweep_period, sweep_period);
            let mut compaction = interval_at(Instant::now() + compaction_period, compaction_period);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            compaction.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                sweep_secs = sweep_period.as_secs(),
                compaction_secs = compaction_period.as_secs(),
                "Maintenance started"
            );

            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        let evicted = pool.sweep_idle(schedule.max_idle).await;
                        debug!(evicted, "Idle sweep finished");
                    }
                    _ = compaction.tick() => {
                        let cache = Arc::clone(&cache);
                        match tokio::task::spawn_blocking(move || cache.compact_all()).await {
                            Ok(removed) => debug!(removed, "Cache compaction finished"),
                            Err(e) => warn!("Cache compaction task failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            info!("Maintenance stopped");
        });

        Self { shutdown_tx, task }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the background passes and wait for the task to exit
    #[inline]
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("Maintenance task ended abnormally: {}", e);
        }
    }
}
