use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::MissedTickBehavior;

use super::index::CacheIndex;
use super::store::ArtifactStore;

/// Bookkeeping for one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries removed from the index.
    pub evicted: usize,
    /// Artifacts whose physical deletion failed. Their index entries are
    /// gone regardless; the leak is logged.
    pub delete_failures: usize,
}

/// Periodically removes cache entries older than the retention window.
///
/// The sweeper is the sole owner of time-based eviction; the read path never
/// evicts.
#[derive(Debug)]
pub struct Sweeper {
    index: Arc<CacheIndex>,
    store: Arc<ArtifactStore>,
    retention_window: Duration,
}

impl Sweeper {
    pub fn new(
        index: Arc<CacheIndex>,
        store: Arc<ArtifactStore>,
        retention_window: Duration,
    ) -> Self {
        Self {
            index,
            store,
            retention_window,
        }
    }

    /// Runs a single sweep pass as of `now`.
    ///
    /// Takes the time explicitly so eviction is deterministic under test.
    pub async fn sweep(&self, now: SystemTime) -> SweepStats {
        let artifacts = self.index.evict_older_than(self.retention_window, now);
        let mut stats = SweepStats {
            evicted: artifacts.len(),
            delete_failures: 0,
        };

        for artifact in artifacts {
            if let Err(err) = self.store.delete(artifact).await {
                // One failed deletion must not abort the rest of the sweep.
                let dynerr: &dyn std::error::Error = &err;
                tracing::error!(error = dynerr, %artifact, "failed to delete evicted artifact");
                stats.delete_failures += 1;
            }
        }

        if stats.evicted > 0 {
            tracing::info!(
                evicted = stats.evicted,
                delete_failures = stats.delete_failures,
                "sweep complete"
            );
        }
        stats
    }

    /// Sweeps on a fixed interval until the task is dropped.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing is stale at startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.sweep(SystemTime::now()).await;
        }
    }
}
