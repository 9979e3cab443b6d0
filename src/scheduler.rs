//! Fixed-interval delivery and liveness cycles.
//!
//! Cycles always run on schedule. A delivery cycle snapshots the cache and
//! dispatches one push per device onto its own task group, capped by a
//! per-cycle semaphore; the scheduler does not wait for the group before the
//! next tick, so slow cycles may overlap.

use crate::cache::ReadingCache;
use crate::config::{Settings, format_duration};
use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::enrollment::EnrollmentSet;
use crate::liveness::{self, LivenessCounts, LivenessTable};
use crate::sink::StatusSink;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Result of one delivery cycle once all its pushes have finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Scheduler {
    cache: Arc<ReadingCache>,
    liveness: Arc<LivenessTable>,
    enrolled: Arc<EnrollmentSet>,
    client: Arc<DeliveryClient>,
    sink: Arc<dyn StatusSink>,
    settings: Arc<Settings>,
}

impl Scheduler {
    /// Create a scheduler over the shared gateway state.
    ///
    /// # Arguments
    /// * `cache` - Newest reading per sensor, snapshotted by each delivery cycle
    /// * `liveness` - Last-seen table consulted by each liveness cycle
    /// * `enrolled` - Sensors counted towards the liveness total
    /// * `client` - Performs and reports one push per cached reading
    /// * `sink` - Receives cycle progress and liveness counts
    /// * `settings` - Interval, warm-up, online timeout and concurrency cap
    pub fn new(
        cache: Arc<ReadingCache>,
        liveness: Arc<LivenessTable>,
        enrolled: Arc<EnrollmentSet>,
        client: Arc<DeliveryClient>,
        sink: Arc<dyn StatusSink>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            cache,
            liveness,
            enrolled,
            client,
            sink,
            settings,
        }
    }

    /// Snapshot the cache and start one push per device.
    ///
    /// The cache lock is released before any push starts.
    pub fn dispatch_cycle(&self) -> JoinSet<DeliveryOutcome> {
        let snapshot = self.cache.snapshot_all();
        let mut pushes = JoinSet::new();

        if snapshot.is_empty() {
            self.sink.append_log("No data to sync");
            return pushes;
        }
        self.sink
            .append_log(&format!("Syncing {} sensor(s)", snapshot.len()));

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_pushes.max(1)));
        for (identity, reading) in snapshot {
            let client = self.client.clone();
            let permits = permits.clone();
            pushes.spawn(async move {
                // The semaphore is never closed, so acquiring only waits.
                let _permit = permits.acquire_owned().await;
                client.push(&identity, &reading).await
            });
        }
        pushes
    }

    /// Dispatch a cycle and drain it in the background.
    pub fn spawn_cycle(&self) -> JoinHandle<CycleSummary> {
        let mut pushes = self.dispatch_cycle();
        tokio::spawn(async move {
            let mut summary = CycleSummary::default();
            while let Some(result) = pushes.join_next().await {
                match result {
                    Ok(outcome) if outcome.is_success() => summary.delivered += 1,
                    Ok(_) => summary.failed += 1,
                    Err(e) => {
                        tracing::error!(error = %e, "push task failed");
                        summary.failed += 1;
                    }
                }
            }
            if summary.delivered + summary.failed > 0 {
                tracing::info!(
                    delivered = summary.delivered,
                    failed = summary.failed,
                    "sync cycle finished"
                );
            }
            summary
        })
    }

    /// Warm up, run the first cycle, then one cycle per sync interval. Never returns.
    pub async fn run_delivery(self: Arc<Self>) {
        let period = self.settings.sync_interval;
        self.sink.append_log(&format!(
            "Automatic sync every {}",
            format_duration(period)
        ));

        tokio::time::sleep(self.settings.warmup).await;
        self.sink.append_log("Running first sync...");
        self.spawn_cycle();

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.sink.append_log("Starting scheduled sync...");
            self.spawn_cycle();
        }
    }

    /// Re-classify liveness once per sync interval. Never returns.
    pub async fn run_liveness(self: Arc<Self>) {
        let period = self.settings.sync_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.report_liveness();
        }
    }

    pub fn report_liveness(&self) -> LivenessCounts {
        liveness::report(
            &self.liveness,
            &self.enrolled,
            self.sink.as_ref(),
            Instant::now(),
            self.settings.online_timeout,
        )
    }
}
