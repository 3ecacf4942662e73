//! Lease reaper for jobs whose worker vanished.
//!
//! A running job carries a lease that its worker renews while the pipeline
//! runs. If the worker process dies the lease stops moving; the reaper finds
//! such jobs and fails them, so no job stays `running` until its TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;

use super::store::{JobStore, StoreError};

/// Error recorded on a job failed by the reaper.
pub const LEASE_EXPIRED_ERROR: &str = "worker lease expired before the job finished";

/// Periodically fails running jobs whose lease has lapsed.
pub struct LeaseReaper {
    store: Arc<dyn JobStore>,
    interval: Duration,
    metrics: MetricsCollector,
}

impl LeaseReaper {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            metrics: MetricsCollector::new(),
        }
    }

    /// Runs sweeps every `interval` until the shutdown signal arrives.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        warn!(error = %e, "Lease sweep failed");
                    }
                }
            }
        }

        debug!("Lease reaper stopped");
    }

    /// Fails every job whose lease lapsed at or before `now`.
    ///
    /// Returns the number of jobs failed. A job renewed or finished between
    /// the scan and the write is left alone.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut reaped = 0;

        for job_id in self.store.lapsed_leases(now).await? {
            if self
                .store
                .fail_lapsed(job_id, now, LEASE_EXPIRED_ERROR)
                .await?
            {
                info!(job_id = %job_id, "Failed job after its lease expired");
                reaped += 1;
            }
        }

        if reaped > 0 {
            self.metrics.record_leases_reaped(reaped);
        }
        Ok(reaped)
    }
}
