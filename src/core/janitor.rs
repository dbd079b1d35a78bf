//! # Retention janitor.
//!
//! ```text
//! Idle ──(sweep_interval elapsed)──► Sweeping ──► purge_older_than(now - retention_age) ──► Idle
//! ```
//!
//! The timer is rearmed only after a sweep finishes, so a slow sweep delays the
//! next one instead of queueing extra sweeps. There is no way to trigger a sweep
//! early. Purge failures are logged and the janitor keeps running.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::messages::unix_now;
use crate::store::MessageLog;

pub(crate) struct Janitor {
    log: Arc<dyn MessageLog>,
    retention_age: Duration,
    sweep_interval: Duration,
}

impl Janitor {
    pub(crate) fn new(log: Arc<dyn MessageLog>, retention_age: Duration, sweep_interval: Duration) -> Self {
        Self {
            log,
            retention_age,
            sweep_interval,
        }
    }

    pub(crate) async fn run(self, token: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.sweep_interval) => {
                    self.sweep().await;
                }
            }
        }
        tracing::debug!("janitor stopped");
    }

    async fn sweep(&self) -> u64 {
        let age = i64::try_from(self.retention_age.as_secs()).unwrap_or(i64::MAX);
        purge(self.log.as_ref(), unix_now().saturating_sub(age)).await
    }
}

/// Best-effort purge: errors are logged and reported as zero removals.
pub(crate) async fn purge(log: &dyn MessageLog, threshold: i64) -> u64 {
    match log.purge_older_than(threshold).await {
        Ok(0) => {
            tracing::trace!(log = log.name(), threshold, "retention sweep: nothing expired");
            0
        }
        Ok(removed) => {
            tracing::info!(log = log.name(), threshold, removed, "retention sweep");
            removed
        }
        Err(err) => {
            tracing::warn!(log = log.name(), threshold, label = err.as_label(), "retention sweep failed: {err}");
            0
        }
    }
}
