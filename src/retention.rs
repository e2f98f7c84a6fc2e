//! Periodic deletion of `Sent` records past the retention horizon.
//!
//! PostgreSQL has no native TTL index the way a document store would, so
//! retention here is an explicit background sweep rather than a passive
//! expiry policy.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::OutboxConfig;
use crate::metrics::OutboxMetrics;
use crate::store::PgRecordStore;

/// Background task that periodically deletes `Sent` records older than
/// [`OutboxConfig::retention_horizon`].
pub struct RetentionSweeper {
    store: Arc<PgRecordStore>,
    config: OutboxConfig,
    metrics: Option<OutboxMetrics>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<PgRecordStore>, config: OutboxConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[instrument(skip_all, name = "outbox.retention_sweeper")]
    pub async fn run(&self, cancel: CancellationToken) {
        info!("retention sweeper starting");

        let mut ticker = tokio::time::interval(self.config.retention_sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }

        info!("retention sweeper stopped");
    }

    async fn sweep_once(&self) {
        let horizon = match chrono::Duration::from_std(self.config.retention_horizon) {
            Ok(horizon) => horizon,
            Err(e) => {
                error!(error = %e, "retention horizon out of range, skipping sweep");
                return;
            }
        };

        match self.store.delete_retained_past(horizon).await {
            Ok(deleted) => {
                if deleted > 0 {
                    debug!(deleted, "retention sweep deleted sent records");
                }
                if let Some(metrics) = &self.metrics {
                    metrics.retention_deleted_total.inc_by(deleted);
                }
            }
            Err(e) => error!(error = %e, "retention sweep failed"),
        }
    }
}
