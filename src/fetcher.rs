//! Long-running worker that claims due records from the store and hands
//! them to the sender channel.
//!
//! The fetcher never produces to the broker and never updates the record
//! status — it is purely a claim-and-forward loop.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::OutboxConfig;
use crate::metrics::OutboxMetrics;
use crate::record::OutboxRecord;
use crate::store::RecordStore;

/// Hook for "wait, if required by external readiness, until allowed to
/// begin claiming" (design §4.4 step 2). The specification names this as a
/// readiness gate without defining its source; [`AlwaysReady`] is the
/// default when a host has no downstream-health signal to wire in.
#[async_trait]
pub trait ReadinessGate: Send + Sync {
    async fn wait_ready(&self);
}

/// Default [`ReadinessGate`] that never blocks.
#[derive(Default)]
pub struct AlwaysReady;

#[async_trait]
impl ReadinessGate for AlwaysReady {
    async fn wait_ready(&self) {}
}

/// The fetcher loop described in design §4.4.
pub struct Fetcher<S: RecordStore> {
    store: Arc<S>,
    readiness: Arc<dyn ReadinessGate>,
    config: OutboxConfig,
    metrics: Option<OutboxMetrics>,
}

impl<S: RecordStore> Fetcher<S> {
    pub fn new(store: Arc<S>, config: OutboxConfig) -> Self {
        Self {
            store,
            readiness: Arc::new(AlwaysReady),
            config,
            metrics: None,
        }
    }

    pub fn with_readiness_gate(mut self, readiness: Arc<dyn ReadinessGate>) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until `cancel` fires, performing a blocking send of each claimed
    /// record onto `entities_tx`. Blocking here is deliberate backpressure:
    /// when the sender is saturated, the fetcher stops draining the store,
    /// so the lock held by this fetcher expires naturally and another
    /// instance can reclaim the record.
    #[instrument(skip_all, name = "outbox.fetcher")]
    pub async fn run(&self, entities_tx: mpsc::Sender<OutboxRecord>, cancel: CancellationToken) {
        info!("fetcher starting");

        loop {
            if cancel.is_cancelled() {
                info!("fetcher stopping on cancellation");
                break;
            }

            self.readiness.wait_ready().await;

            match self.store.fetch_and_lock().await {
                Ok(Some(record)) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.claimed_total.inc();
                    }
                    debug!(record_id = %record.id, attempts = record.attempts_to_send, "claimed record");

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("fetcher stopping on cancellation while sending claimed record");
                            break;
                        }
                        send_result = entities_tx.send(record) => {
                            if send_result.is_err() {
                                warn!("entities channel closed, fetcher exiting");
                                break;
                            }
                        }
                    }

                    if let Some(metrics) = &self.metrics {
                        let depth = entities_tx.max_capacity() - entities_tx.capacity();
                        metrics.entities_channel_depth.set(depth as i64);
                    }
                }
                Ok(None) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.claim_empty_total.inc();
                    }
                    sleep_or_cancel(self.config.fetcher_idle_interval, &cancel).await;
                }
                Err(e) => {
                    error!(error = %e, "transient error fetching outbox record");
                    sleep_or_cancel(self.config.fetcher_error_interval, &cancel).await;
                }
            }
        }

        info!("fetcher stopped");
    }
}

async fn sleep_or_cancel(duration: std::time::Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::OutboxResult;
    use crate::record::RecordStatus;

    struct OnceStore {
        served: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for OnceStore {
        async fn create(
            &self,
            _payload: Vec<u8>,
            _id: String,
            _key: String,
            _topic: String,
            _headers: HashMap<String, String>,
        ) -> OutboxResult<OutboxRecord> {
            unimplemented!("not exercised by this test")
        }

        async fn fetch_and_lock(&self) -> OutboxResult<Option<OutboxRecord>> {
            if self.served.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(OutboxRecord {
                    id: "evt-1".into(),
                    payload: vec![1, 2, 3],
                    key: "k".into(),
                    topic: "t".into(),
                    headers: HashMap::new(),
                    status: RecordStatus::Processing,
                    created_at: chrono::Utc::now(),
                    sent_at: None,
                    lock_expires_at: Some(chrono::Utc::now()),
                    next_attempt_after: Some(chrono::Utc::now()),
                    attempts_to_send: 1,
                    confirmations: 0,
                }))
            } else {
                Ok(None)
            }
        }

        async fn mark_sent(&self, _ids: &[String]) -> OutboxResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn forwards_claimed_records_then_idles_until_cancelled() {
        let store = Arc::new(OnceStore {
            served: AtomicUsize::new(0),
        });
        let mut config = OutboxConfig::default();
        config.fetcher_idle_interval = std::time::Duration::from_millis(20);

        let fetcher = Fetcher::new(store, config);
        let (tx, mut rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { fetcher.run(tx, cancel_clone).await });

        let record = rx.recv().await.expect("fetcher should forward the claimed record");
        assert_eq!(record.id, "evt-1");

        cancel.cancel();
        handle.await.expect("fetcher task should join cleanly");
    }
}
