//! Long-running worker that drains broker delivery events, batches
//! successes, and marks records as SENT.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::OutboxConfig;
use crate::metrics::OutboxMetrics;
use crate::producer::DeliveryEvent;
use crate::store::RecordStore;

/// The confirmer loop described in design §4.6: a bounded in-memory buffer
/// of delivery events plus a ticker, flushed on whichever trigger fires
/// first.
pub struct Confirmer<S: RecordStore> {
    store: Arc<S>,
    config: OutboxConfig,
    metrics: Option<OutboxMetrics>,
    flush_semaphore: Arc<Semaphore>,
}

impl<S: RecordStore + 'static> Confirmer<S> {
    pub fn new(store: Arc<S>, config: OutboxConfig) -> Self {
        let flush_semaphore = Arc::new(Semaphore::new(config.confirmer_max_concurrent_flushes));
        Self {
            store,
            config,
            metrics: None,
            flush_semaphore,
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[instrument(skip_all, name = "outbox.confirmer")]
    pub async fn run(
        &self,
        mut delivery_rx: mpsc::Receiver<DeliveryEvent>,
        cancel: CancellationToken,
    ) {
        info!("confirmer starting");

        let buffer = Arc::new(Mutex::new(Vec::with_capacity(self.config.confirmer_batch_capacity)));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut ticker = tokio::time::interval(self.config.confirmer_flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("confirmer stopping, flushing remaining buffer");
                    self.spawn_flush(&buffer, &mut in_flight, "shutdown").await;
                    break;
                }
                event = delivery_rx.recv() => {
                    match event {
                        Some(event) => {
                            let should_flush = {
                                let mut guard = buffer.lock().await;
                                guard.push(event);
                                guard.len() >= self.config.confirmer_batch_capacity
                            };
                            if should_flush {
                                self.spawn_flush(&buffer, &mut in_flight, "capacity").await;
                            }
                        }
                        None => {
                            info!("delivery channel closed, confirmer flushing and exiting");
                            self.spawn_flush(&buffer, &mut in_flight, "shutdown").await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.spawn_flush(&buffer, &mut in_flight, "tick").await;
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        info!("confirmer stopped");
    }

    /// Atomically snapshot the current buffer, hand it to a bounded worker,
    /// and reset. A no-op when the buffer is empty.
    async fn spawn_flush(
        &self,
        buffer: &Arc<Mutex<Vec<DeliveryEvent>>>,
        in_flight: &mut JoinSet<()>,
        trigger: &'static str,
    ) {
        let snapshot = {
            let mut guard = buffer.lock().await;
            if guard.is_empty() {
                return;
            }
            std::mem::take(&mut *guard)
        };

        if let Some(metrics) = &self.metrics {
            metrics.flushes_total.with_label_values(&[trigger]).inc();
        }

        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let semaphore = self.flush_semaphore.clone();

        in_flight.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("flush semaphore is never closed");
            flush_batch(store, snapshot, metrics).await;
        });
    }
}

/// The bounded per-flush worker: accept message-shaped, error-free,
/// non-empty-token delivery events; collect their ids; call `mark_sent`
/// once per flush.
async fn flush_batch<S: RecordStore + ?Sized>(
    store: Arc<S>,
    events: Vec<DeliveryEvent>,
    metrics: Option<OutboxMetrics>,
) {
    let mut accepted = Vec::with_capacity(events.len());

    for event in events {
        if let Some(err) = &event.transport_error {
            debug!(
                correlation_token = %event.correlation_token,
                error = %err,
                "skipping delivery event with transport error, will redeliver via fetcher"
            );
            if let Some(metrics) = &metrics {
                metrics
                    .delivery_events_skipped_total
                    .with_label_values(&["transport_error"])
                    .inc();
            }
            continue;
        }

        if event.correlation_token.is_empty() {
            warn!("skipping delivery event with missing correlation token");
            if let Some(metrics) = &metrics {
                metrics
                    .delivery_events_skipped_total
                    .with_label_values(&["malformed"])
                    .inc();
            }
            continue;
        }

        accepted.push(event.correlation_token);
    }

    if accepted.is_empty() {
        return;
    }

    let accepted_count = accepted.len();
    match store.mark_sent(&accepted).await {
        Ok(()) => {
            if let Some(metrics) = &metrics {
                metrics.confirmed_total.inc_by(accepted_count as u64);
            }
            debug!(count = accepted_count, "marked records sent");
        }
        Err(e) => {
            error!(
                error = %e,
                count = accepted_count,
                "failed to mark records sent, they will redeliver via fetcher after lock expiry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::OutboxResult;
    use crate::record::OutboxRecord;

    #[derive(Default)]
    struct RecordingStore {
        marked: Mutex<Vec<String>>,
        mark_sent_calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for RecordingStore {
        async fn create(
            &self,
            _payload: Vec<u8>,
            _id: String,
            _key: String,
            _topic: String,
            _headers: HashMap<String, String>,
        ) -> OutboxResult<OutboxRecord> {
            unimplemented!()
        }

        async fn fetch_and_lock(&self) -> OutboxResult<Option<OutboxRecord>> {
            Ok(None)
        }

        async fn mark_sent(&self, ids: &[String]) -> OutboxResult<()> {
            self.mark_sent_calls.fetch_add(1, Ordering::SeqCst);
            self.marked.lock().await.extend(ids.iter().cloned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn flushes_on_capacity_then_again_on_remainder_at_tick() {
        let store = Arc::new(RecordingStore::default());
        let mut config = OutboxConfig::default();
        config.confirmer_batch_capacity = 100;
        config.confirmer_flush_interval = StdDuration::from_millis(50);

        let confirmer = Confirmer::new(store.clone(), config);
        let (delivery_tx, delivery_rx) = mpsc::channel(300);
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { confirmer.run(delivery_rx, cancel_clone).await });

        for i in 0..250 {
            delivery_tx
                .send(DeliveryEvent {
                    correlation_token: format!("evt-{i}"),
                    transport_error: None,
                })
                .await
                .unwrap();
        }

        // Give the tick-triggered flush of the last 50 events time to land.
        tokio::time::sleep(StdDuration::from_millis(150)).await;

        cancel.cancel();
        drop(delivery_tx);
        handle.await.unwrap();

        let marked = store.marked.lock().await;
        assert_eq!(marked.len(), 250);
        assert!(store.mark_sent_calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn skips_transport_errors_and_empty_tokens() {
        let store = Arc::new(RecordingStore::default());
        let config = OutboxConfig::default();
        let confirmer = Confirmer::new(store.clone(), config);
        let (delivery_tx, delivery_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        delivery_tx
            .send(DeliveryEvent {
                correlation_token: "evt-good".into(),
                transport_error: None,
            })
            .await
            .unwrap();
        delivery_tx
            .send(DeliveryEvent {
                correlation_token: "evt-bad".into(),
                transport_error: Some("broker timeout".into()),
            })
            .await
            .unwrap();
        delivery_tx
            .send(DeliveryEvent {
                correlation_token: String::new(),
                transport_error: None,
            })
            .await
            .unwrap();
        drop(delivery_tx);

        confirmer.run(delivery_rx, cancel).await;

        let marked = store.marked.lock().await;
        assert_eq!(marked.as_slice(), ["evt-good"]);
    }
}
