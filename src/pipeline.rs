//! Assembles the fetcher, sender, confirmer, and retention sweeper into one
//! runnable unit sharing a single [`CancellationToken`].
//!
//! The multi-worker analogue of the teacher's single-worker
//! `OutboxProcessor`: `new`/`with_metrics`/`start` has the same shape, fanned
//! out across four `tokio::spawn`s instead of one.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::OutboxConfig;
use crate::confirmer::Confirmer;
use crate::fetcher::{AlwaysReady, Fetcher, ReadinessGate};
use crate::metrics::OutboxMetrics;
use crate::producer::RdKafkaProducer;
use crate::retention::RetentionSweeper;
use crate::sender::Sender;
use crate::store::PgRecordStore;
use crate::trace::OtelTracePropagator;

/// A running pipeline of background workers. Obtained from
/// [`OutboxPipelineBuilder::start`]; call [`OutboxPipeline::shutdown`] to
/// stop it.
pub struct OutboxPipeline {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    producer: Arc<RdKafkaProducer>,
}

impl OutboxPipeline {
    /// Signal cancellation to every worker and wait for them to drain,
    /// bounded by `deadline`, then close the producer — per §5, the
    /// producer is closed last so any submissions already in flight when
    /// cancellation fired get a chance to flush. Workers still running when
    /// the deadline elapses are left detached; their tasks keep running to
    /// completion in the background but are no longer awaited, and the
    /// producer is still closed with the same deadline regardless.
    pub async fn shutdown(self, deadline: std::time::Duration) {
        self.cancel.cancel();

        match tokio::time::timeout(deadline, join_all(self.handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "outbox worker task panicked");
                    }
                }
                info!("outbox pipeline workers shut down cleanly");
            }
            Err(_elapsed) => {
                warn!("outbox pipeline shutdown deadline elapsed, workers left to finish detached");
            }
        }

        self.producer.close(deadline).await;
        info!("outbox pipeline shut down");
    }
}

/// Builds and starts an [`OutboxPipeline`] from a [`PgRecordStore`], an
/// [`RdKafkaProducer`], and an [`OtelTracePropagator`] — the concrete
/// adapters this crate ships.
pub struct OutboxPipelineBuilder {
    store: Arc<PgRecordStore>,
    producer: Arc<RdKafkaProducer>,
    trace_propagator: Arc<OtelTracePropagator>,
    config: OutboxConfig,
    metrics: Option<OutboxMetrics>,
    readiness: Arc<dyn ReadinessGate>,
}

impl OutboxPipelineBuilder {
    pub fn new(
        store: Arc<PgRecordStore>,
        producer: Arc<RdKafkaProducer>,
        trace_propagator: Arc<OtelTracePropagator>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            producer,
            trace_propagator,
            config,
            metrics: None,
            readiness: Arc::new(AlwaysReady),
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_readiness_gate(mut self, readiness: Arc<dyn ReadinessGate>) -> Self {
        self.readiness = readiness;
        self
    }

    /// Wire the fetcher-sender-confirmer channels, spawn all four workers,
    /// and return a handle for the caller to hold the channel that feeds new
    /// records (see [`crate::facade::OutboxFacade`]) plus the running
    /// pipeline.
    pub fn start(self) -> (mpsc::Sender<crate::record::OutboxRecord>, OutboxPipeline) {
        let cancel = CancellationToken::new();

        let (entities_tx, entities_rx) = mpsc::channel(self.config.entities_channel_capacity);
        let (delivery_tx, delivery_rx) = mpsc::channel(self.config.delivery_channel_capacity);

        let mut fetcher = Fetcher::new(self.store.clone(), self.config.clone())
            .with_readiness_gate(self.readiness);
        let mut confirmer = Confirmer::new(self.store.clone(), self.config.clone());
        let sender = Sender::new(self.producer.clone(), self.trace_propagator.clone());
        let mut retention = RetentionSweeper::new(self.store.clone(), self.config.clone());

        if let Some(metrics) = self.metrics.clone() {
            fetcher = fetcher.with_metrics(metrics.clone());
            confirmer = confirmer.with_metrics(metrics.clone());
            retention = retention.with_metrics(metrics);
        }

        let fetcher_cancel = cancel.clone();
        let fetcher_tx = entities_tx.clone();
        let fetcher_handle =
            tokio::spawn(async move { fetcher.run(fetcher_tx, fetcher_cancel).await });

        let sender_cancel = cancel.clone();
        let sender_handle =
            tokio::spawn(async move { sender.run(entities_rx, delivery_tx, sender_cancel).await });

        let confirmer_cancel = cancel.clone();
        let confirmer_handle =
            tokio::spawn(async move { confirmer.run(delivery_rx, confirmer_cancel).await });

        let retention_cancel = cancel.clone();
        let retention_handle =
            tokio::spawn(async move { retention.run(retention_cancel).await });

        let pipeline = OutboxPipeline {
            cancel,
            handles: vec![
                fetcher_handle,
                sender_handle,
                confirmer_handle,
                retention_handle,
            ],
            producer: self.producer,
        };

        (entities_tx, pipeline)
    }
}
