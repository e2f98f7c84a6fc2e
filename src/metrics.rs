//! Prometheus metrics for the outbox pipeline.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};
use tracing::warn;

/// Metrics shared by the fetcher, sender, and confirmer of one
/// [`crate::pipeline::OutboxPipeline`].
#[derive(Clone)]
pub struct OutboxMetrics {
    /// Number of records the fetcher successfully claimed.
    pub claimed_total: IntCounter,
    /// Number of `fetch_and_lock` calls that found nothing claimable.
    pub claim_empty_total: IntCounter,
    /// Number of records successfully marked `Sent`.
    pub confirmed_total: IntCounter,
    /// Number of confirmer flushes, grouped by trigger (`capacity` / `tick` / `shutdown`).
    pub flushes_total: IntCounterVec,
    /// Number of delivery events skipped as malformed or carrying a transport error.
    pub delivery_events_skipped_total: IntCounterVec,
    /// Number of records deleted by the retention sweeper.
    pub retention_deleted_total: IntCounter,
    /// Current depth of the entities channel, sampled opportunistically.
    pub entities_channel_depth: IntGauge,
}

impl OutboxMetrics {
    /// Register this pipeline's metrics under `service` as a constant label,
    /// the same convention `transactional_outbox::metrics::OutboxMetrics`
    /// and `resilience::metrics` use.
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let claimed_total = IntCounter::with_opts(
            Opts::new("outbox_claimed_total", "Outbox records claimed by the fetcher")
                .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_claimed_total");

        let claim_empty_total = IntCounter::with_opts(
            Opts::new(
                "outbox_claim_empty_total",
                "fetch_and_lock calls that found no claimable record",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_claim_empty_total");

        let confirmed_total = IntCounter::with_opts(
            Opts::new("outbox_confirmed_total", "Outbox records marked SENT")
                .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_confirmed_total");

        let flushes_total = IntCounterVec::new(
            Opts::new("outbox_confirmer_flushes_total", "Confirmer flushes by trigger")
                .const_label("service", service.to_string()),
            &["trigger"],
        )
        .expect("valid metric opts for outbox_confirmer_flushes_total");

        let delivery_events_skipped_total = IntCounterVec::new(
            Opts::new(
                "outbox_delivery_events_skipped_total",
                "Delivery events skipped by the confirmer, by reason",
            )
            .const_label("service", service.to_string()),
            &["reason"],
        )
        .expect("valid metric opts for outbox_delivery_events_skipped_total");

        let retention_deleted_total = IntCounter::with_opts(
            Opts::new(
                "outbox_retention_deleted_total",
                "SENT records deleted once past the retention horizon",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_retention_deleted_total");

        let entities_channel_depth = IntGauge::with_opts(
            Opts::new(
                "outbox_entities_channel_depth",
                "Sampled depth of the fetcher-to-sender channel",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_entities_channel_depth");

        for metric in [
            Box::new(claimed_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(claim_empty_total.clone()),
            Box::new(confirmed_total.clone()),
            Box::new(flushes_total.clone()),
            Box::new(delivery_events_skipped_total.clone()),
            Box::new(retention_deleted_total.clone()),
            Box::new(entities_channel_depth.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("failed to register outbox metric: {e}");
            }
        }

        Self {
            claimed_total,
            claim_empty_total,
            confirmed_total,
            flushes_total,
            delivery_events_skipped_total,
            retention_deleted_total,
            entities_channel_depth,
        }
    }
}
