//! Save/restore trace context in a string→string header map, and start a
//! producer-kind span as a child of the context that created the record.
//!
//! Grounded on `opentelemetry-config::interceptors`'s `MetadataExtractor`/
//! `HeaderExtractor` pattern, adapted from gRPC metadata / HTTP headers to
//! the outbox's own `HashMap<String, String>` headers.

use std::collections::HashMap;

use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::{global, Context};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Save/restore trace context in a string→string header mapping; create a
/// producer-side span as a child of the context that created the record.
pub trait TracePropagatorPort: Send + Sync {
    /// Inject the ambient trace context into `headers` (creating entries as
    /// needed). Used by the façade so the record persists the trace that
    /// created it.
    fn save_trace_context(
        &self,
        ctx: &Context,
        headers: HashMap<String, String>,
    ) -> HashMap<String, String>;

    /// Restore a trace context from `headers`, start a new producer-kind
    /// span as its child, inject the new span's context into a cloned
    /// header map, and return the live span alongside the broker-ready
    /// headers.
    fn start_producer_span(
        &self,
        headers: &HashMap<String, String>,
        topic: &str,
        id: &str,
    ) -> (Span, HashMap<String, String>);
}

struct HeaderCarrier<'a>(&'a HashMap<String, String>);
struct HeaderCarrierMut<'a>(&'a mut HashMap<String, String>);

impl<'a> Extractor for HeaderCarrier<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

impl<'a> Injector for HeaderCarrierMut<'a> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

/// [`TracePropagatorPort`] backed by the global `opentelemetry` text-map
/// propagator, the same propagator `opentelemetry_config::init_tracing`
/// installs (`TraceContextPropagator`) at the host level.
#[derive(Default)]
pub struct OtelTracePropagator;

impl OtelTracePropagator {
    pub fn new() -> Self {
        Self
    }
}

impl TracePropagatorPort for OtelTracePropagator {
    fn save_trace_context(
        &self,
        ctx: &Context,
        mut headers: HashMap<String, String>,
    ) -> HashMap<String, String> {
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(ctx, &mut HeaderCarrierMut(&mut headers));
        });
        headers
    }

    fn start_producer_span(
        &self,
        headers: &HashMap<String, String>,
        topic: &str,
        id: &str,
    ) -> (Span, HashMap<String, String>) {
        let parent_ctx = global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderCarrier(headers))
        });

        let span = tracing::info_span!(
            "outbox.produce",
            otel.kind = "producer",
            messaging.destination = %topic,
            messaging.message_id = %id,
        );
        span.set_parent(parent_ctx.clone());

        let mut broker_headers = headers.clone();
        let span_ctx = span.context();
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&span_ctx, &mut HeaderCarrierMut(&mut broker_headers));
        });

        (span, broker_headers)
    }
}
