//! The outbox record: the single persistent entity this crate manages.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an [`OutboxRecord`].
///
/// `Processing` is the initial and in-flight state; `Sent` is terminal. A
/// record never transitions back from `Sent` to `Processing`. Stored at rest
/// as the literal strings `"PROCESSING"` / `"SENT"` in a plain `TEXT` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Processing,
    Sent,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Processing => "PROCESSING",
            RecordStatus::Sent => "SENT",
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(RecordStatus::Processing),
            "SENT" => Ok(RecordStatus::Sent),
            other => Err(format!("unrecognized outbox record status: {other}")),
        }
    }
}

/// One row of work: a pre-serialized, broker-ready event plus the bookkeeping
/// fields that make claiming and retrying it safe across competing worker
/// instances.
///
/// Records are created by [`crate::facade::OutboxFacade::create`] inside the
/// caller's own transaction, mutated only by the [`crate::store::RecordStore`]
/// on claim and on mark-sent, and identified everywhere by `id` — there is no
/// in-memory ownership graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Stable unique identifier, supplied by the caller (typically the event
    /// id). Serves as the broker-correlation token and the consumer-side
    /// dedup key.
    pub id: String,

    /// Pre-serialized event, broker-ready.
    pub payload: Vec<u8>,

    /// Broker partition key; determines ordering scope.
    pub key: String,

    /// Destination topic, chosen by the serializer from the event's
    /// self-describing metadata.
    pub topic: String,

    /// Free-form transport headers, including trace-context entries.
    pub headers: HashMap<String, String>,

    /// Current lifecycle state.
    pub status: RecordStatus,

    /// Immutable after insertion.
    pub created_at: DateTime<Utc>,

    /// Set when transitioning to `Sent`.
    pub sent_at: Option<DateTime<Utc>>,

    /// Until this time, the record is considered held by some sender.
    /// Cleared on transition to `Sent`.
    pub lock_expires_at: Option<DateTime<Utc>>,

    /// Earliest time the record is eligible to be picked up again. Cleared
    /// on transition to `Sent`.
    pub next_attempt_after: Option<DateTime<Utc>>,

    /// Incremented on every lock acquisition. Monotonically non-decreasing.
    pub attempts_to_send: i64,

    /// Incremented when marked `Sent`. Diagnostic only.
    pub confirmations: i64,
}

impl OutboxRecord {
    /// True iff this record is eligible to be claimed by `fetch_and_lock` at
    /// `now` — i.e. it satisfies invariant 4 of the data model.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == RecordStatus::Processing
            && self.lock_expires_at.is_some_and(|t| t < now)
            && self.next_attempt_after.is_some_and(|t| t < now)
    }
}
