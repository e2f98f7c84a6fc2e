//! Error types for the transactional outbox library.

use thiserror::Error;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
///
/// See the crate-level docs for which of these are logged-and-absorbed by
/// the pipeline versus surfaced to the caller of the façade.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Transient store unavailability. The fetcher sleeps and retries; the
    /// confirmer logs and retries on the next flush.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// `create` called twice with the same id. Never retried by the core;
    /// surfaced to the caller.
    #[error("duplicate outbox record id: {0}")]
    DuplicateId(String),

    /// `SendFunc`'s bounded wait expired. The record is still on disk and
    /// will be picked up by the fetcher.
    #[error("entities channel full, record will be redelivered by the fetcher")]
    ChannelFullTimeout,

    /// `SendFunc` was cancelled before it could send. Unlike
    /// [`OutboxError::ChannelFullTimeout`] this surfaces whatever the
    /// caller's own cancellation means to them; the record is still on disk
    /// either way.
    #[error("send was cancelled before the record reached the entities channel")]
    SendCancelled,

    /// Producer rejected the submission synchronously. Logged and dropped;
    /// redelivery happens through the fetcher.
    #[error("submission rejected by producer: {0}")]
    SubmissionError(String),

    /// Arrived via the delivery channel with a transport error attached.
    /// Logged and skipped; redelivery through the fetcher.
    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    /// The broker event was not message-shaped, or its opaque correlation
    /// token was missing or empty. Logged; not retryable.
    #[error("malformed delivery event: {0}")]
    MalformedDeliveryEvent(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("outbox error: {0}")]
    Other(#[from] anyhow::Error),
}
