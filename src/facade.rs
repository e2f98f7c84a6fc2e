//! The public write API: serialize an event, persist a record in the
//! caller's transaction, and return a deferred "nudge" function.
//!
//! Returning a deferred [`SendFunc`] rather than sending immediately keeps
//! the write side correct even when the caller forgets to invoke it — the
//! fetcher is the safety net — and keeps latency low when the caller
//! remembers to call it right after committing.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{OutboxError, OutboxResult};
use crate::metadata::MetadataPopulator;
use crate::record::{OutboxRecord, RecordStatus};
use crate::serializer::{Serializer, TopicAddressable};
use crate::store::RecordStore;
use crate::trace::TracePropagatorPort;

/// The inbound shape of a write: the domain event plus its partition key
/// and any caller-supplied headers.
pub struct CreateMessage<E> {
    pub event: E,
    pub key: String,
    pub headers: HashMap<String, String>,
    pub event_type: String,
    pub source: String,
}

/// The deferred nudge returned by [`OutboxFacade::create`]. Call
/// [`SendFunc::send`] only after the caller's own transaction commits.
pub struct SendFunc {
    record: OutboxRecord,
    entities_tx: mpsc::Sender<OutboxRecord>,
    timeout: Duration,
}

impl SendFunc {
    /// Perform a bounded-wait send of the record to the entities channel.
    /// On `cancel` firing first, returns [`OutboxError::SendCancelled`]; on
    /// the bound elapsing first, returns
    /// [`OutboxError::ChannelFullTimeout`] — in both cases the record is
    /// still on disk and will be delivered by the fetcher regardless.
    pub async fn send(self, cancel: &CancellationToken) -> OutboxResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OutboxError::SendCancelled),
            result = self.entities_tx.send(self.record) => {
                result.map_err(|_| OutboxError::ChannelFullTimeout)
            }
            _ = tokio::time::sleep(self.timeout) => Err(OutboxError::ChannelFullTimeout),
        }
    }

    /// Convenience for hosts with no cancellation signal of their own.
    pub async fn send_uncancellable(self) -> OutboxResult<()> {
        self.send(&CancellationToken::new()).await
    }
}

/// The public write API of the outbox core.
pub struct OutboxFacade<S, Se, E>
where
    S: RecordStore,
    Se: Serializer<E>,
    E: TopicAddressable + Send + Sync,
{
    store: Arc<S>,
    serializer: Arc<Se>,
    trace_propagator: Arc<dyn TracePropagatorPort>,
    metadata_populator: Arc<dyn MetadataPopulator>,
    entities_tx: mpsc::Sender<OutboxRecord>,
    send_timeout: Duration,
    _event: PhantomData<fn() -> E>,
}

impl<S, Se, E> OutboxFacade<S, Se, E>
where
    S: RecordStore,
    Se: Serializer<E>,
    E: TopicAddressable + Send + Sync,
{
    pub fn new(
        store: Arc<S>,
        serializer: Arc<Se>,
        trace_propagator: Arc<dyn TracePropagatorPort>,
        metadata_populator: Arc<dyn MetadataPopulator>,
        entities_tx: mpsc::Sender<OutboxRecord>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            serializer,
            trace_propagator,
            metadata_populator,
            entities_tx,
            send_timeout,
            _event: PhantomData,
        }
    }

    /// Populate metadata, serialize the event, persist the record inside
    /// the caller's transaction (i.e. `store` must itself route to that
    /// transaction), and return a deferred [`SendFunc`].
    pub async fn create(&self, ctx: &Context, message: CreateMessage<E>) -> OutboxResult<SendFunc> {
        let metadata = self
            .metadata_populator
            .populate_metadata(&message.event_type, &message.source)
            .await;

        let headers = self
            .trace_propagator
            .save_trace_context(ctx, message.headers);

        let (payload, topic) = self.serializer.serialize(&message.event).await?;

        let record = self
            .store
            .create(payload, metadata.id, message.key, topic, headers)
            .await?;

        debug_assert_eq!(record.status, RecordStatus::Processing);

        Ok(SendFunc {
            record,
            entities_tx: self.entities_tx.clone(),
            timeout: self.send_timeout,
        })
    }
}
