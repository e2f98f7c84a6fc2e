//! Long-running worker that turns claimed records into broker submissions.
//!
//! The sender never reads or updates the record status. It is the single
//! writer to the producer; a submission-time error does not retry
//! in-process — the record's lock simply expires and the fetcher redelivers
//! it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::producer::{DeliveryEvent, OutboundMessage, ProducerPort};
use crate::record::OutboxRecord;
use crate::trace::TracePropagatorPort;

/// The sender loop described in design §4.5.
pub struct Sender<P: ProducerPort, T: TracePropagatorPort> {
    producer: Arc<P>,
    trace_propagator: Arc<T>,
}

impl<P: ProducerPort, T: TracePropagatorPort> Sender<P, T> {
    pub fn new(producer: Arc<P>, trace_propagator: Arc<T>) -> Self {
        Self {
            producer,
            trace_propagator,
        }
    }

    #[instrument(skip_all, name = "outbox.sender")]
    pub async fn run(
        &self,
        mut entities_rx: mpsc::Receiver<OutboxRecord>,
        delivery_tx: mpsc::Sender<DeliveryEvent>,
        cancel: CancellationToken,
    ) {
        info!("sender starting");

        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sender stopping on cancellation");
                    break;
                }
                record = entities_rx.recv() => match record {
                    Some(record) => record,
                    None => {
                        info!("entities channel closed, sender exiting");
                        break;
                    }
                }
            };

            let (span, broker_headers) = self
                .trace_propagator
                .start_producer_span(&record.headers, &record.topic, &record.id);
            let _entered = span.enter();

            let message = OutboundMessage {
                topic: record.topic.clone(),
                key: record.key.clone(),
                payload: record.payload.clone(),
                headers: broker_headers,
                correlation_token: record.id.clone(),
            };

            match self
                .producer
                .produce(message, delivery_tx.clone())
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    warn!(
                        record_id = %record.id,
                        error = %e,
                        "submission rejected, record will be redelivered after its lock expires"
                    );
                }
            }

            drop(_entered);
        }

        info!("sender stopped");
    }
}
