//! Narrow outbound interface the sender depends on.
//!
//! The broker producer and the delivery-report machinery are kept behind
//! [`ProducerPort`] so the pipeline never depends on `rdkafka` directly; the
//! concrete [`RdKafkaProducer`] is one possible adapter, grounded on
//! `KafkaOutboxPublisher`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{OutboxError, OutboxResult};

/// One message submitted to the broker. Carries the opaque correlation
/// token (the record id) so the eventual [`DeliveryEvent`] can be tied back
/// to the originating record without the broker understanding the payload.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub correlation_token: String,
}

/// The asynchronous notification that a submission was either accepted on a
/// partition or failed in transit.
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    /// The opaque correlation token from the originating [`OutboundMessage`].
    pub correlation_token: String,
    /// Present iff the broker reported a transport failure for this
    /// submission.
    pub transport_error: Option<String>,
}

/// Narrow outbound interface to the broker.
#[async_trait]
pub trait ProducerPort: Send + Sync {
    /// Submit one message to the broker. Non-blocking: returns immediately
    /// on synchronous submission failure (queue full, invalid topic). On
    /// success, the broker is expected to later post exactly one
    /// [`DeliveryEvent`] onto `delivery_tx`.
    async fn produce(
        &self,
        message: OutboundMessage,
        delivery_tx: mpsc::Sender<DeliveryEvent>,
    ) -> OutboxResult<()>;

    /// Drain in-flight submissions with a bounded deadline.
    async fn close(&self, timeout: Duration);
}

/// [`ProducerPort`] backed by `rdkafka`'s future-producer API.
///
/// `FutureProducer::send` already returns a future resolving to the
/// delivery outcome, rather than invoking a broker-internal callback queue,
/// so `produce` spawns a task that awaits that future and forwards a
/// [`DeliveryEvent`] onto `delivery_tx` — the same "submit now, report
/// later" contract `ProducerPort` requires, reached without a hand-rolled
/// `rdkafka::ProducerContext`.
pub struct RdKafkaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl RdKafkaProducer {
    pub fn new(producer: FutureProducer, send_timeout: Duration) -> Self {
        Self {
            producer,
            send_timeout,
        }
    }

    fn build_headers(headers: &HashMap<String, String>) -> OwnedHeaders {
        let mut owned = OwnedHeaders::new();
        for (key, value) in headers {
            owned = owned.insert(Header {
                key,
                value: Some(value.as_bytes()),
            });
        }
        owned
    }
}

#[async_trait]
impl ProducerPort for RdKafkaProducer {
    async fn produce(
        &self,
        message: OutboundMessage,
        delivery_tx: mpsc::Sender<DeliveryEvent>,
    ) -> OutboxResult<()> {
        let record = FutureRecord::to(&message.topic)
            .key(&message.key)
            .payload(&message.payload)
            .headers(Self::build_headers(&message.headers));

        // `send` queues the message synchronously and returns a future that
        // only resolves once the broker has acknowledged or rejected it;
        // that future is awaited on a detached task so `produce` itself
        // stays non-blocking.
        let enqueue_result = self
            .producer
            .send_result(record)
            .map_err(|(err, _owned_record)| {
                OutboxError::SubmissionError(format!("kafka enqueue failed: {err}"))
            })?;

        let correlation_token = message.correlation_token;
        let send_timeout = self.send_timeout;

        tokio::spawn(async move {
            let delivery = tokio::time::timeout(send_timeout, enqueue_result).await;

            let event = match delivery {
                Ok(Ok(Ok((_partition, _offset)))) => DeliveryEvent {
                    correlation_token,
                    transport_error: None,
                },
                Ok(Ok(Err((err, _owned_message)))) => {
                    warn!(error = %err, "kafka delivery failed");
                    DeliveryEvent {
                        correlation_token,
                        transport_error: Some(err.to_string()),
                    }
                }
                Ok(Err(_cancelled)) => DeliveryEvent {
                    correlation_token,
                    transport_error: Some("delivery future was cancelled".to_string()),
                },
                Err(_elapsed) => DeliveryEvent {
                    correlation_token,
                    transport_error: Some("delivery timed out".to_string()),
                },
            };

            if delivery_tx.send(event).await.is_err() {
                warn!("delivery channel closed before delivery event could be posted");
            }
        });

        Ok(())
    }

    async fn close(&self, timeout: Duration) {
        info!(timeout_secs = timeout.as_secs(), "flushing kafka producer");
        self.producer.flush(Timeout::After(timeout));
    }
}
