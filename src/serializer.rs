//! Serialization of event payloads into broker-ready bytes plus a topic.
//!
//! Out of scope per the design (the event is self-describing and knows its
//! own destination); this module only defines the port and a JSON adapter
//! so the rest of the crate is independently testable.

use async_trait::async_trait;

use crate::error::OutboxResult;

/// An event that knows which topic it belongs on.
pub trait TopicAddressable {
    fn topic(&self) -> &str;
}

/// `Serialize(event) -> (bytes, topic)`. Must be deterministic given the
/// event.
#[async_trait]
pub trait Serializer<E>: Send + Sync
where
    E: Send + Sync,
{
    async fn serialize(&self, event: &E) -> OutboxResult<(Vec<u8>, String)>;
}

/// [`Serializer`] for any `E: serde::Serialize + TopicAddressable`, grounded
/// on `KafkaOutboxPublisher::get_topic`'s "the event is self-describing"
/// requirement.
#[derive(Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<E> Serializer<E> for JsonSerializer
where
    E: serde::Serialize + TopicAddressable + Send + Sync,
{
    async fn serialize(&self, event: &E) -> OutboxResult<(Vec<u8>, String)> {
        let bytes = serde_json::to_vec(event)?;
        Ok((bytes, event.topic().to_string()))
    }
}
