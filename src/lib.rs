//! # Transactional Outbox
//!
//! A library implementation of the transactional outbox pattern: callers
//! persist a broker-bound record inside their own database transaction, and
//! a three-stage background pipeline (fetcher, sender, confirmer) delivers
//! it to a partitioned message broker with at-least-once semantics.
//!
//! ## Why
//!
//! Writing to a database and publishing to a broker are two separate
//! systems with no shared transaction. Doing both directly risks either
//! losing the event (crash after commit, before publish) or duplicating it
//! (publish succeeds, commit fails). This crate keeps the write atomic by
//! writing only to the database, and moves delivery to a background
//! pipeline that keeps retrying a durable record until the broker confirms
//! it.
//!
//! ## Usage
//!
//! ### 1. Create a record inside your own transaction
//!
//! ```rust,no_run
//! use transactional_outbox::{CreateMessage, OutboxFacade, JsonSerializer, OtelTracePropagator, UuidMetadataPopulator, PgRecordStore};
//! use opentelemetry::Context;
//! use serde::Serialize;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct UserCreated {
//!     user_id: String,
//! }
//!
//! impl transactional_outbox::TopicAddressable for UserCreated {
//!     fn topic(&self) -> &str {
//!         "users.events"
//!     }
//! }
//!
//! async fn create_user(
//!     facade: &OutboxFacade<PgRecordStore, JsonSerializer, UserCreated>,
//!     user_id: String,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let send = facade
//!         .create(
//!             &Context::current(),
//!             CreateMessage {
//!                 event: UserCreated { user_id: user_id.clone() },
//!                 key: user_id,
//!                 headers: HashMap::new(),
//!                 event_type: "user.created".to_string(),
//!                 source: "user-service".to_string(),
//!             },
//!         )
//!         .await?;
//!
//!     // ... commit your own transaction here ...
//!
//!     send.send_uncancellable().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### 2. Start the background pipeline
//!
//! ```rust,no_run
//! use transactional_outbox::{OutboxConfig, OutboxPipelineBuilder, PgRecordStore, RdKafkaProducer, OtelTracePropagator};
//! use rdkafka::ClientConfig;
//! use sqlx::PgPool;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/mydb").await?;
//! let config = OutboxConfig::from_env().unwrap_or_default();
//!
//! let store = Arc::new(PgRecordStore::new(pool, config.clone()));
//! store.run_migrations().await?;
//!
//! let kafka_producer = ClientConfig::new()
//!     .set("bootstrap.servers", "localhost:9092")
//!     .set("enable.idempotence", "true")
//!     .create()?;
//! let producer = Arc::new(RdKafkaProducer::new(kafka_producer, Duration::from_secs(30)));
//! let trace_propagator = Arc::new(OtelTracePropagator::new());
//!
//! let (_entities_tx, pipeline) =
//!     OutboxPipelineBuilder::new(store, producer, trace_propagator, config).start();
//!
//! // ... run until shutdown signal ...
//! pipeline.shutdown(Duration::from_secs(30)).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod confirmer;
pub mod error;
pub mod facade;
pub mod fetcher;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod producer;
pub mod record;
pub mod retention;
pub mod sender;
pub mod serializer;
pub mod store;
pub mod trace;

pub use config::OutboxConfig;
pub use confirmer::Confirmer;
pub use error::{OutboxError, OutboxResult};
pub use facade::{CreateMessage, OutboxFacade, SendFunc};
pub use fetcher::{AlwaysReady, Fetcher, ReadinessGate};
pub use metadata::{EventMetadata, MetadataPopulator, UuidMetadataPopulator};
pub use metrics::OutboxMetrics;
pub use pipeline::{OutboxPipeline, OutboxPipelineBuilder};
pub use producer::{DeliveryEvent, OutboundMessage, ProducerPort, RdKafkaProducer};
pub use record::{OutboxRecord, RecordStatus};
pub use retention::RetentionSweeper;
pub use sender::Sender;
pub use serializer::{JsonSerializer, Serializer, TopicAddressable};
pub use store::{PgRecordStore, RecordStore};
pub use trace::{OtelTracePropagator, TracePropagatorPort};
