//! End-to-end pipeline tests wiring the fetcher, sender, and confirmer
//! together against in-memory fakes. No live database or broker required.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use transactional_outbox::{
    Confirmer, DeliveryEvent, Fetcher, OutboundMessage, OutboxConfig, OutboxRecord, OutboxResult,
    OtelTracePropagator, ProducerPort, RecordStatus, RecordStore, Sender,
};

#[derive(Default)]
struct FakeStore {
    records: Mutex<HashMap<String, OutboxRecord>>,
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn create(
        &self,
        payload: Vec<u8>,
        id: String,
        key: String,
        topic: String,
        headers: HashMap<String, String>,
    ) -> OutboxResult<OutboxRecord> {
        let now = Utc::now();
        let record = OutboxRecord {
            id: id.clone(),
            payload,
            key,
            topic,
            headers,
            status: RecordStatus::Processing,
            created_at: now,
            sent_at: None,
            // Eligible immediately so tests don't have to wait out L0.
            lock_expires_at: Some(now - chrono::Duration::seconds(1)),
            next_attempt_after: Some(now - chrono::Duration::seconds(1)),
            attempts_to_send: 0,
            confirmations: 0,
        };
        self.records.lock().await.insert(id, record.clone());
        Ok(record)
    }

    async fn fetch_and_lock(&self) -> OutboxResult<Option<OutboxRecord>> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let claimable_id = records
            .values()
            .filter(|r| r.is_claimable(now))
            .min_by_key(|r| r.next_attempt_after)
            .map(|r| r.id.clone());

        let Some(id) = claimable_id else {
            return Ok(None);
        };

        let record = records.get_mut(&id).unwrap();
        record.lock_expires_at = Some(now + chrono::Duration::milliseconds(200));
        record.next_attempt_after = Some(now + chrono::Duration::milliseconds(400));
        record.attempts_to_send += 1;
        Ok(Some(record.clone()))
    }

    async fn mark_sent(&self, ids: &[String]) -> OutboxResult<()> {
        let mut records = self.records.lock().await;
        for id in ids {
            if let Some(record) = records.get_mut(id) {
                record.status = RecordStatus::Sent;
                record.sent_at = Some(Utc::now());
                record.lock_expires_at = None;
                record.next_attempt_after = None;
                record.confirmations += 1;
            }
        }
        Ok(())
    }
}

struct FakeProducer {
    fail_ids: Vec<String>,
    attempts: AtomicUsize,
}

#[async_trait]
impl ProducerPort for FakeProducer {
    async fn produce(
        &self,
        message: OutboundMessage,
        delivery_tx: mpsc::Sender<DeliveryEvent>,
    ) -> OutboxResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self.fail_ids.contains(&message.correlation_token);
        tokio::spawn(async move {
            let _ = delivery_tx
                .send(DeliveryEvent {
                    correlation_token: message.correlation_token,
                    transport_error: should_fail.then(|| "simulated broker timeout".to_string()),
                })
                .await;
        });
        Ok(())
    }

    async fn close(&self, _timeout: Duration) {}
}

/// Scenario S1: a record created, claimed, sent, and confirmed end to end.
#[tokio::test]
async fn happy_path_record_is_claimed_sent_and_marked_sent() {
    let store = Arc::new(FakeStore::default());
    store
        .create(vec![1, 2, 3], "evt-1".into(), "key-1".into(), "topic-1".into(), HashMap::new())
        .await
        .unwrap();

    let producer = Arc::new(FakeProducer {
        fail_ids: vec![],
        attempts: AtomicUsize::new(0),
    });
    let trace = Arc::new(OtelTracePropagator::new());

    let mut config = OutboxConfig::default();
    config.fetcher_idle_interval = Duration::from_millis(10);
    config.confirmer_flush_interval = Duration::from_millis(20);
    config.confirmer_batch_capacity = 10;

    let fetcher = Fetcher::new(store.clone(), config.clone());
    let sender = Sender::new(producer, trace);
    let confirmer = Confirmer::new(store.clone(), config);

    let (entities_tx, entities_rx) = mpsc::channel(10);
    let (delivery_tx, delivery_rx) = mpsc::channel(10);
    let cancel = CancellationToken::new();

    let fetcher_cancel = cancel.clone();
    let fetcher_handle = tokio::spawn(async move { fetcher.run(entities_tx, fetcher_cancel).await });

    let sender_cancel = cancel.clone();
    let sender_handle =
        tokio::spawn(async move { sender.run(entities_rx, delivery_tx, sender_cancel).await });

    let confirmer_cancel = cancel.clone();
    let confirmer_handle =
        tokio::spawn(async move { confirmer.run(delivery_rx, confirmer_cancel).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    fetcher_handle.await.unwrap();
    sender_handle.await.unwrap();
    confirmer_handle.await.unwrap();

    let records = store.records.lock().await;
    let record = records.get("evt-1").unwrap();
    assert_eq!(record.status, RecordStatus::Sent);
    assert_eq!(record.confirmations, 1);
}

/// Scenario S3: a transport failure leaves the record unconfirmed; once its
/// lock expires the fetcher reclaims and redelivers it.
#[tokio::test]
async fn transport_failure_is_redelivered_after_lock_expiry() {
    let store = Arc::new(FakeStore::default());
    store
        .create(vec![9], "evt-2".into(), "key-2".into(), "topic-2".into(), HashMap::new())
        .await
        .unwrap();

    let producer = Arc::new(FakeProducer {
        fail_ids: vec!["evt-2".to_string()],
        attempts: AtomicUsize::new(0),
    });
    let trace = Arc::new(OtelTracePropagator::new());

    let mut config = OutboxConfig::default();
    config.fetcher_idle_interval = Duration::from_millis(10);
    config.confirmer_flush_interval = Duration::from_millis(20);

    let fetcher = Fetcher::new(store.clone(), config.clone());
    let sender = Sender::new(producer.clone(), trace);
    let confirmer = Confirmer::new(store.clone(), config);

    let (entities_tx, entities_rx) = mpsc::channel(10);
    let (delivery_tx, delivery_rx) = mpsc::channel(10);
    let cancel = CancellationToken::new();

    let fetcher_cancel = cancel.clone();
    let fetcher_handle = tokio::spawn(async move { fetcher.run(entities_tx, fetcher_cancel).await });
    let sender_cancel = cancel.clone();
    let sender_handle =
        tokio::spawn(async move { sender.run(entities_rx, delivery_tx, sender_cancel).await });
    let confirmer_cancel = cancel.clone();
    let confirmer_handle =
        tokio::spawn(async move { confirmer.run(delivery_rx, confirmer_cancel).await });

    // Long enough for at least two claim cycles (lock expires at 200ms).
    tokio::time::sleep(Duration::from_millis(700)).await;
    cancel.cancel();

    fetcher_handle.await.unwrap();
    sender_handle.await.unwrap();
    confirmer_handle.await.unwrap();

    let records = store.records.lock().await;
    let record = records.get("evt-2").unwrap();
    assert_eq!(record.status, RecordStatus::Processing);
    assert!(record.attempts_to_send >= 2, "expected redelivery after lock expiry, got {} attempts", record.attempts_to_send);
    assert!(producer.attempts.load(Ordering::SeqCst) >= 2);
}
