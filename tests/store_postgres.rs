//! Scenarios requiring a live PostgreSQL instance. Run with:
//!
//! ```sh
//! DATABASE_URL=postgres://... cargo test --test store_postgres -- --ignored
//! ```

use std::collections::HashMap;

use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use transactional_outbox::{OutboxConfig, PgRecordStore, RecordStore};

async fn connect() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    PgPool::connect(&url).await.expect("failed to connect to test database")
}

/// Scenario S2: duplicate ids are rejected, never silently overwritten.
#[tokio::test]
#[ignore]
async fn create_rejects_duplicate_ids() {
    let pool = connect().await;
    let store = PgRecordStore::new(pool, OutboxConfig::default());
    store.run_migrations().await.unwrap();

    let id = format!("dup-{}", uuid::Uuid::new_v4());
    store
        .create(vec![1], id.clone(), "k".into(), "t".into(), HashMap::new())
        .await
        .unwrap();

    let result = store
        .create(vec![2], id.clone(), "k".into(), "t".into(), HashMap::new())
        .await;

    assert!(matches!(
        result,
        Err(transactional_outbox::OutboxError::DuplicateId(_))
    ));
}

/// Scenario S5: `fetch_and_lock` never returns the same row to two
/// concurrent callers (`FOR UPDATE SKIP LOCKED`).
#[tokio::test]
#[ignore]
async fn fetch_and_lock_is_safe_under_concurrent_callers() {
    let pool = connect().await;
    let mut config = OutboxConfig::default();
    config.initial_eligibility_delay = std::time::Duration::from_secs(0);
    let store = std::sync::Arc::new(PgRecordStore::new(pool, config));
    store.run_migrations().await.unwrap();

    for i in 0..20 {
        store
            .create(
                vec![i as u8],
                format!("concurrent-{i}"),
                "k".into(),
                "t".into(),
                HashMap::new(),
            )
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..5 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.fetch_and_lock().await.unwrap() }));
    }

    let mut claimed_ids = std::collections::HashSet::new();
    for handle in handles {
        if let Some(record) = handle.await.unwrap() {
            assert!(claimed_ids.insert(record.id), "the same record was claimed twice");
        }
    }
}

/// The retention sweeper only ever deletes `Sent` rows past the horizon.
#[tokio::test]
#[ignore]
async fn retention_sweep_deletes_only_old_sent_records() {
    let pool = connect().await;
    let store = PgRecordStore::new(pool, OutboxConfig::default());
    store.run_migrations().await.unwrap();

    let id = format!("retained-{}", uuid::Uuid::new_v4());
    store
        .create(vec![1], id.clone(), "k".into(), "t".into(), HashMap::new())
        .await
        .unwrap();
    store.mark_sent(&[id.clone()]).await.unwrap();

    let deleted = store.delete_retained_past(ChronoDuration::seconds(-1)).await.unwrap();
    assert!(deleted >= 1);
}

