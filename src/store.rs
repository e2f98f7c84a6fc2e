//! Atomic persistence and lock acquisition over outbox records.
//!
//! [`RecordStore`] is the only component allowed to mutate an
//! [`OutboxRecord`]. The PostgreSQL implementation expresses the data
//! model's claim discipline (data model invariants 4 and 5) as a row-level
//! lock taken with `FOR UPDATE SKIP LOCKED`, the same idiom
//! `outbox_publisher.rs`'s `poll_and_publish` uses for its batch scan,
//! narrowed here to a single-row atomic claim.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::config::OutboxConfig;
use crate::error::{OutboxError, OutboxResult};
use crate::record::{OutboxRecord, RecordStatus};

/// All atomic mutations of [`OutboxRecord`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record with `status = PROCESSING`. The caller is
    /// expected to perform this inside its own transaction; the store must
    /// not implicitly open or close one.
    ///
    /// Fails with [`OutboxError::DuplicateId`] if `id` already exists.
    async fn create(
        &self,
        payload: Vec<u8>,
        id: String,
        key: String,
        topic: String,
        headers: HashMap<String, String>,
    ) -> OutboxResult<OutboxRecord>;

    /// Atomically find and claim one claimable record, ordered by
    /// `(next_attempt_after asc, created_at asc)`. Returns `Ok(None)` — a
    /// distinct sentinel, not an error — when nothing is claimable.
    async fn fetch_and_lock(&self) -> OutboxResult<Option<OutboxRecord>>;

    /// Atomically transition every id in `ids` from `PROCESSING` to `SENT`.
    /// Idempotent: ids already `SENT`, or unknown, are silently unaffected.
    async fn mark_sent(&self, ids: &[String]) -> OutboxResult<()>;
}

/// `sqlx`/PostgreSQL-backed [`RecordStore`].
pub struct PgRecordStore {
    pool: PgPool,
    config: OutboxConfig,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, config: OutboxConfig) -> Self {
        Self { pool, config }
    }

    /// Run the embedded migrations (the `outbox` table plus its TTL and
    /// compound indexes). Idempotent; intended to run once at host startup.
    pub async fn run_migrations(&self) -> OutboxResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OutboxError::Other(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Delete `SENT` records whose `created_at` has aged past `horizon`.
    /// Called periodically by [`crate::retention::RetentionSweeper`] since
    /// PostgreSQL, unlike a document store, has no native TTL index.
    pub async fn delete_retained_past(
        &self,
        horizon: chrono::Duration,
    ) -> OutboxResult<u64> {
        let cutoff = Utc::now() - horizon;
        let result = sqlx::query("DELETE FROM outbox WHERE status = 'SENT' AND created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> OutboxResult<OutboxRecord> {
        let status_str: String = row.try_get("status")?;
        let status = status_str
            .parse::<RecordStatus>()
            .map_err(|e| OutboxError::Other(anyhow::anyhow!(e)))?;
        let headers: sqlx::types::Json<HashMap<String, String>> = row.try_get("headers")?;

        Ok(OutboxRecord {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
            key: row.try_get("key")?,
            topic: row.try_get("topic")?,
            headers: headers.0,
            status,
            created_at: row.try_get("created_at")?,
            sent_at: row.try_get("sent_at")?,
            lock_expires_at: row.try_get("lock_expires_at")?,
            next_attempt_after: row.try_get("next_attempt_after")?,
            attempts_to_send: row.try_get("attempts_to_send")?,
            confirmations: row.try_get("confirmations")?,
        })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create(
        &self,
        payload: Vec<u8>,
        id: String,
        key: String,
        topic: String,
        headers: HashMap<String, String>,
    ) -> OutboxResult<OutboxRecord> {
        let now = Utc::now();
        let eligible_at = now + self.config.initial_eligibility_delay;

        let row = sqlx::query(
            r#"
            INSERT INTO outbox (
                id, payload, key, topic, headers, status,
                created_at, sent_at, lock_expires_at, next_attempt_after,
                attempts_to_send, confirmations
            ) VALUES ($1, $2, $3, $4, $5, 'PROCESSING', $6, NULL, $7, $8, 0, 0)
            RETURNING
                id, payload, key, topic, headers, status,
                created_at, sent_at, lock_expires_at, next_attempt_after,
                attempts_to_send, confirmations
            "#,
        )
        .bind(&id)
        .bind(&payload)
        .bind(&key)
        .bind(&topic)
        .bind(sqlx::types::Json(&headers))
        .bind(now)
        .bind(eligible_at)
        .bind(eligible_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                OutboxError::DuplicateId(id.clone())
            }
            _ => OutboxError::Storage(e),
        })?;

        Self::row_to_record(&row)
    }

    async fn fetch_and_lock(&self) -> OutboxResult<Option<OutboxRecord>> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query(
            r#"
            SELECT
                id, payload, key, topic, headers, status,
                created_at, sent_at, lock_expires_at, next_attempt_after,
                attempts_to_send, confirmations
            FROM outbox
            WHERE status = 'PROCESSING'
              AND lock_expires_at < now()
              AND next_attempt_after < now()
            ORDER BY next_attempt_after ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let record = Self::row_to_record(&row)?;

        let now = Utc::now();
        let new_lock_expires_at = now + self.config.lock_duration;
        let new_next_attempt_after =
            now + chrono::Duration::from_std(self.config.backoff_for(record.attempts_to_send))
                .unwrap_or(chrono::Duration::zero());

        let updated = sqlx::query(
            r#"
            UPDATE outbox
            SET lock_expires_at = $1,
                next_attempt_after = $2,
                attempts_to_send = attempts_to_send + 1
            WHERE id = $3
            RETURNING
                id, payload, key, topic, headers, status,
                created_at, sent_at, lock_expires_at, next_attempt_after,
                attempts_to_send, confirmations
            "#,
        )
        .bind(new_lock_expires_at)
        .bind(new_next_attempt_after)
        .bind(&record.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(Self::row_to_record(&updated)?))
    }

    async fn mark_sent(&self, ids: &[String]) -> OutboxResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'SENT',
                sent_at = now(),
                lock_expires_at = NULL,
                next_attempt_after = NULL,
                confirmations = confirmations + 1
            WHERE id = ANY($1) AND status = 'PROCESSING'
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
