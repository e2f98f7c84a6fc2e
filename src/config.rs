//! Tunables for the outbox pipeline.
//!
//! The specification fixes most lock durations "by design" and leaves only
//! `max-backoff` as a recognized runtime option. In practice a deployment
//! also wants to size channels and the retention horizon for its own load,
//! so every constant the design calls out is represented here with a default
//! equal to the value the design fixes.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for a running [`crate::pipeline::OutboxPipeline`].
///
/// Construct with [`OutboxConfig::default`] and override individual fields,
/// or load overrides from the environment with [`OutboxConfig::from_env`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Initial eligibility delay (`L0`): time after `create` before a record
    /// becomes claimable, giving the caller's transaction time to commit.
    #[serde(with = "duration_secs")]
    pub initial_eligibility_delay: Duration,

    /// Claim lock duration (`L_lock`): how long a `fetch_and_lock` winner
    /// holds the record before another instance may reclaim it.
    #[serde(with = "duration_secs")]
    pub lock_duration: Duration,

    /// Base backoff (`B0`) for the exponential schedule
    /// `min(B0 * 2^attempts, max_backoff)`.
    #[serde(with = "duration_secs")]
    pub base_backoff: Duration,

    /// Upper bound on exponential backoff between attempts. The one option
    /// the specification names as user-configurable (`max-backoff`).
    #[serde(with = "duration_secs", rename = "max_backoff")]
    pub max_backoff: Duration,

    /// Capacity of the channel between the fetcher/façade and the sender.
    pub entities_channel_capacity: usize,

    /// Capacity of the channel between the producer and the confirmer.
    pub delivery_channel_capacity: usize,

    /// Confirmer in-memory buffer capacity that triggers an immediate flush.
    pub confirmer_batch_capacity: usize,

    /// Confirmer flush tick period.
    #[serde(with = "duration_secs")]
    pub confirmer_flush_interval: Duration,

    /// Maximum number of delivery-batch flushes allowed to run concurrently.
    pub confirmer_max_concurrent_flushes: usize,

    /// Poll interval after the fetcher finds nothing claimable.
    #[serde(with = "duration_secs")]
    pub fetcher_idle_interval: Duration,

    /// Poll interval after the fetcher hits a transient storage error.
    #[serde(with = "duration_secs")]
    pub fetcher_error_interval: Duration,

    /// Bound on `SendFunc`'s wait for entities-channel capacity.
    #[serde(with = "duration_secs")]
    pub send_func_timeout: Duration,

    /// How long a `Sent` record is retained before the retention sweeper
    /// deletes it.
    #[serde(with = "duration_secs")]
    pub retention_horizon: Duration,

    /// Interval between retention sweeps.
    #[serde(with = "duration_secs")]
    pub retention_sweep_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            initial_eligibility_delay: Duration::from_secs(10),
            lock_duration: Duration::from_secs(30),
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(10 * 60 * 60),
            entities_channel_capacity: 100,
            delivery_channel_capacity: 1000,
            confirmer_batch_capacity: 100,
            confirmer_flush_interval: Duration::from_secs(2),
            confirmer_max_concurrent_flushes: 8,
            fetcher_idle_interval: Duration::from_secs(2),
            fetcher_error_interval: Duration::from_secs(5),
            send_func_timeout: Duration::from_secs(1),
            retention_horizon: Duration::from_secs(5 * 24 * 60 * 60),
            retention_sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl OutboxConfig {
    /// Load overrides from environment variables (e.g. `MAX_BACKOFF_SECS`),
    /// falling back to [`OutboxConfig::default`] for anything unset.
    ///
    /// Mirrors the host-level `envy`-based config loading used elsewhere in
    /// the surrounding service stack, but scoped to this library's own
    /// settings rather than the whole process configuration.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("OUTBOX_").from_env()
    }

    /// Compute the backoff delay for a record currently at `attempts_to_send`
    /// prior attempts, per `min(B0 * 2^attempts, max_backoff)`.
    pub fn backoff_for(&self, attempts_to_send: i64) -> Duration {
        let attempts = attempts_to_send.max(0) as u32;
        match 2u64.checked_pow(attempts) {
            Some(factor) => {
                let scaled = self.base_backoff.as_secs_f64() * factor as f64;
                Duration::from_secs_f64(scaled).min(self.max_backoff)
            }
            None => self.max_backoff,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(de)?;
        Ok(Duration::from_secs(secs))
    }
}
