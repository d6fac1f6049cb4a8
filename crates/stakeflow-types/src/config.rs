//! Configuration types for a Stakeflow engine.
//!
//! Every section has a `Default` built from [`crate::constants`] and is
//! `#[serde(default)]`, so a JSON document only needs the keys it overrides.
//! Durations are (de)serialized as integer milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{GridSpec, Result, StakeflowError, constants};

/// Serde adapter: `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Price feed health thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "duration_ms")]
    pub degraded_threshold: Duration,
    #[serde(with = "duration_ms")]
    pub critical_threshold: Duration,
    /// Continuous fresh-sample window required to leave `Critical`.
    #[serde(with = "duration_ms")]
    pub recovery_window: Duration,
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,
    /// Suggested retry delay returned with `PRICE_FEED_STALE`.
    #[serde(with = "duration_ms")]
    pub stale_retry_after: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: ms(constants::DEFAULT_DEGRADED_THRESHOLD_MS),
            critical_threshold: ms(constants::DEFAULT_CRITICAL_THRESHOLD_MS),
            recovery_window: ms(constants::DEFAULT_RECOVERY_WINDOW_MS),
            tick_interval: ms(constants::DEFAULT_HEALTH_TICK_MS),
            stale_retry_after: ms(constants::DEFAULT_STALE_RETRY_AFTER_MS),
        }
    }
}

/// Ingestion queue and batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub batch_size: usize,
    #[serde(with = "duration_ms")]
    pub batch_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub result_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: constants::DEFAULT_QUEUE_CAPACITY,
            batch_size: constants::DEFAULT_BATCH_SIZE,
            batch_timeout: ms(constants::DEFAULT_BATCH_TIMEOUT_MS),
            result_timeout: ms(constants::DEFAULT_RESULT_TIMEOUT_MS),
        }
    }
}

/// Store and writer actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    #[serde(with = "duration_ms")]
    pub busy_timeout: Duration,
    pub writer_channel_capacity: usize,
    pub flush_max_attempts: usize,
    #[serde(with = "duration_ms")]
    pub flush_retry_base: Duration,
    #[serde(with = "duration_ms")]
    pub flush_retry_max: Duration,
    pub notification_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            busy_timeout: ms(constants::DEFAULT_BUSY_TIMEOUT_MS),
            writer_channel_capacity: constants::DEFAULT_WRITER_CHANNEL_CAPACITY,
            flush_max_attempts: constants::DEFAULT_FLUSH_MAX_ATTEMPTS,
            flush_retry_base: ms(constants::DEFAULT_FLUSH_RETRY_BASE_MS),
            flush_retry_max: ms(constants::DEFAULT_FLUSH_RETRY_MAX_MS),
            notification_capacity: constants::DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

/// Resolution worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    pub max_stakes_per_cycle: usize,
    /// Price samples older than this are pruned from hot storage.
    #[serde(with = "duration_ms")]
    pub price_retention: Duration,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            interval: ms(constants::DEFAULT_RESOLUTION_INTERVAL_MS),
            max_stakes_per_cycle: constants::DEFAULT_RESOLUTION_MAX_STAKES,
            price_retention: ms(constants::DEFAULT_PRICE_RETENTION_MS),
        }
    }
}

/// Cold-storage archival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Verified-archived rows younger than this stay in hot storage.
    #[serde(with = "duration_ms")]
    pub hot_retention: Duration,
    pub upload_max_attempts: usize,
    #[serde(with = "duration_ms")]
    pub upload_retry_base: Duration,
    #[serde(with = "duration_ms")]
    pub upload_retry_max: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            hot_retention: ms(constants::DEFAULT_HOT_RETENTION_MS),
            upload_max_attempts: constants::DEFAULT_UPLOAD_MAX_ATTEMPTS,
            upload_retry_base: ms(constants::DEFAULT_UPLOAD_RETRY_BASE_MS),
            upload_retry_max: ms(constants::DEFAULT_UPLOAD_RETRY_MAX_MS),
        }
    }
}

/// Reconciliation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    #[serde(with = "duration_ms")]
    pub interval: Duration,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            interval: ms(constants::DEFAULT_INTEGRITY_INTERVAL_MS),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grid: GridSpec,
    pub health: HealthConfig,
    pub queue: QueueConfig,
    pub ledger: LedgerConfig,
    pub resolution: ResolutionConfig,
    pub archive: ArchiveConfig,
    pub integrity: IntegrityConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| StakeflowError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;

        let h = &self.health;
        if h.degraded_threshold.is_zero() {
            return Err(StakeflowError::Configuration(
                "health.degraded_threshold must be positive".into(),
            ));
        }
        if h.critical_threshold <= h.degraded_threshold {
            return Err(StakeflowError::Configuration(
                "health.critical_threshold must exceed degraded_threshold".into(),
            ));
        }
        if h.tick_interval.is_zero() {
            return Err(StakeflowError::Configuration(
                "health.tick_interval must be positive".into(),
            ));
        }

        let q = &self.queue;
        if q.capacity == 0 || q.batch_size == 0 {
            return Err(StakeflowError::Configuration(
                "queue.capacity and queue.batch_size must be positive".into(),
            ));
        }
        if q.batch_timeout.is_zero() || q.result_timeout.is_zero() {
            return Err(StakeflowError::Configuration(
                "queue timeouts must be positive".into(),
            ));
        }

        if self.ledger.writer_channel_capacity == 0 || self.ledger.flush_max_attempts == 0 {
            return Err(StakeflowError::Configuration(
                "ledger.writer_channel_capacity and flush_max_attempts must be positive".into(),
            ));
        }
        if self.resolution.interval.is_zero() || self.integrity.interval.is_zero() {
            return Err(StakeflowError::Configuration(
                "worker intervals must be positive".into(),
            ));
        }
        if self.archive.upload_max_attempts == 0 {
            return Err(StakeflowError::Configuration(
                "archive.upload_max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}
