//! System-wide constants and defaults for Stakeflow.

/// Default width of a grid time column in milliseconds.
pub const DEFAULT_COLUMN_WIDTH_MS: u64 = 5_000;

/// Default height of a grid price row (whole price units).
pub const DEFAULT_ROW_HEIGHT: i64 = 10;

// --- Price feed health ---

/// Sample age at which the feed becomes `Degraded`.
pub const DEFAULT_DEGRADED_THRESHOLD_MS: u64 = 2_000;

/// Sample age at which the feed becomes `Critical`.
pub const DEFAULT_CRITICAL_THRESHOLD_MS: u64 = 5_000;

/// Continuous fresh-sample window required to leave `Critical`.
pub const DEFAULT_RECOVERY_WINDOW_MS: u64 = 10_000;

/// Health re-evaluation period.
pub const DEFAULT_HEALTH_TICK_MS: u64 = 1_000;

/// Retry delay suggested to callers rejected for a stale feed.
pub const DEFAULT_STALE_RETRY_AFTER_MS: u64 = 5_000;

// --- Ingestion queue ---

/// Bounded queue capacity (a few seconds of peak traffic).
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Size trigger for a batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Time trigger for a batch flush, measured from the first unflushed item.
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 100;

/// How long a caller waits for its batch before getting `timeout`.
pub const DEFAULT_RESULT_TIMEOUT_MS: u64 = 5_000;

// --- Ledger writer ---

/// Capacity of the writer actor's command channel.
pub const DEFAULT_WRITER_CHANNEL_CAPACITY: usize = 1_024;

/// SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Attempts for a batch transaction hitting a transient busy/locked store.
pub const DEFAULT_FLUSH_MAX_ATTEMPTS: usize = 3;

/// Base backoff between batch transaction attempts.
pub const DEFAULT_FLUSH_RETRY_BASE_MS: u64 = 10;

/// Backoff ceiling between batch transaction attempts.
pub const DEFAULT_FLUSH_RETRY_MAX_MS: u64 = 200;

/// Jitter applied to every backoff delay (fraction of the delay).
pub const DEFAULT_RETRY_JITTER_PCT: f64 = 0.2;

/// Capacity of the post-commit notification broadcast channel.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 4_096;

// --- Resolution ---

/// Resolution scan period.
pub const DEFAULT_RESOLUTION_INTERVAL_MS: u64 = 10_000;

/// Upper bound on stakes loaded per resolution cycle.
pub const DEFAULT_RESOLUTION_MAX_STAKES: usize = 10_000;

/// Trailing window of persisted price samples (24h).
pub const DEFAULT_PRICE_RETENTION_MS: u64 = 86_400_000;

// --- Archival / integrity ---

/// Archived rows younger than this stay in hot storage (7 days).
pub const DEFAULT_HOT_RETENTION_MS: u64 = 604_800_000;

/// Attempts for one cold-storage upload.
pub const DEFAULT_UPLOAD_MAX_ATTEMPTS: usize = 5;

/// Base backoff for cold-storage uploads.
pub const DEFAULT_UPLOAD_RETRY_BASE_MS: u64 = 250;

/// Backoff ceiling for cold-storage uploads.
pub const DEFAULT_UPLOAD_RETRY_MAX_MS: u64 = 5_000;

/// Reconciliation period.
pub const DEFAULT_INTEGRITY_INTERVAL_MS: u64 = 60_000;
