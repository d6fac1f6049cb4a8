//! Error types for the Stakeflow ledger.
//!
//! All errors use the `SF_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Stake / placement errors
//! - 3xx: Admission and queue errors
//! - 4xx: Ledger store errors
//! - 5xx: Resolution errors
//! - 6xx: Archival errors
//! - 8xx: Integrity errors
//! - 9xx: General / internal errors
//!
//! Expected business outcomes (insufficient funds, stale market, unavailable
//! cell) are not errors; see [`crate::PlacementOutcome`].

use thiserror::Error;

use crate::{AccountId, StakeId, StakeStatus};

/// Central error enum for all Stakeflow operations.
#[derive(Debug, Error)]
pub enum StakeflowError {
    // =================================================================
    // Stake Errors (1xx)
    // =================================================================
    /// The requested stake does not exist in hot storage.
    #[error("SF_ERR_100: Stake not found: {0}")]
    StakeNotFound(StakeId),

    /// The account does not exist.
    #[error("SF_ERR_101: Account not found: {0}")]
    AccountNotFound(AccountId),

    /// A deposit or stake amount was not positive.
    #[error("SF_ERR_102: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    // =================================================================
    // Admission / Queue Errors (3xx)
    // =================================================================
    /// The ingestion queue has been shut down.
    #[error("SF_ERR_300: Ingestion queue closed")]
    QueueClosed,

    /// The ingestion queue is at capacity.
    #[error("SF_ERR_301: Ingestion queue full ({capacity} items)")]
    QueueFull { capacity: usize },

    // =================================================================
    // Ledger Store Errors (4xx)
    // =================================================================
    /// The batch transaction rolled back; nothing in it committed.
    #[error("SF_ERR_400: Transaction aborted: {reason}")]
    TransactionAborted { reason: String },

    /// The store returned an error outside a batch transaction.
    #[error("SF_ERR_401: Store error: {0}")]
    Store(String),

    /// The writer actor is gone (shut down or crashed).
    #[error("SF_ERR_402: Ledger writer unavailable")]
    WriterUnavailable,

    // =================================================================
    // Resolution Errors (5xx)
    // =================================================================
    /// A stake status change that only moves backward or repeats.
    #[error("SF_ERR_500: Invalid stake transition for {stake_id}: {from} -> {to}")]
    InvalidTransition {
        stake_id: StakeId,
        from: StakeStatus,
        to: StakeStatus,
    },

    /// A stake was asked to be replayed before it was resolved.
    #[error("SF_ERR_501: Stake {0} is not resolved")]
    StakeNotResolved(StakeId),

    // =================================================================
    // Archival Errors (6xx)
    // =================================================================
    /// The period is still open or holds unresolved stakes.
    #[error("SF_ERR_600: Archive period not closed: {reason}")]
    ArchivePeriodOpen { reason: String },

    /// The cold store rejected the upload after all retries.
    #[error("SF_ERR_601: Archive upload failed: {reason}")]
    UploadFailed { reason: String },

    /// The remote copy does not match the local snapshot.
    #[error("SF_ERR_602: Archive verification failed for {key}: expected {expected}, got {actual}")]
    ArchiveVerificationFailed {
        key: String,
        expected: String,
        actual: String,
    },

    /// A different object already exists under the key; cold data is never
    /// replaced.
    #[error("SF_ERR_603: Archive object {key} already exists with digest {existing}")]
    ArchiveConflict { key: String, existing: String },

    // =================================================================
    // Integrity Errors (8xx)
    // =================================================================
    /// Cached balance disagrees with the ledger sum.
    #[error("SF_ERR_800: Balance drift on {account_id}: balance {balance} != ledger sum {ledger_sum}")]
    BalanceDrift {
        account_id: AccountId,
        balance: i64,
        ledger_sum: i64,
    },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("SF_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("SF_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid values, malformed document).
    #[error("SF_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, cold storage).
    #[error("SF_ERR_903: I/O error: {0}")]
    Io(String),
}

impl StakeflowError {
    /// Whether a caller may retry the same operation unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransactionAborted { .. } | Self::UploadFailed { .. } | Self::Io(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, StakeflowError>;

impl From<std::io::Error> for StakeflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StakeflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = StakeflowError::StakeNotFound(StakeId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("SF_ERR_100"), "Got: {msg}");
    }

    #[test]
    fn drift_display() {
        let err = StakeflowError::BalanceDrift {
            account_id: AccountId::new(),
            balance: 100,
            ledger_sum: 90,
        };
        let msg = format!("{err}");
        assert!(msg.contains("SF_ERR_800"));
        assert!(msg.contains("100"));
        assert!(msg.contains("90"));
    }

    #[test]
    fn transition_display() {
        let err = StakeflowError::InvalidTransition {
            stake_id: StakeId::new(),
            from: StakeStatus::Won,
            to: StakeStatus::Lost,
        };
        let msg = format!("{err}");
        assert!(msg.contains("won -> lost"));
    }

    #[test]
    fn retryable_classification() {
        assert!(StakeflowError::TransactionAborted { reason: "busy".into() }.is_retryable());
        assert!(!StakeflowError::WriterUnavailable.is_retryable());
        assert!(!StakeflowError::QueueClosed.is_retryable());
        assert!(
            !StakeflowError::ArchiveConflict {
                key: "k".into(),
                existing: "a".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn all_errors_have_sf_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(StakeflowError::QueueClosed),
            Box::new(StakeflowError::QueueFull { capacity: 8 }),
            Box::new(StakeflowError::WriterUnavailable),
            Box::new(StakeflowError::Internal("test".into())),
            Box::new(StakeflowError::ArchiveVerificationFailed {
                key: "k".into(),
                expected: "a".into(),
                actual: "b".into(),
            }),
            Box::new(StakeflowError::ArchiveConflict {
                key: "k".into(),
                existing: "a".into(),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(msg.starts_with("SF_ERR_"), "Error missing SF_ERR_ prefix: {msg}");
        }
    }
}
