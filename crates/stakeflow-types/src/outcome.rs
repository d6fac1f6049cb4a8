//! Outbound results delivered to callers.
//!
//! Business outcomes (insufficient funds, stale market, unavailable cell)
//! are data, not errors: they are returned as [`PlacementOutcome`] values.
//! Only infrastructure failures travel as [`crate::StakeflowError`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::{AccountId, CellId, HealthStatus, StakeId, StakeStatus};

/// Status code of a queued stake as seen by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeStatusCode {
    Confirmed,
    InsufficientFunds,
    /// The caller stopped waiting. The stake may still have committed:
    /// consult history.
    Timeout,
}

/// Result of one queued stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeResult {
    pub stake_id: StakeId,
    pub status: StakeStatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<i64>,
}

impl StakeResult {
    #[must_use]
    pub fn confirmed(stake_id: StakeId, new_balance: i64) -> Self {
        Self {
            stake_id,
            status: StakeStatusCode::Confirmed,
            new_balance: Some(new_balance),
        }
    }

    #[must_use]
    pub fn insufficient_funds(stake_id: StakeId) -> Self {
        Self {
            stake_id,
            status: StakeStatusCode::InsufficientFunds,
            new_balance: None,
        }
    }

    #[must_use]
    pub fn timeout(stake_id: StakeId) -> Self {
        Self {
            stake_id,
            status: StakeStatusCode::Timeout,
            new_balance: None,
        }
    }
}

/// Actionable reason a stake was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Price feed is `Critical`; retry after the suggested delay.
    PriceFeedStale {
        #[serde(with = "duration_ms")]
        retry_after: Duration,
    },
    /// The cell is in the past, current or next column.
    CellUnavailable { cell: CellId },
    /// The account already has a live stake on this cell.
    DuplicateStake { cell: CellId },
    /// Malformed request (non-positive amount or rate).
    InvalidStake { reason: String },
    /// Ingestion queue is full; shed load.
    QueueFull,
    /// Conditional debit found the balance below the stake amount.
    InsufficientFunds,
}

impl RejectReason {
    /// Stable code for clients and logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PriceFeedStale { .. } => "PRICE_FEED_STALE",
            Self::CellUnavailable { .. } => "CELL_UNAVAILABLE",
            Self::DuplicateStake { .. } => "DUPLICATE_STAKE",
            Self::InvalidStake { .. } => "INVALID_STAKE",
            Self::QueueFull => "QUEUE_FULL",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
        }
    }
}

/// End-to-end outcome of a placement attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlacementOutcome {
    Confirmed {
        stake_id: StakeId,
        new_balance: i64,
        /// Set when the feed was `Degraded` at admission.
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<HealthStatus>,
    },
    Rejected {
        #[serde(skip_serializing_if = "Option::is_none")]
        stake_id: Option<StakeId>,
        reason: RejectReason,
    },
    /// Outcome unknown to the caller; it is durably recorded either way.
    Unknown { stake_id: StakeId },
}

impl PlacementOutcome {
    /// Fold a queue result into a placement outcome.
    #[must_use]
    pub fn from_result(result: StakeResult, warning: Option<HealthStatus>) -> Self {
        match (result.status, result.new_balance) {
            (StakeStatusCode::Confirmed, Some(new_balance)) => Self::Confirmed {
                stake_id: result.stake_id,
                new_balance,
                warning,
            },
            (StakeStatusCode::InsufficientFunds, _) => Self::Rejected {
                stake_id: Some(result.stake_id),
                reason: RejectReason::InsufficientFunds,
            },
            _ => Self::Unknown {
                stake_id: result.stake_id,
            },
        }
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    #[must_use]
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Push event keyed by account, emitted after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeNotification {
    pub account_id: AccountId,
    pub stake_id: StakeId,
    pub status: StakeStatus,
    /// Balance after the movement, when money moved.
    pub balance: Option<i64>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_wire_shape() {
        let id = StakeId::new();
        let json = serde_json::to_value(StakeResult::confirmed(id, 90)).unwrap();
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["newBalance"], 90);

        let json = serde_json::to_value(StakeResult::timeout(id)).unwrap();
        assert_eq!(json["status"], "timeout");
        assert!(json.get("newBalance").is_none());
    }

    #[test]
    fn stale_reason_carries_retry_delay() {
        let reason = RejectReason::PriceFeedStale {
            retry_after: Duration::from_secs(5),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["code"], "PRICE_FEED_STALE");
        assert_eq!(json["retry_after"], 5000);
        assert_eq!(reason.code(), "PRICE_FEED_STALE");
    }

    #[test]
    fn timeout_folds_to_unknown() {
        let id = StakeId::new();
        let outcome = PlacementOutcome::from_result(StakeResult::timeout(id), None);
        assert_eq!(outcome, PlacementOutcome::Unknown { stake_id: id });
    }

    #[test]
    fn insufficient_funds_folds_to_rejection() {
        let id = StakeId::new();
        let outcome = PlacementOutcome::from_result(StakeResult::insufficient_funds(id), None);
        assert_eq!(outcome.reject_reason(), Some(&RejectReason::InsufficientFunds));
    }
}
