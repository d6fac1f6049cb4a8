//! Stake (bet) types.
//!
//! A stake is created by the ledger engine on admission and mutated exactly
//! once afterwards, by resolution. Status transitions only move forward:
//! `pending → {confirmed | rejected}` then `confirmed → {won | lost}`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::{AccountId, Cell, CellId, Result, StakeId, StakeflowError};

/// Lifecycle status of a stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeStatus {
    Pending,
    Confirmed,
    Won,
    Lost,
    RejectedInsufficientFunds,
}

impl StakeStatus {
    /// Store representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::RejectedInsufficientFunds => "rejected_insufficient_funds",
        }
    }

    /// Whether `self → next` is a permitted transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed | Self::RejectedInsufficientFunds)
                | (Self::Confirmed, Self::Won | Self::Lost)
        )
    }

    /// Validate a transition.
    ///
    /// # Errors
    /// Returns [`StakeflowError::InvalidTransition`] for any backward or
    /// repeated transition.
    pub fn transition(self, stake_id: StakeId, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StakeflowError::InvalidTransition {
                stake_id,
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for StakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StakeStatus {
    type Err = StakeflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            "rejected_insufficient_funds" => Ok(Self::RejectedInsufficientFunds),
            other => Err(StakeflowError::Serialization(format!(
                "unknown stake status: {other}"
            ))),
        }
    }
}

/// Inbound request from the (already authenticated) session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeRequest {
    #[serde(rename = "accountID")]
    pub account_id: AccountId,
    #[serde(rename = "cellID")]
    pub cell_id: CellId,
    /// Stake amount in minor units.
    pub amount: i64,
    /// Payout multiplier, locked on the stake at placement.
    pub reward_rate: Decimal,
}

impl StakeRequest {
    #[must_use]
    pub fn new(account_id: AccountId, cell_id: CellId, amount: i64, reward_rate: Decimal) -> Self {
        Self {
            account_id,
            cell_id,
            amount,
            reward_rate,
        }
    }
}

/// A persisted stake row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    pub id: StakeId,
    pub account_id: AccountId,
    pub cell: Cell,
    /// Amount in minor units.
    pub amount: i64,
    pub reward_rate: Decimal,
    pub status: StakeStatus,
    pub placed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub payout: Option<i64>,
}

impl Stake {
    /// Payout owed if this stake wins: `floor(amount × reward_rate)`.
    #[must_use]
    pub fn winning_payout(&self) -> i64 {
        payout_for(self.amount, self.reward_rate)
    }
}

/// `floor(amount × rate)` in minor units, saturating at `i64::MAX`.
#[must_use]
pub fn payout_for(amount: i64, rate: Decimal) -> i64 {
    (Decimal::from(amount) * rate)
        .floor()
        .to_i64()
        .unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(StakeStatus::Pending.can_transition_to(StakeStatus::Confirmed));
        assert!(StakeStatus::Pending.can_transition_to(StakeStatus::RejectedInsufficientFunds));
        assert!(StakeStatus::Confirmed.can_transition_to(StakeStatus::Won));
        assert!(StakeStatus::Confirmed.can_transition_to(StakeStatus::Lost));
    }

    #[test]
    fn backward_and_repeat_transitions_refused() {
        let id = StakeId::new();
        assert!(StakeStatus::Won.transition(id, StakeStatus::Lost).is_err());
        assert!(StakeStatus::Won.transition(id, StakeStatus::Won).is_err());
        assert!(StakeStatus::Confirmed.transition(id, StakeStatus::Pending).is_err());
        let err = StakeStatus::RejectedInsufficientFunds
            .transition(id, StakeStatus::Won)
            .unwrap_err();
        assert!(matches!(err, StakeflowError::InvalidTransition { .. }));
    }

    #[test]
    fn status_string_roundtrip() {
        for s in [
            StakeStatus::Pending,
            StakeStatus::Confirmed,
            StakeStatus::Won,
            StakeStatus::Lost,
            StakeStatus::RejectedInsufficientFunds,
        ] {
            assert_eq!(s.as_str().parse::<StakeStatus>().unwrap(), s);
        }
        assert!("void".parse::<StakeStatus>().is_err());
    }

    #[test]
    fn payout_floors_to_minor_units() {
        assert_eq!(payout_for(10, Decimal::new(25, 1)), 25);
        assert_eq!(payout_for(7, Decimal::new(15, 1)), 10);
        assert_eq!(payout_for(3, Decimal::new(1333, 3)), 3);
    }

    #[test]
    fn request_wire_shape() {
        let req = StakeRequest::new(AccountId::new(), CellId::new(4, 10), 10, Decimal::new(2, 0));
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("accountID").is_some());
        assert!(json.get("cellID").is_some());
        assert!(json.get("rewardRate").is_some());
        let back: StakeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }
}
