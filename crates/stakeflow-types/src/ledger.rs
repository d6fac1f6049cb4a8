//! Append-only ledger entries and account snapshots.
//!
//! The ledger is the source of truth. An account's `balance` is a cache of
//! `sum(amount)` over its entries, updated in the same transaction as every
//! entry insert and verified by reconciliation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, LedgerEntryId, Result, StakeId, StakeflowError};

/// What caused a ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    /// Funds entering an account from outside the betting flow.
    Deposit,
    /// Debit at stake placement.
    Stake,
    /// Credit for a winning stake.
    Payout,
}

impl ReferenceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Stake => "STAKE",
            Self::Payout => "PAYOUT",
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceType {
    type Err = StakeflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DEPOSIT" => Ok(Self::Deposit),
            "STAKE" => Ok(Self::Stake),
            "PAYOUT" => Ok(Self::Payout),
            other => Err(StakeflowError::Serialization(format!(
                "unknown reference type: {other}"
            ))),
        }
    }
}

/// One immutable, signed balance movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub account_id: AccountId,
    /// Negative = debit, positive = credit (minor units).
    pub amount: i64,
    /// Account balance immediately after this entry was applied.
    pub balance_after: i64,
    pub reference_type: ReferenceType,
    /// The stake id for STAKE/PAYOUT entries; `None` for deposits.
    pub reference_id: Option<StakeId>,
    /// Free-form JSON metadata.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Current state of an account row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Minor units. Never negative.
    pub balance: i64,
    /// Optimistic-lock counter, bumped on every balance change.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}
