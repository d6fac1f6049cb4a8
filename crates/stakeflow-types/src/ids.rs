//! Globally unique identifiers used throughout Stakeflow.
//!
//! All entity IDs use UUIDv7 for time-ordered lexicographic sorting, so a
//! ledger ordered by id is also ordered by creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StakeflowError};

/// Declares a UUIDv7-backed identifier newtype.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = StakeflowError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| StakeflowError::Serialization(format!("bad {}: {e}", $prefix)))
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a funded account.
    AccountId,
    "account"
);

uuid_id!(
    /// Unique identifier for a stake. Primary key of the stake row, which
    /// makes "at most one debit per stake" hold by construction.
    StakeId,
    "stake"
);

uuid_id!(
    /// Monotonically sortable ledger entry identifier.
    LedgerEntryId,
    "entry"
);
