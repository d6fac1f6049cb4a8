//! # stakeflow-ledger
//!
//! **Transaction engine**: the only component allowed to change balances.
//!
//! ## Architecture
//!
//! - [`LedgerStore`] owns the single read-write SQLite connection. A batch
//!   of stakes commits in one transaction; each debit is a conditional
//!   `UPDATE … WHERE balance >= amount RETURNING balance`, so the balance
//!   check and the debit are one step and a balance can never go negative.
//! - [`LedgerWriter`] moves the store onto a dedicated thread. Everything
//!   else talks to it through the cloneable [`WriterHandle`].
//! - [`StoreReader`] is a read-only connection for queries, resolution
//!   scans, and reconciliation.
//! - [`BalanceCache`] mirrors committed balances; it is written only after
//!   a commit.
//!
//! Ledger rows are append-only. Schema triggers reject updates, and reject
//! deletes not covered by a verified archive manifest.

pub mod cache;
pub mod reader;
pub mod retry;
mod rows;
pub mod store;
pub mod writer;

pub use cache::BalanceCache;
pub use reader::{BalanceCheck, StoreReader};
pub use retry::RetryPolicy;
pub use store::{
    ArchiveManifest, FlushReport, LedgerStore, PurgeReport, RepairReport, SettleReport, StakeDraft,
    Verdict,
};
pub use writer::{LedgerWriter, WriteCommand, WriterHandle};
