//! # stakeflow-settlement
//!
//! **Finality plane**: stake resolution, reconciliation, and verified
//! archival to cold storage.
//!
//! ## Architecture
//!
//! - [`ResolutionWorker`] scans elapsed `confirmed` stakes, decides each cell
//!   from persisted price samples with [`resolve_cell`], and settles the
//!   verdicts through the ledger writer in one transaction. It pauses while
//!   the price feed is critical.
//! - [`IntegrityChecker`] compares every balance with its ledger sum and
//!   reports drift. Repair is a separate, explicit action.
//! - [`Archiver`] snapshots a closed period, uploads it to a [`ColdStore`],
//!   verifies size and SHA-256, and only then records the manifest, advances
//!   the marker, and purges hot rows past retention.

pub mod archive;
pub mod integrity;
pub mod resolution;

pub use archive::{
    ArchiveOutcome, ArchivePeriod, ArchiveSnapshot, Archiver, ColdStore, FsColdStore, ObjectStat,
    sha256_hex,
};
pub use integrity::{IntegrityChecker, IntegrityReport};
pub use resolution::{CellVerdict, ReplayReport, ResolutionReport, ResolutionWorker, resolve_cell};
