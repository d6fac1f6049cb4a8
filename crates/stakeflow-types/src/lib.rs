//! # stakeflow-types
//!
//! Shared types, errors, and configuration for the **Stakeflow** stake ledger.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`AccountId`], [`StakeId`], [`LedgerEntryId`]
//! - **Grid model**: [`CellId`], [`Cell`], [`GridSpec`]
//! - **Stake model**: [`StakeRequest`], [`Stake`], [`StakeStatus`]
//! - **Ledger model**: [`LedgerEntry`], [`ReferenceType`], [`Account`]
//! - **Price feed**: [`PriceSample`], [`HealthStatus`]
//! - **Outcomes**: [`StakeResult`], [`PlacementOutcome`], [`RejectReason`], [`StakeNotification`]
//! - **Configuration**: [`EngineConfig`] and its sections
//! - **Errors**: [`StakeflowError`] with `SF_ERR_` prefix codes
//! - **Time**: [`Clock`], [`SystemClock`]
//! - **Constants**: system-wide limits and defaults

pub mod cell;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod outcome;
pub mod price;
pub mod stake;

pub use cell::*;
pub use clock::*;
pub use config::{
    ArchiveConfig, EngineConfig, HealthConfig, IntegrityConfig, LedgerConfig, QueueConfig,
    ResolutionConfig,
};
pub use error::*;
pub use ids::*;
pub use ledger::*;
pub use outcome::*;
pub use price::*;
pub use stake::*;

// Constants are accessed via `stakeflow_types::constants::FOO`
// (not re-exported to avoid name collisions).

/// Install a test-writer `tracing` subscriber honouring `RUST_LOG`.
/// Safe to call from every test; only the first call installs.
#[cfg(feature = "test-helpers")]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
