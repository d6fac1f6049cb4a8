//! # stakeflow-ingress
//!
//! **Admission plane**: price health, admission gate, placement rules, and
//! the batch ingestion queue in front of the ledger writer.
//!
//! ## Stake Flow
//!
//! ```text
//! StakeService::place
//!   → AdmissionGate::admit        (CRITICAL feed → PRICE_FEED_STALE)
//!   → PlacementRules::check       (window rule, one stake per cell)
//!   → StakeQueue::submit          (bounded, fails fast when full)
//!   → BatchFlusher                (size OR timeout trigger)
//!   → WriterHandle::flush_stakes  (one transaction per batch)
//!   → ResultHandle::wait          (timeout → outcome unknown)
//! ```
//!
//! Price ticks enter through [`PriceIngest`], which refreshes the
//! [`PriceHealthMonitor`] and persists the sample for resolution.

pub mod gate;
pub mod health;
pub mod placement;
pub mod price_feed;
pub mod queue;
pub mod service;

pub use gate::{Admission, AdmissionGate, GateStats};
pub use health::PriceHealthMonitor;
pub use placement::{Placement, PlacementRules, Reservation};
pub use price_feed::PriceIngest;
pub use queue::{BatchFlusher, FlushStats, QueuedStake, ResultHandle, StakeQueue};
pub use service::StakeService;
