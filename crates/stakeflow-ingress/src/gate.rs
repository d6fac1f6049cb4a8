//! Admission gate: hard, synchronous stop on a stale price feed.
//!
//! Evaluated per request with no queuing. `CRITICAL` rejects with
//! `PRICE_FEED_STALE` and a retry hint; `DEGRADED` admits with a warning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use stakeflow_types::{HealthStatus, RejectReason, StakeRequest};
use tracing::debug;

use crate::health::PriceHealthMonitor;

/// Gate decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Proceed. `warning` is set when the feed is degraded.
    Allow { warning: Option<HealthStatus> },
    Reject(RejectReason),
}

/// Admission counters.
#[derive(Debug, Default)]
pub struct GateStats {
    pub admitted: AtomicU64,
    pub warned: AtomicU64,
    pub rejected_stale: AtomicU64,
}

/// Health-driven admission gate.
#[derive(Debug)]
pub struct AdmissionGate {
    monitor: Arc<PriceHealthMonitor>,
    retry_after: Duration,
    stats: GateStats,
}

impl AdmissionGate {
    #[must_use]
    pub fn new(monitor: Arc<PriceHealthMonitor>) -> Self {
        let retry_after = monitor.config().stale_retry_after;
        Self {
            monitor,
            retry_after,
            stats: GateStats::default(),
        }
    }

    pub fn admit(&self, request: &StakeRequest) -> Admission {
        let status = self.monitor.current_status();
        if !status.admits_stakes() {
            self.stats.rejected_stale.fetch_add(1, Ordering::Relaxed);
            debug!(account = %request.account_id, cell = %request.cell_id, "rejected: price feed stale");
            return Admission::Reject(RejectReason::PriceFeedStale {
                retry_after: self.retry_after,
            });
        }
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);
        let warning = (status == HealthStatus::Degraded).then_some(status);
        if warning.is_some() {
            self.stats.warned.fetch_add(1, Ordering::Relaxed);
        }
        Admission::Allow { warning }
    }

    #[must_use]
    pub fn stats(&self) -> &GateStats {
        &self.stats
    }
}
