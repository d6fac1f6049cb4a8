//! Price tick ingestion.
//!
//! Every tick refreshes the health monitor and is persisted through the
//! writer so resolution can be replayed from stored history alone.

use std::sync::Arc;

use stakeflow_ledger::WriterHandle;
use stakeflow_types::{HealthStatus, PriceSample, Result};

use crate::health::PriceHealthMonitor;

/// Fan-in point for the upstream price feed.
#[derive(Debug, Clone)]
pub struct PriceIngest {
    monitor: Arc<PriceHealthMonitor>,
    writer: WriterHandle,
}

impl PriceIngest {
    #[must_use]
    pub fn new(monitor: Arc<PriceHealthMonitor>, writer: WriterHandle) -> Self {
        Self { monitor, writer }
    }

    /// Record and persist one tick, waiting for the write.
    pub async fn ingest(&self, sample: PriceSample) -> Result<HealthStatus> {
        self.writer.append_prices(vec![sample]).await?;
        Ok(self.monitor.record_sample(sample.at))
    }
}
