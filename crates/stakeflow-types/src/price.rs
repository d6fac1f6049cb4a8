//! Price feed samples and the derived feed-health signal.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One tick from the external price stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub at: DateTime<Utc>,
    pub price: Decimal,
}

impl PriceSample {
    #[must_use]
    pub fn new(at: DateTime<Utc>, price: Decimal) -> Self {
        Self { at, price }
    }
}

/// Freshness of the price feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    /// Stale enough to warn callers, not enough to block them.
    Degraded,
    /// New stakes and resolution are suspended.
    Critical,
}

impl HealthStatus {
    #[must_use]
    pub fn admits_stakes(self) -> bool {
        !matches!(self, Self::Critical)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}
