//! The betting grid.
//!
//! A cell is one (time-window × price-range) unit. Columns slice time into
//! half-open windows of `column_width`; rows slice price into closed ranges of
//! `row_height`. Adjacent rows share their boundary price, so a sample that
//! lands exactly on a boundary touches both cells.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::{Result, StakeflowError, constants};

/// Grid coordinates of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellId {
    /// Time column index relative to the grid origin.
    pub column: i64,
    /// Price row index (row `r` covers `[r·h, (r+1)·h]`).
    pub row: i64,
}

impl CellId {
    #[must_use]
    pub fn new(column: i64, row: i64) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell:{}x{}", self.column, self.row)
    }
}

/// A fully resolved cell: the exact window and range a stake targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    /// Inclusive start of the time window.
    pub window_start: DateTime<Utc>,
    /// Exclusive end of the time window.
    pub window_end: DateTime<Utc>,
    /// Inclusive lower price bound.
    pub price_low: Decimal,
    /// Inclusive upper price bound.
    pub price_high: Decimal,
}

impl Cell {
    /// Whether `price` lies in the closed range `[price_low, price_high]`.
    #[must_use]
    pub fn contains_price(&self, price: Decimal) -> bool {
        price >= self.price_low && price <= self.price_high
    }

    /// Whether `at` lies in the half-open window `[window_start, window_end)`.
    #[must_use]
    pub fn contains_time(&self, at: DateTime<Utc>) -> bool {
        at >= self.window_start && at < self.window_end
    }
}

/// Geometry of the betting grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    /// Start of column 0.
    pub origin: DateTime<Utc>,
    /// Width of a time column.
    #[serde(with = "duration_ms")]
    pub column_width: Duration,
    /// Height of a price row.
    pub row_height: Decimal,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            origin: DateTime::<Utc>::UNIX_EPOCH,
            column_width: Duration::from_millis(constants::DEFAULT_COLUMN_WIDTH_MS),
            row_height: Decimal::new(constants::DEFAULT_ROW_HEIGHT, 0),
        }
    }
}

impl GridSpec {
    #[allow(clippy::cast_possible_truncation)]
    fn width_ms(&self) -> i64 {
        self.column_width.as_millis() as i64
    }

    /// Reject degenerate geometry.
    pub fn validate(&self) -> Result<()> {
        if self.width_ms() <= 0 {
            return Err(StakeflowError::Configuration(
                "grid column_width must be at least 1ms".into(),
            ));
        }
        if self.row_height <= Decimal::ZERO {
            return Err(StakeflowError::Configuration(
                "grid row_height must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Column containing instant `at`.
    #[must_use]
    pub fn column_at(&self, at: DateTime<Utc>) -> i64 {
        let offset = (at - self.origin).num_milliseconds();
        offset.div_euclid(self.width_ms().max(1))
    }

    /// Half-open time window of `column`.
    #[must_use]
    pub fn window(&self, column: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let w = self.width_ms();
        let start = self.origin + chrono::Duration::milliseconds(w.saturating_mul(column));
        (start, start + chrono::Duration::milliseconds(w))
    }

    /// Closed price range of `row`.
    #[must_use]
    pub fn price_range(&self, row: i64) -> (Decimal, Decimal) {
        let low = self.row_height * Decimal::from(row);
        (low, low + self.row_height)
    }

    /// Resolve a cell id into its concrete window and price range.
    #[must_use]
    pub fn cell(&self, id: CellId) -> Cell {
        let (window_start, window_end) = self.window(id.column);
        let (price_low, price_high) = self.price_range(id.row);
        Cell {
            id,
            window_start,
            window_end,
            price_low,
            price_high,
        }
    }

    /// Placement-window rule: only columns strictly after the next column
    /// accept stakes.
    #[must_use]
    pub fn is_placeable(&self, id: CellId, now: DateTime<Utc>) -> bool {
        id.column > self.column_at(now) + 1
    }
}
