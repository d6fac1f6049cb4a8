//! Row codecs between SQLite columns and domain types.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use rust_decimal::Decimal;
use stakeflow_types::{
    AccountId, Cell, CellId, LedgerEntry, LedgerEntryId, ReferenceType, Stake, StakeId,
    StakeflowError,
};

/// Map a store error. Busy/locked conditions are reported as aborts so that
/// callers see them as retryable.
pub fn store_err(err: rusqlite::Error) -> StakeflowError {
    if is_transient(&err) {
        StakeflowError::TransactionAborted {
            reason: err.to_string(),
        }
    } else {
        StakeflowError::Store(err.to_string())
    }
}

/// Busy or locked: another connection holds the write lock.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Parse a text column through `FromStr`.
pub fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("column {idx}: {e}").into(),
        )
    })
}

fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<T>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Text,
                format!("column {idx}: {e}").into(),
            )
        })
    })
    .transpose()
}

pub const STAKE_COLUMNS: &str = "id, account_id, cell_column, cell_row, window_start, window_end, \
     price_low, price_high, amount, reward_rate, status, placed_at, resolved_at, payout";

pub fn stake_from_row(row: &Row<'_>) -> rusqlite::Result<Stake> {
    Ok(Stake {
        id: parse_col::<StakeId>(row, 0)?,
        account_id: parse_col::<AccountId>(row, 1)?,
        cell: Cell {
            id: CellId::new(row.get(2)?, row.get(3)?),
            window_start: from_ms(row.get(4)?),
            window_end: from_ms(row.get(5)?),
            price_low: parse_col::<Decimal>(row, 6)?,
            price_high: parse_col::<Decimal>(row, 7)?,
        },
        amount: row.get(8)?,
        reward_rate: parse_col::<Decimal>(row, 9)?,
        status: parse_col(row, 10)?,
        placed_at: from_ms(row.get(11)?),
        resolved_at: row.get::<_, Option<i64>>(12)?.map(from_ms),
        payout: row.get(13)?,
    })
}

pub const ENTRY_COLUMNS: &str =
    "id, account_id, amount, balance_after, reference_type, reference_id, metadata, created_at";

pub fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let metadata: String = row.get(6)?;
    Ok(LedgerEntry {
        id: parse_col::<LedgerEntryId>(row, 0)?,
        account_id: parse_col::<AccountId>(row, 1)?,
        amount: row.get(2)?,
        balance_after: row.get(3)?,
        reference_type: parse_col::<ReferenceType>(row, 4)?,
        reference_id: parse_opt_col::<StakeId>(row, 5)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: from_ms(row.get(7)?),
    })
}
