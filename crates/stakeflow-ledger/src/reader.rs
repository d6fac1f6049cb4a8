//! Read-only access to the hot store.
//!
//! Each component opens its own reader; under WAL a reader sees the last
//! committed snapshot and never blocks the writer.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use stakeflow_types::{
    Account, AccountId, CellId, LedgerEntry, PriceSample, Result, Stake, StakeId, StakeflowError,
    constants,
};

use crate::rows::{
    ENTRY_COLUMNS, STAKE_COLUMNS, entry_from_row, from_ms, parse_col, stake_from_row, store_err,
    to_ms,
};
use crate::store::ArchiveManifest;

/// One account's cached balance next to the sum that should explain it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub account_id: AccountId,
    pub balance: i64,
    /// Hot ledger sum plus totals of archived rows.
    pub ledger_sum: i64,
}

impl BalanceCheck {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum
    }
}

/// Cloneable handle over a read-only connection.
#[derive(Clone)]
pub struct StoreReader {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReader").finish_non_exhaustive()
    }
}

impl StoreReader {
    /// Open a read-only connection. The database must already exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(store_err)?;
        conn.busy_timeout(std::time::Duration::from_millis(constants::DEFAULT_BUSY_TIMEOUT_MS))
            .map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StakeflowError::Internal("store reader mutex poisoned".into()))
    }

    pub fn account(&self, account_id: AccountId) -> Result<Option<Account>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT balance, version, created_at FROM accounts WHERE id = ?1",
            params![account_id.to_string()],
            |r| {
                Ok(Account {
                    id: account_id,
                    balance: r.get(0)?,
                    version: r.get(1)?,
                    created_at: from_ms(r.get(2)?),
                })
            },
        )
        .optional()
        .map_err(store_err)
    }

    pub fn balance(&self, account_id: AccountId) -> Result<Option<i64>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT balance FROM accounts WHERE id = ?1",
            params![account_id.to_string()],
            |r| r.get(0),
        )
        .optional()
        .map_err(store_err)
    }

    /// Ledger rows for an account in `[from, to)`, oldest first. This is the
    /// dispute query: every balance change with the balance it produced.
    pub fn ledger_history(
        &self,
        account_id: AccountId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE account_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![
                    account_id.to_string(),
                    from.map_or(i64::MIN, to_ms),
                    to.map_or(i64::MAX, to_ms)
                ],
                entry_from_row,
            )
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Hot ledger sum plus archived totals for one account.
    pub fn ledger_sum(&self, account_id: AccountId) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE((SELECT SUM(amount) FROM ledger_entries WHERE account_id = ?1), 0)
                  + COALESCE((SELECT total FROM archived_ledger_totals WHERE account_id = ?1), 0)",
            params![account_id.to_string()],
            |r| r.get(0),
        )
        .map_err(store_err)
    }

    pub fn stake(&self, stake_id: StakeId) -> Result<Option<Stake>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {STAKE_COLUMNS} FROM stakes WHERE id = ?1");
        conn.query_row(&sql, params![stake_id.to_string()], stake_from_row)
            .optional()
            .map_err(store_err)
    }

    /// Whether the account already holds a non-rejected stake on `cell`.
    pub fn has_live_stake(&self, account_id: AccountId, cell: CellId) -> Result<bool> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM stakes
                WHERE account_id = ?1 AND cell_column = ?2 AND cell_row = ?3
                  AND status != 'rejected_insufficient_funds'
             )",
            params![account_id.to_string(), cell.column, cell.row],
            |r| r.get(0),
        )
        .map_err(store_err)
    }

    /// Confirmed stakes whose window has closed by `now`, ordered by
    /// `(window_end, id)`. Pass the last stake of the previous page as
    /// `after` to continue past it.
    pub fn due_stakes(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, StakeId)>,
        limit: usize,
    ) -> Result<Vec<Stake>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {STAKE_COLUMNS} FROM stakes
             WHERE status = 'confirmed' AND window_end <= ?1
               AND (?2 IS NULL OR window_end > ?2 OR (window_end = ?2 AND id > ?3))
             ORDER BY window_end, id
             LIMIT ?4"
        );
        let (after_end, after_id) = match after {
            Some((end, id)) => (Some(to_ms(end)), Some(id.to_string())),
            None => (None, None),
        };
        let mut stmt = conn.prepare_cached(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![
                    to_ms(now),
                    after_end,
                    after_id,
                    i64::try_from(limit).unwrap_or(i64::MAX)
                ],
                stake_from_row,
            )
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Price samples with `from <= at < to`, in arrival order.
    pub fn price_samples(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<PriceSample>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT at, price FROM price_samples
                 WHERE at >= ?1 AND at < ?2
                 ORDER BY at, seq",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![to_ms(from), to_ms(to)], |r| {
                Ok(PriceSample {
                    at: from_ms(r.get(0)?),
                    price: parse_col(r, 1)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Balance and ledger sum for every account.
    pub fn reconciliation(&self) -> Result<Vec<BalanceCheck>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT a.id, a.balance,
                        COALESCE((SELECT SUM(e.amount) FROM ledger_entries e WHERE e.account_id = a.id), 0)
                      + COALESCE((SELECT t.total FROM archived_ledger_totals t WHERE t.account_id = a.id), 0)
                 FROM accounts a
                 ORDER BY a.id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(BalanceCheck {
                    account_id: parse_col(r, 0)?,
                    balance: r.get(1)?,
                    ledger_sum: r.get(2)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Stakes placed in `[start, end)`.
    pub fn stakes_placed_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Stake>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {STAKE_COLUMNS} FROM stakes
             WHERE placed_at >= ?1 AND placed_at < ?2
             ORDER BY placed_at, id"
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params![to_ms(start), to_ms(end)], stake_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Ledger rows created in `[start, end)`, across all accounts.
    pub fn entries_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<LedgerEntry>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE created_at >= ?1 AND created_at < ?2
             ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params![to_ms(start), to_ms(end)], entry_from_row)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Stakes placed in `[start, end)` that are still pending or confirmed.
    pub fn unresolved_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM stakes
                 WHERE placed_at >= ?1 AND placed_at < ?2
                   AND status IN ('pending', 'confirmed')",
                params![to_ms(start), to_ms(end)],
                |r| r.get(0),
            )
            .map_err(store_err)?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Time of the last successful cold write, if any.
    pub fn last_archive_marker(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT last_success_at FROM archive_marker WHERE id = 1",
            [],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map(|ms| ms.map(from_ms))
        .map_err(store_err)
    }

    pub fn archive_manifest(&self, object_key: &str) -> Result<Option<ArchiveManifest>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT object_key, period_start, period_end, sha256, size_bytes,
                    stake_count, entry_count, archived_at
             FROM archive_manifest WHERE object_key = ?1",
            params![object_key],
            |r| {
                Ok(ArchiveManifest {
                    object_key: r.get(0)?,
                    period_start: from_ms(r.get(1)?),
                    period_end: from_ms(r.get(2)?),
                    sha256: r.get(3)?,
                    size_bytes: u64::try_from(r.get::<_, i64>(4)?).unwrap_or(0),
                    stake_count: usize::try_from(r.get::<_, i64>(5)?).unwrap_or(0),
                    entry_count: usize::try_from(r.get::<_, i64>(6)?).unwrap_or(0),
                    archived_at: from_ms(r.get(7)?),
                })
            },
        )
        .optional()
        .map_err(store_err)
    }

    /// Row counts `(stakes, ledger_entries)` currently in hot storage.
    pub fn hot_counts(&self) -> Result<(usize, usize)> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT (SELECT COUNT(*) FROM stakes), (SELECT COUNT(*) FROM ledger_entries)",
            [],
            |r| {
                let stakes: i64 = r.get(0)?;
                let entries: i64 = r.get(1)?;
                Ok((
                    usize::try_from(stakes).unwrap_or(0),
                    usize::try_from(entries).unwrap_or(0),
                ))
            },
        )
        .map_err(store_err)
    }
}
