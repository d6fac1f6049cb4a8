//! The single read-write connection and every write the engine performs.
//!
//! A [`LedgerStore`] is owned by exactly one thread (the writer actor, see
//! [`crate::writer`]). Every balance change goes through a conditional
//! `UPDATE … RETURNING balance` in the same transaction as the ledger row
//! that explains it, so `balance == sum(ledger)` holds at every commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior, params};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stakeflow_types::{
    Account, AccountId, Cell, LedgerConfig, LedgerEntry, LedgerEntryId, PriceSample,
    ReferenceType, Result, StakeId, StakeNotification, StakeRequest, StakeResult, StakeStatus,
    StakeflowError, constants, payout_for,
};
use tracing::{debug, info, warn};

use crate::reader::StoreReader;
use crate::retry::RetryPolicy;
use crate::rows::{from_ms, is_transient, parse_col, store_err, to_ms};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// A validated stake waiting for its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeDraft {
    pub stake_id: StakeId,
    pub request: StakeRequest,
    /// Cell resolved against the grid at admission time.
    pub cell: Cell,
    pub placed_at: DateTime<Utc>,
}

impl StakeDraft {
    /// # Errors
    /// Returns [`StakeflowError::InvalidAmount`] for a non-positive amount or
    /// reward rate. A bad row must never reach a batch: its CHECK failure
    /// would abort every other stake in the transaction.
    pub fn new(request: StakeRequest, cell: Cell, placed_at: DateTime<Utc>) -> Result<Self> {
        if request.amount <= 0 {
            return Err(StakeflowError::InvalidAmount {
                reason: format!("stake amount must be positive, got {}", request.amount),
            });
        }
        if request.reward_rate <= Decimal::ZERO {
            return Err(StakeflowError::InvalidAmount {
                reason: format!("reward rate must be positive, got {}", request.reward_rate),
            });
        }
        Ok(Self {
            stake_id: StakeId::new(),
            request,
            cell,
            placed_at,
        })
    }
}

/// Outcome of one committed batch.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    pub results: HashMap<StakeId, StakeResult>,
    pub confirmed: usize,
    pub rejected: usize,
    /// Transaction attempts used (1 unless the store was busy).
    pub attempts: usize,
    /// Latest committed balance per touched account.
    pub balances: HashMap<AccountId, i64>,
    pub notifications: Vec<StakeNotification>,
}

/// Decision for one elapsed stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub stake_id: StakeId,
    pub won: bool,
}

/// Outcome of one committed settlement transaction.
#[derive(Debug, Clone, Default)]
pub struct SettleReport {
    pub won: usize,
    pub lost: usize,
    /// Stakes no longer `confirmed` when the transaction ran.
    pub already_resolved: usize,
    /// Verdicts for stakes not present in hot storage.
    pub missing: usize,
    /// Total minor units credited.
    pub credited: i64,
    pub balances: HashMap<AccountId, i64>,
    pub notifications: Vec<StakeNotification>,
}

/// A verified cold-storage object covering one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub object_key: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub sha256: String,
    pub size_bytes: u64,
    pub stake_count: usize,
    pub entry_count: usize,
    pub archived_at: DateTime<Utc>,
}

/// Rows removed from hot storage after a verified archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub ledger_entries: usize,
    pub stakes: usize,
}

/// Result of the explicit balance recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub account_id: AccountId,
    pub previous_balance: i64,
    pub repaired_balance: i64,
}

/// Owner of the single writer connection.
pub struct LedgerStore {
    conn: Connection,
    path: PathBuf,
    flush_retry: RetryPolicy,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl LedgerStore {
    /// Open (or create) the store at `path` with WAL journaling so readers
    /// never block the writer.
    pub fn open(path: impl AsRef<Path>, cfg: &LedgerConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(store_err)?;

        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(store_err)?;
        if !mode.eq_ignore_ascii_case("wal") {
            return Err(StakeflowError::Store(format!(
                "journal_mode is {mode}, WAL required for concurrent readers"
            )));
        }
        conn.pragma_update(None, "synchronous", "FULL").map_err(store_err)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(store_err)?;
        conn.busy_timeout(cfg.busy_timeout).map_err(store_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(store_err)?;

        info!(path = %path.display(), "ledger store opened");
        Ok(Self {
            conn,
            path,
            flush_retry: RetryPolicy::new(
                cfg.flush_max_attempts,
                cfg.flush_retry_base,
                cfg.flush_retry_max,
                constants::DEFAULT_RETRY_JITTER_PCT,
            ),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a read-only connection on the same database.
    pub fn open_reader(&self) -> Result<StoreReader> {
        StoreReader::open(&self.path)
    }

    /// Create the account if this is its first contact. Idempotent.
    pub fn open_account(&mut self, account_id: AccountId, now: DateTime<Utc>) -> Result<Account> {
        ensure_account(&self.conn, account_id, now).map_err(store_err)?;
        self.conn
            .query_row(
                "SELECT balance, version, created_at FROM accounts WHERE id = ?1",
                params![account_id.to_string()],
                |row| {
                    Ok(Account {
                        id: account_id,
                        balance: row.get(0)?,
                        version: row.get(1)?,
                        created_at: from_ms(row.get(2)?),
                    })
                },
            )
            .map_err(store_err)
    }

    /// Credit external funds. Creates the account if needed.
    pub fn deposit(
        &mut self,
        account_id: AccountId,
        amount: i64,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        if amount <= 0 {
            return Err(StakeflowError::InvalidAmount {
                reason: format!("deposit must be positive, got {amount}"),
            });
        }
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;
        ensure_account(&tx, account_id, now).map_err(store_err)?;
        let balance_after = credit(&tx, account_id, amount).map_err(store_err)?;
        let entry = LedgerEntry {
            id: LedgerEntryId::new(),
            account_id,
            amount,
            balance_after,
            reference_type: ReferenceType::Deposit,
            reference_id: None,
            metadata,
            created_at: now,
        };
        append_entry(&tx, &entry).map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        info!(account = %account_id, amount, balance_after, "deposit committed");
        Ok(entry)
    }

    /// Commit a batch of stakes in one transaction.
    ///
    /// Busy/locked conditions retry the whole batch with backoff; since a
    /// failed attempt rolls back completely, every retry re-evaluates every
    /// stake from scratch. Any failure surfaces as `TransactionAborted`.
    pub fn flush_stakes(&mut self, drafts: &[StakeDraft], now: DateTime<Utc>) -> Result<FlushReport> {
        if drafts.is_empty() {
            return Ok(FlushReport::default());
        }
        let policy = self.flush_retry.clone();
        let (result, attempts) = policy.retry_blocking(
            |attempt| {
                if attempt > 0 {
                    warn!(attempt, batch = drafts.len(), "retrying busy batch transaction");
                }
                self.flush_once(drafts, now)
            },
            is_transient,
        );
        match result {
            Ok(mut report) => {
                report.attempts = attempts;
                Ok(report)
            }
            Err(e) => Err(StakeflowError::TransactionAborted {
                reason: format!("{e} (after {attempts} attempt(s))"),
            }),
        }
    }

    fn flush_once(&mut self, drafts: &[StakeDraft], now: DateTime<Utc>) -> rusqlite::Result<FlushReport> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = FlushReport::default();
        {
            let mut debit = tx.prepare_cached(
                "UPDATE accounts SET balance = balance - ?1, version = version + 1
                 WHERE id = ?2 AND balance >= ?1
                 RETURNING balance",
            )?;
            for draft in drafts {
                let account_id = draft.request.account_id;
                let after: Option<i64> = debit
                    .query_row(params![draft.request.amount, account_id.to_string()], |r| {
                        r.get(0)
                    })
                    .optional()?;

                match after {
                    Some(balance_after) => {
                        append_entry(
                            &tx,
                            &LedgerEntry {
                                id: LedgerEntryId::new(),
                                account_id,
                                amount: -draft.request.amount,
                                balance_after,
                                reference_type: ReferenceType::Stake,
                                reference_id: Some(draft.stake_id),
                                metadata: serde_json::json!({
                                    "cell": draft.cell.id.to_string(),
                                    "reward_rate": draft.request.reward_rate.to_string(),
                                }),
                                created_at: now,
                            },
                        )?;
                        insert_stake(&tx, draft, StakeStatus::Confirmed)?;
                        report.confirmed += 1;
                        report
                            .results
                            .insert(draft.stake_id, StakeResult::confirmed(draft.stake_id, balance_after));
                        report.balances.insert(account_id, balance_after);
                        report.notifications.push(StakeNotification {
                            account_id,
                            stake_id: draft.stake_id,
                            status: StakeStatus::Confirmed,
                            balance: Some(balance_after),
                            at: now,
                        });
                    }
                    None => {
                        // Still a terminal row: every admitted request is recorded.
                        insert_stake(&tx, draft, StakeStatus::RejectedInsufficientFunds)?;
                        report.rejected += 1;
                        report
                            .results
                            .insert(draft.stake_id, StakeResult::insufficient_funds(draft.stake_id));
                        report.notifications.push(StakeNotification {
                            account_id,
                            stake_id: draft.stake_id,
                            status: StakeStatus::RejectedInsufficientFunds,
                            balance: None,
                            at: now,
                        });
                    }
                }
            }
        }
        tx.commit()?;
        debug!(
            batch = drafts.len(),
            confirmed = report.confirmed,
            rejected = report.rejected,
            "stake batch committed"
        );
        Ok(report)
    }

    /// Apply resolution verdicts in one transaction.
    ///
    /// Only `confirmed` stakes transition; anything else is counted as
    /// already resolved and left untouched, so a stake is never credited twice.
    pub fn settle(&mut self, verdicts: &[Verdict], now: DateTime<Utc>) -> Result<SettleReport> {
        if verdicts.is_empty() {
            return Ok(SettleReport::default());
        }
        let policy = self.flush_retry.clone();
        let (result, _) = policy.retry_blocking(|_| self.settle_once(verdicts, now), is_transient);
        result.map_err(|e| StakeflowError::TransactionAborted {
            reason: e.to_string(),
        })
    }

    fn settle_once(&mut self, verdicts: &[Verdict], now: DateTime<Utc>) -> rusqlite::Result<SettleReport> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = SettleReport::default();
        {
            let mut load = tx.prepare_cached(
                "SELECT account_id, amount, reward_rate, status FROM stakes WHERE id = ?1",
            )?;
            let mut mark = tx.prepare_cached(
                "UPDATE stakes SET status = ?2, resolved_at = ?3, payout = ?4
                 WHERE id = ?1 AND status = 'confirmed'",
            )?;

            for verdict in verdicts {
                let id = verdict.stake_id.to_string();
                let row = load
                    .query_row(params![id], |r| {
                        Ok((
                            parse_col::<AccountId>(r, 0)?,
                            r.get::<_, i64>(1)?,
                            parse_col::<Decimal>(r, 2)?,
                            parse_col::<StakeStatus>(r, 3)?,
                        ))
                    })
                    .optional()?;
                let Some((account_id, amount, rate, status)) = row else {
                    report.missing += 1;
                    continue;
                };
                let next = if verdict.won { StakeStatus::Won } else { StakeStatus::Lost };
                if !status.can_transition_to(next) {
                    report.already_resolved += 1;
                    continue;
                }

                let payout = verdict.won.then(|| payout_for(amount, rate));
                if mark.execute(params![id, next.as_str(), to_ms(now), payout])? == 0 {
                    report.already_resolved += 1;
                    continue;
                }

                let mut balance = None;
                if let Some(payout) = payout.filter(|p| *p > 0) {
                    let balance_after = credit(&tx, account_id, payout)?;
                    append_entry(
                        &tx,
                        &LedgerEntry {
                            id: LedgerEntryId::new(),
                            account_id,
                            amount: payout,
                            balance_after,
                            reference_type: ReferenceType::Payout,
                            reference_id: Some(verdict.stake_id),
                            metadata: serde_json::json!({
                                "stake_amount": amount,
                                "reward_rate": rate.to_string(),
                            }),
                            created_at: now,
                        },
                    )?;
                    report.credited += payout;
                    report.balances.insert(account_id, balance_after);
                    balance = Some(balance_after);
                }
                if verdict.won {
                    report.won += 1;
                } else {
                    report.lost += 1;
                }
                report.notifications.push(StakeNotification {
                    account_id,
                    stake_id: verdict.stake_id,
                    status: next,
                    balance,
                    at: now,
                });
            }
        }
        tx.commit()?;
        Ok(report)
    }

    /// Persist price samples.
    pub fn append_prices(&mut self, samples: &[PriceSample]) -> Result<usize> {
        let tx = self.conn.transaction().map_err(store_err)?;
        {
            let mut stmt = tx
                .prepare_cached("INSERT INTO price_samples (at, price) VALUES (?1, ?2)")
                .map_err(store_err)?;
            for s in samples {
                stmt.execute(params![to_ms(s.at), s.price.to_string()])
                    .map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)?;
        Ok(samples.len())
    }

    /// Drop samples older than `before` (trailing retention window).
    pub fn prune_prices(&mut self, before: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute("DELETE FROM price_samples WHERE at < ?1", params![to_ms(before)])
            .map_err(store_err)
    }

    /// Record a verified archive and advance the marker monotonically.
    /// Returns the marker value after the update.
    ///
    /// A manifest, once recorded, is never rewritten: recording the same
    /// digest again only moves the marker, and a different digest for an
    /// existing key is [`StakeflowError::ArchiveConflict`].
    pub fn record_archive(&mut self, manifest: &ArchiveManifest) -> Result<DateTime<Utc>> {
        let tx = self.conn.transaction().map_err(store_err)?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT sha256 FROM archive_manifest WHERE object_key = ?1",
                params![manifest.object_key],
                |r| r.get(0),
            )
            .optional()
            .map_err(store_err)?;
        match existing {
            Some(existing) if existing != manifest.sha256 => {
                return Err(StakeflowError::ArchiveConflict {
                    key: manifest.object_key.clone(),
                    existing,
                });
            }
            Some(_) => {}
            None => {
                tx.execute(
                    "INSERT INTO archive_manifest
                        (object_key, period_start, period_end, sha256, size_bytes, stake_count, entry_count, archived_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        manifest.object_key,
                        to_ms(manifest.period_start),
                        to_ms(manifest.period_end),
                        manifest.sha256,
                        i64::try_from(manifest.size_bytes).unwrap_or(i64::MAX),
                        i64::try_from(manifest.stake_count).unwrap_or(i64::MAX),
                        i64::try_from(manifest.entry_count).unwrap_or(i64::MAX),
                        to_ms(manifest.archived_at),
                    ],
                )
                .map_err(store_err)?;
            }
        }
        tx.execute(
            "INSERT INTO archive_marker (id, last_success_at) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET
                last_success_at = MAX(last_success_at, excluded.last_success_at)",
            params![to_ms(manifest.archived_at)],
        )
        .map_err(store_err)?;
        let marker: i64 = tx
            .query_row("SELECT last_success_at FROM archive_marker WHERE id = 1", [], |r| r.get(0))
            .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(from_ms(marker))
    }

    /// Remove rows of a verified archive that are older than `cutoff`.
    ///
    /// Ledger sums of the removed rows are folded into
    /// `archived_ledger_totals` in the same transaction so reconciliation
    /// keeps balancing. Schema triggers refuse to delete anything a manifest
    /// does not cover.
    pub fn purge_archived(&mut self, object_key: &str, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;
        let period: Option<(i64, i64)> = tx
            .query_row(
                "SELECT period_start, period_end FROM archive_manifest WHERE object_key = ?1",
                params![object_key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(store_err)?;
        let Some((start, end)) = period else {
            return Err(StakeflowError::ArchivePeriodOpen {
                reason: format!("no verified archive recorded for {object_key}"),
            });
        };
        let upper = end.min(to_ms(cutoff));
        if upper <= start {
            return Ok(PurgeReport::default());
        }

        tx.execute(
            "INSERT INTO archived_ledger_totals (account_id, total, entry_count)
             SELECT account_id, SUM(amount), COUNT(*) FROM ledger_entries
             WHERE created_at >= ?1 AND created_at < ?2
             GROUP BY account_id
             ON CONFLICT(account_id) DO UPDATE SET
                total = total + excluded.total,
                entry_count = entry_count + excluded.entry_count",
            params![start, upper],
        )
        .map_err(store_err)?;
        let ledger_entries = tx
            .execute(
                "DELETE FROM ledger_entries WHERE created_at >= ?1 AND created_at < ?2",
                params![start, upper],
            )
            .map_err(store_err)?;
        let stakes = tx
            .execute(
                "DELETE FROM stakes WHERE placed_at >= ?1 AND placed_at < ?2
                   AND status IN ('won', 'lost', 'rejected_insufficient_funds')",
                params![start, upper],
            )
            .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        info!(object_key, ledger_entries, stakes, "archived rows purged from hot storage");
        Ok(PurgeReport { ledger_entries, stakes })
    }

    /// Recovery action: overwrite the cached balance with the ledger sum.
    pub fn repair_balance(&mut self, account_id: AccountId) -> Result<RepairReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_err)?;
        let id = account_id.to_string();
        let previous: Option<i64> = tx
            .query_row("SELECT balance FROM accounts WHERE id = ?1", params![id], |r| r.get(0))
            .optional()
            .map_err(store_err)?;
        let Some(previous_balance) = previous else {
            return Err(StakeflowError::AccountNotFound(account_id));
        };
        let repaired_balance: i64 = tx
            .query_row(
                "SELECT COALESCE((SELECT SUM(amount) FROM ledger_entries WHERE account_id = ?1), 0)
                      + COALESCE((SELECT total FROM archived_ledger_totals WHERE account_id = ?1), 0)",
                params![id],
                |r| r.get(0),
            )
            .map_err(store_err)?;
        tx.execute(
            "UPDATE accounts SET balance = ?2, version = version + 1 WHERE id = ?1",
            params![id, repaired_balance],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        warn!(
            account = %account_id,
            previous_balance,
            repaired_balance,
            "balance repaired from ledger sum"
        );
        Ok(RepairReport {
            account_id,
            previous_balance,
            repaired_balance,
        })
    }
}

fn ensure_account(conn: &Connection, account_id: AccountId, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.prepare_cached(
        "INSERT OR IGNORE INTO accounts (id, balance, version, created_at) VALUES (?1, 0, 0, ?2)",
    )?
    .execute(params![account_id.to_string(), to_ms(now)])?;
    Ok(())
}

fn credit(tx: &Transaction<'_>, account_id: AccountId, amount: i64) -> rusqlite::Result<i64> {
    tx.prepare_cached(
        "UPDATE accounts SET balance = balance + ?1, version = version + 1
         WHERE id = ?2
         RETURNING balance",
    )?
    .query_row(params![amount, account_id.to_string()], |r| r.get(0))
}

fn append_entry(tx: &Transaction<'_>, entry: &LedgerEntry) -> rusqlite::Result<()> {
    tx.prepare_cached(
        "INSERT INTO ledger_entries
            (id, account_id, amount, balance_after, reference_type, reference_id, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?
    .execute(params![
        entry.id.to_string(),
        entry.account_id.to_string(),
        entry.amount,
        entry.balance_after,
        entry.reference_type.as_str(),
        entry.reference_id.map(|id| id.to_string()),
        entry.metadata.to_string(),
        to_ms(entry.created_at),
    ])?;
    Ok(())
}

fn insert_stake(tx: &Transaction<'_>, draft: &StakeDraft, status: StakeStatus) -> rusqlite::Result<()> {
    tx.prepare_cached(
        "INSERT INTO stakes
            (id, account_id, cell_column, cell_row, window_start, window_end,
             price_low, price_high, amount, reward_rate, status, placed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )?
    .execute(params![
        draft.stake_id.to_string(),
        draft.request.account_id.to_string(),
        draft.cell.id.column,
        draft.cell.id.row,
        to_ms(draft.cell.window_start),
        to_ms(draft.cell.window_end),
        draft.cell.price_low.to_string(),
        draft.cell.price_high.to_string(),
        draft.request.amount,
        draft.request.reward_rate.to_string(),
        status.as_str(),
        to_ms(draft.placed_at),
    ])?;
    Ok(())
}
