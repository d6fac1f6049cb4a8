//! Store-level lifecycle: funding, batched debits, settlement, archival purge.
//!
//! Exercises `LedgerStore` directly on a temp database and checks the
//! reconciliation identity after every step.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use stakeflow_ledger::{ArchiveManifest, LedgerStore, StakeDraft, StoreReader, Verdict};
use stakeflow_types::*;

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

fn open() -> (tempfile::TempDir, LedgerStore, StoreReader) {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = LedgerStore::open(dir.path().join("ledger.db"), &LedgerConfig::default()).unwrap();
    let reader = store.open_reader().unwrap();
    (dir, store, reader)
}

fn draft(account: AccountId, column: i64, amount: i64, placed_ms: i64) -> StakeDraft {
    let cell = GridSpec::default().cell(CellId::new(column, 10));
    StakeDraft::new(
        StakeRequest::new(account, cell.id, amount, Decimal::new(15, 1)),
        cell,
        at(placed_ms),
    )
    .unwrap()
}

fn assert_reconciled(reader: &StoreReader) {
    for check in reader.reconciliation().unwrap() {
        assert!(check.is_consistent(), "drift: {check:?}");
    }
}

#[test]
fn batch_debits_never_overdraw() {
    let (_dir, mut store, reader) = open();
    let acct = AccountId::new();
    store.deposit(acct, 100, serde_json::json!({"source": "test"}), at(1_000)).unwrap();

    let drafts: Vec<_> = (0..20).map(|i| draft(acct, 10 + i, 10, 1_000)).collect();
    let report = store.flush_stakes(&drafts, at(1_100)).unwrap();

    assert_eq!(report.confirmed, 10);
    assert_eq!(report.rejected, 10);
    assert_eq!(report.results.len(), 20);
    assert_eq!(reader.balance(acct).unwrap(), Some(0));
    assert_reconciled(&reader);

    // Each debit snapshots a distinct balance.
    let history = reader.ledger_history(acct, Some(at(1_100)), None).unwrap();
    let mut afters: Vec<i64> = history.iter().map(|e| e.balance_after).collect();
    afters.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(afters, vec![90, 80, 70, 60, 50, 40, 30, 20, 10, 0]);
}

#[test]
fn busy_store_is_retried_until_the_lock_clears() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let cfg = LedgerConfig {
        busy_timeout: Duration::from_millis(5),
        flush_max_attempts: 50,
        flush_retry_base: Duration::from_millis(5),
        flush_retry_max: Duration::from_millis(20),
        ..LedgerConfig::default()
    };
    let mut store = LedgerStore::open(&path, &cfg).unwrap();
    let reader = store.open_reader().unwrap();
    let acct = AccountId::new();
    store.deposit(acct, 100, serde_json::json!({}), at(1_000)).unwrap();

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute_batch("BEGIN IMMEDIATE").unwrap();
    let holder = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(60));
        raw.execute_batch("COMMIT").unwrap();
    });

    let report = store.flush_stakes(&[draft(acct, 10, 10, 1_000)], at(1_100)).unwrap();
    holder.join().unwrap();
    assert!(report.attempts > 1, "attempts: {}", report.attempts);
    assert_eq!(report.confirmed, 1);
    assert_eq!(reader.balance(acct).unwrap(), Some(90));
    assert_reconciled(&reader);
}

#[test]
fn busy_store_past_the_retry_budget_aborts_without_writes() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let cfg = LedgerConfig {
        busy_timeout: Duration::from_millis(5),
        flush_max_attempts: 2,
        flush_retry_base: Duration::from_millis(1),
        flush_retry_max: Duration::from_millis(1),
        ..LedgerConfig::default()
    };
    let mut store = LedgerStore::open(&path, &cfg).unwrap();
    let reader = store.open_reader().unwrap();
    let acct = AccountId::new();
    store.deposit(acct, 100, serde_json::json!({}), at(1_000)).unwrap();
    let before = reader.hot_counts().unwrap();

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute_batch("BEGIN IMMEDIATE").unwrap();
    let drafts: Vec<_> = (0..3).map(|i| draft(acct, 10 + i, 10, 1_000)).collect();
    let err = store.flush_stakes(&drafts, at(1_100)).unwrap_err();
    assert!(matches!(err, StakeflowError::TransactionAborted { .. }), "{err:?}");
    assert!(err.to_string().contains("after 2 attempt(s)"), "{err}");
    raw.execute_batch("ROLLBACK").unwrap();

    assert_eq!(reader.hot_counts().unwrap(), before);
    assert_eq!(reader.balance(acct).unwrap(), Some(100));
}

#[test]
fn winning_payout_is_floored_and_logged() {
    let (_dir, mut store, reader) = open();
    let acct = AccountId::new();
    store.deposit(acct, 100, serde_json::json!({}), at(1_000)).unwrap();
    let d = draft(acct, 10, 7, 1_000);
    store.flush_stakes(std::slice::from_ref(&d), at(1_000)).unwrap();

    let report = store
        .settle(&[Verdict { stake_id: d.stake_id, won: true }], at(60_000))
        .unwrap();
    // floor(7 * 1.5) = 10
    assert_eq!(report.credited, 10);

    let stake = reader.stake(d.stake_id).unwrap().unwrap();
    assert_eq!(stake.status, StakeStatus::Won);
    assert_eq!(stake.payout, Some(10));
    assert_eq!(stake.resolved_at, Some(at(60_000)));
    assert_eq!(reader.balance(acct).unwrap(), Some(103));

    let payout = reader.ledger_history(acct, Some(at(60_000)), None).unwrap();
    assert_eq!(payout.len(), 1);
    assert_eq!(payout[0].reference_type, ReferenceType::Payout);
    assert_eq!(payout[0].balance_after, 103);
    assert_reconciled(&reader);
}

#[test]
fn due_stakes_only_returns_elapsed_confirmed() {
    let (_dir, mut store, reader) = open();
    let acct = AccountId::new();
    store.deposit(acct, 100, serde_json::json!({}), at(0)).unwrap();
    // Default grid: 5s columns from the epoch.
    let early = draft(acct, 2, 5, 0); // window [10s, 15s)
    let late = draft(acct, 9, 5, 0); // window [45s, 50s)
    store.flush_stakes(&[early.clone(), late.clone()], at(0)).unwrap();

    let due = reader.due_stakes(at(15_000), None, 100).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, early.stake_id);
    assert!(reader.due_stakes(at(14_999), None, 100).unwrap().is_empty());
}

#[test]
fn due_stakes_pages_by_window_then_id() {
    let (_dir, mut store, reader) = open();
    let acct = AccountId::new();
    let other = AccountId::new();
    store.deposit(acct, 100, serde_json::json!({}), at(0)).unwrap();
    store.deposit(other, 100, serde_json::json!({}), at(0)).unwrap();
    // Two stakes share the first window, so the id breaks the tie.
    let drafts = [
        draft(acct, 2, 5, 0),
        draft(other, 2, 6, 0),
        draft(acct, 3, 5, 0),
        draft(acct, 4, 5, 0),
    ];
    store.flush_stakes(&drafts, at(0)).unwrap();

    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let page = reader.due_stakes(at(60_000), after, 3).unwrap();
        let Some(last) = page.last() else { break };
        after = Some((last.cell.window_end, last.id));
        seen.extend(page.iter().map(|s| (s.cell.window_end, s.id)));
    }
    assert_eq!(seen.len(), 4);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn purge_requires_manifest_and_keeps_reconciliation() {
    let (_dir, mut store, reader) = open();
    let acct = AccountId::new();
    store.deposit(acct, 100, serde_json::json!({}), at(1_000)).unwrap();
    let d = draft(acct, 10, 40, 1_000);
    store.flush_stakes(std::slice::from_ref(&d), at(1_000)).unwrap();
    store
        .settle(&[Verdict { stake_id: d.stake_id, won: false }], at(2_000))
        .unwrap();
    // Outside the archived period.
    store.deposit(acct, 5, serde_json::json!({}), at(20_000)).unwrap();

    let err = store.purge_archived("missing", at(10_000)).unwrap_err();
    assert!(matches!(err, StakeflowError::ArchivePeriodOpen { .. }));

    let manifest = ArchiveManifest {
        object_key: "period-0".into(),
        period_start: at(0),
        period_end: at(10_000),
        sha256: "ab".into(),
        size_bytes: 1,
        stake_count: 1,
        entry_count: 2,
        archived_at: at(30_000),
    };
    assert_eq!(store.record_archive(&manifest).unwrap(), at(30_000));
    let purged = store.purge_archived("period-0", at(30_000)).unwrap();
    assert_eq!(purged.ledger_entries, 2);
    assert_eq!(purged.stakes, 1);

    assert_eq!(reader.stake(d.stake_id).unwrap(), None);
    assert_eq!(reader.ledger_history(acct, None, None).unwrap().len(), 1);
    assert_eq!(reader.balance(acct).unwrap(), Some(65));
    assert_eq!(reader.ledger_sum(acct).unwrap(), 65);
    assert_eq!(reader.last_archive_marker().unwrap(), Some(at(30_000)));
    assert_eq!(reader.archive_manifest("period-0").unwrap(), Some(manifest));
    assert_reconciled(&reader);
}

#[test]
fn purge_respects_retention_cutoff() {
    let (_dir, mut store, reader) = open();
    let acct = AccountId::new();
    store.deposit(acct, 10, serde_json::json!({}), at(1_000)).unwrap();
    store.deposit(acct, 10, serde_json::json!({}), at(8_000)).unwrap();
    store
        .record_archive(&ArchiveManifest {
            object_key: "p".into(),
            period_start: at(0),
            period_end: at(10_000),
            sha256: "00".into(),
            size_bytes: 1,
            stake_count: 0,
            entry_count: 2,
            archived_at: at(10_000),
        })
        .unwrap();

    let purged = store.purge_archived("p", at(5_000)).unwrap();
    assert_eq!(purged.ledger_entries, 1);
    assert_eq!(reader.hot_counts().unwrap(), (0, 1));
    assert_reconciled(&reader);
}

#[test]
fn price_samples_are_half_open_and_prunable() {
    let (_dir, mut store, reader) = open();
    let samples = [
        PriceSample::new(at(1_000), Decimal::new(100, 0)),
        PriceSample::new(at(2_000), Decimal::new(101, 0)),
        PriceSample::new(at(3_000), Decimal::new(102, 0)),
    ];
    store.append_prices(&samples).unwrap();

    let window = reader.price_samples(at(1_000), at(3_000)).unwrap();
    assert_eq!(window, samples[..2].to_vec());

    assert_eq!(store.prune_prices(at(2_500)).unwrap(), 2);
    assert_eq!(reader.price_samples(at(0), at(10_000)).unwrap().len(), 1);
}

#[test]
fn reopen_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let acct = AccountId::new();
    {
        let mut store = LedgerStore::open(&path, &LedgerConfig::default()).unwrap();
        store.deposit(acct, 42, serde_json::json!({}), at(1_000)).unwrap();
    }
    let mut store = LedgerStore::open(&path, &LedgerConfig::default()).unwrap();
    let account = store.open_account(acct, at(2_000)).unwrap();
    assert_eq!(account.balance, 42);
    assert_eq!(account.version, 1);
    assert_eq!(account.created_at, at(1_000));
}
