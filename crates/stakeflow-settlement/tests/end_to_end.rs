//! Placement through resolution, reconciliation and archival against one
//! real store, driven by a manual clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use stakeflow_ingress::{AdmissionGate, PlacementRules, PriceHealthMonitor, PriceIngest, StakeService};
use stakeflow_ledger::{LedgerStore, LedgerWriter, PurgeReport, StoreReader, Verdict, WriterHandle};
use stakeflow_settlement::*;
use stakeflow_types::*;
use tokio::sync::watch;

/// Column 200 of the default 5s grid.
const START_MS: i64 = 1_000_000;
/// Column 203: window [1_015_000, 1_020_000).
const COLUMN: i64 = 203;

fn ts(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

struct Harness {
    dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    monitor: Arc<PriceHealthMonitor>,
    writer: WriterHandle,
    reader: StoreReader,
    service: StakeService,
    ingest: PriceIngest,
}

impl Harness {
    fn new() -> Self {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let cfg = LedgerConfig::default();
        let store = LedgerStore::open(dir.path().join("ledger.db"), &cfg).unwrap();
        let reader = store.open_reader().unwrap();
        let clock = Arc::new(ManualClock::at_millis(START_MS));
        let (writer, _join) = LedgerWriter::spawn(store, &cfg, clock.clone()).unwrap();
        let monitor = Arc::new(PriceHealthMonitor::new(
            HealthConfig {
                recovery_window: Duration::ZERO,
                ..HealthConfig::default()
            },
            clock.clone(),
        ));
        monitor.record_sample(clock.now());

        let queue = QueueConfig {
            batch_timeout: Duration::from_millis(5),
            ..QueueConfig::default()
        };
        let rules = PlacementRules::new(GridSpec::default(), clock.clone(), reader.clone());
        let (service, flusher) = StakeService::new(
            &queue,
            AdmissionGate::new(monitor.clone()),
            rules,
            writer.clone(),
            reader.clone(),
            clock.clone(),
        );
        tokio::spawn(flusher.run());
        let ingest = PriceIngest::new(monitor.clone(), writer.clone());
        Self {
            dir,
            clock,
            monitor,
            writer,
            reader,
            service,
            ingest,
        }
    }

    fn worker(&self) -> ResolutionWorker {
        self.worker_with(ResolutionConfig::default())
    }

    fn worker_with(&self, cfg: ResolutionConfig) -> ResolutionWorker {
        ResolutionWorker::new(
            self.reader.clone(),
            self.writer.clone(),
            self.monitor.clone(),
            self.clock.clone(),
            cfg,
        )
    }

    fn checker(&self) -> IntegrityChecker {
        IntegrityChecker::new(self.reader.clone(), self.writer.clone(), self.clock.clone())
    }

    fn archiver(&self, cold: Arc<dyn ColdStore>) -> Archiver {
        self.archiver_retaining(cold, Duration::ZERO)
    }

    fn archiver_retaining(&self, cold: Arc<dyn ColdStore>, hot_retention: Duration) -> Archiver {
        Archiver::new(
            self.reader.clone(),
            self.writer.clone(),
            cold,
            self.clock.clone(),
            ArchiveConfig {
                hot_retention,
                upload_max_attempts: 2,
                upload_retry_base: Duration::from_millis(1),
                upload_retry_max: Duration::from_millis(2),
                ..ArchiveConfig::default()
            },
        )
    }

    async fn funded(&self, amount: i64) -> AccountId {
        let acct = AccountId::new();
        self.writer.deposit(acct, amount, serde_json::json!({"source": "test"})).await.unwrap();
        acct
    }

    async fn stake(&self, account: AccountId, row: i64) -> StakeId {
        self.stake_at(account, COLUMN, row).await
    }

    async fn stake_at(&self, account: AccountId, column: i64, row: i64) -> StakeId {
        let request = StakeRequest::new(account, CellId::new(column, row), 10, Decimal::TWO);
        match self.service.place(request).await.unwrap() {
            PlacementOutcome::Confirmed { stake_id, .. } => stake_id,
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    /// Advance the clock to `ms` and ingest a tick observed then.
    async fn tick(&self, ms: i64, price: i64) {
        self.clock.set(ts(ms));
        self.ingest
            .ingest(PriceSample::new(ts(ms), Decimal::new(price, 0)))
            .await
            .unwrap();
    }

    fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("ledger.db")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn twenty_concurrent_stakes_never_overdraw() {
    let h = Arc::new(Harness::new());
    let acct = h.funded(100).await;

    let mut columns: Vec<i64> = (300..320).collect();
    columns.shuffle(&mut rand::thread_rng());
    let mut tasks = Vec::new();
    for column in columns {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.service
                .place(StakeRequest::new(acct, CellId::new(column, 1), 10, Decimal::TWO))
                .await
                .unwrap()
        }));
    }
    let mut confirmed = 0;
    let mut insufficient = 0;
    for t in tasks {
        match t.await.unwrap() {
            PlacementOutcome::Confirmed { new_balance, .. } => {
                assert!(new_balance >= 0);
                confirmed += 1;
            }
            PlacementOutcome::Rejected {
                reason: RejectReason::InsufficientFunds,
                stake_id: Some(_),
            } => insufficient += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(confirmed, 10);
    assert_eq!(insufficient, 10);
    assert_eq!(h.reader.balance(acct).unwrap(), Some(0));

    let report = h.checker().check().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.accounts_checked, 1);
}

#[tokio::test]
async fn in_range_sample_wins_and_pays_once() {
    let h = Harness::new();
    let winner = h.funded(100).await;
    let loser = h.funded(100).await;
    // Row 10 covers [100, 110]; row 5 covers [50, 60].
    let winning = h.stake(winner, 10).await;
    let losing = h.stake(loser, 5).await;

    h.tick(1_016_000, 95).await;
    h.tick(1_017_000, 108).await;
    h.tick(1_018_000, 120).await;
    h.tick(1_020_000, 200).await;
    h.clock.set(ts(1_020_500));

    let worker = h.worker();
    let report = worker.run_once().await.unwrap();
    assert!(!report.paused);
    assert_eq!(report.scanned, 2);
    assert_eq!((report.won, report.lost, report.deferred), (1, 1, 0));
    assert_eq!(report.credited, 20);

    assert_eq!(h.reader.balance(winner).unwrap(), Some(110));
    assert_eq!(h.reader.balance(loser).unwrap(), Some(90));
    let won = h.reader.stake(winning).unwrap().unwrap();
    assert_eq!(won.status, StakeStatus::Won);
    assert_eq!(won.payout, Some(20));
    let lost = h.reader.stake(losing).unwrap().unwrap();
    assert_eq!(lost.status, StakeStatus::Lost);
    assert_eq!(lost.payout, None);

    let payouts: Vec<_> = h
        .reader
        .ledger_history(winner, None, None)
        .unwrap()
        .into_iter()
        .filter(|e| e.reference_type == ReferenceType::Payout)
        .collect();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, 20);
    assert_eq!(payouts[0].balance_after, 110);
    assert_eq!(payouts[0].reference_id, Some(winning));
    // A loss writes no ledger row.
    assert_eq!(h.reader.ledger_history(loser, None, None).unwrap().len(), 2);

    // Nothing left to scan, and a repeated verdict credits nothing.
    assert_eq!(worker.run_once().await.unwrap().scanned, 0);
    let again = h
        .writer
        .settle(vec![Verdict {
            stake_id: winning,
            won: true,
        }])
        .await
        .unwrap();
    assert_eq!(again.already_resolved, 1);
    assert_eq!(again.credited, 0);
    assert_eq!(h.reader.balance(winner).unwrap(), Some(110));

    let replay = worker.replay_stake(winning).await.unwrap();
    assert!(replay.matches);
    let verdict = replay.recomputed.unwrap();
    assert!(verdict.won);
    assert_eq!(verdict.samples_considered, 3);
    assert_eq!(verdict.hit.map(|s| s.price), Some(Decimal::new(108, 0)));

    assert!(h.checker().check().await.unwrap().is_clean());
}

#[tokio::test]
async fn critical_feed_pauses_and_empty_window_defers() {
    let h = Harness::new();
    let acct = h.funded(100).await;
    let stake = h.stake(acct, 10).await;

    // Feed silent well past the critical threshold.
    h.clock.set(ts(1_021_000));
    let worker = h.worker();
    let paused = worker.run_once().await.unwrap();
    assert!(paused.paused);
    assert_eq!(paused.scanned, 0);
    assert_eq!(h.reader.stake(stake).unwrap().unwrap().status, StakeStatus::Confirmed);

    // Feed resumes after the window: nothing inside it to decide on.
    h.tick(1_021_000, 105).await;
    assert_eq!(h.monitor.current_status(), HealthStatus::Healthy);
    let deferred = worker.run_once().await.unwrap();
    assert_eq!(deferred.deferred, 1);
    assert_eq!(deferred.resolved(), 0);
    assert_eq!(h.reader.stake(stake).unwrap().unwrap().status, StakeStatus::Confirmed);

    // A late tick for the window arrives; freshness does not move back.
    h.ingest
        .ingest(PriceSample::new(ts(1_016_000), Decimal::new(105, 0)))
        .await
        .unwrap();
    assert_eq!(h.monitor.last_sample(), Some(ts(1_021_000)));
    let resolved = worker.run_once().await.unwrap();
    assert_eq!(resolved.won, 1);
    assert_eq!(h.reader.balance(acct).unwrap(), Some(110));
}

#[tokio::test]
async fn worker_loop_resolves_and_prunes_until_shutdown() {
    let h = Harness::new();
    let acct = h.funded(100).await;
    let stake = h.stake(acct, 10).await;
    h.tick(1_016_000, 105).await;
    h.tick(1_020_000, 200).await;

    let worker = h.worker_with(ResolutionConfig {
        interval: Duration::from_millis(10),
        price_retention: Duration::from_secs(2),
        ..ResolutionConfig::default()
    });
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(worker.run(shutdown));

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.reader.stake(stake).unwrap().unwrap().status != StakeStatus::Won {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker never resolved the stake");
    assert_eq!(h.reader.balance(acct).unwrap(), Some(110));

    // Samples older than the retention window are trimmed by the same loop.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !h.reader.price_samples(ts(0), ts(1_018_000)).unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("old samples were never pruned");
    assert_eq!(h.reader.price_samples(ts(1_018_000), ts(1_021_000)).unwrap().len(), 1);

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("worker ignored shutdown")
        .unwrap();
}

#[tokio::test]
async fn window_not_yet_covered_by_feed_is_deferred() {
    let h = Harness::new();
    let acct = h.funded(100).await;
    h.stake(acct, 10).await;

    // Window elapsed by the clock, but the newest tick is inside it.
    h.tick(1_019_000, 105).await;
    h.clock.set(ts(1_020_100));
    let report = h.worker().run_once().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.resolved(), 0);
}

#[tokio::test]
async fn empty_windows_do_not_starve_later_stakes() {
    let h = Harness::new();
    let acct = h.funded(100).await;
    let empty = h.stake_at(acct, COLUMN, 10).await;
    // Column 204: window [1_020_000, 1_025_000).
    let decidable = h.stake_at(acct, COLUMN + 1, 10).await;

    // The feed skips column 203 entirely.
    h.tick(1_021_000, 105).await;
    h.tick(1_025_000, 200).await;
    h.clock.set(ts(1_025_500));

    let worker = h.worker_with(ResolutionConfig {
        max_stakes_per_cycle: 1,
        ..ResolutionConfig::default()
    });
    let first = worker.run_once().await.unwrap();
    assert_eq!(first.scanned, 2);
    assert_eq!((first.deferred, first.empty_windows, first.stranded), (1, 1, 0));
    assert_eq!(first.won, 1);
    assert_eq!(h.reader.stake(decidable).unwrap().unwrap().status, StakeStatus::Won);

    for _ in 0..3 {
        let again = worker.run_once().await.unwrap();
        assert_eq!((again.scanned, again.deferred, again.resolved()), (1, 1, 0));
    }
    assert_eq!(h.reader.stake(empty).unwrap().unwrap().status, StakeStatus::Confirmed);

    // Once the window is older than price retention it is reported as stranded.
    let strict = h.worker_with(ResolutionConfig {
        price_retention: Duration::from_secs(1),
        ..ResolutionConfig::default()
    });
    let report = strict.run_once().await.unwrap();
    assert_eq!((report.empty_windows, report.stranded), (1, 1));
}

#[tokio::test]
async fn replay_requires_a_resolved_stake() {
    let h = Harness::new();
    let acct = h.funded(100).await;
    let stake = h.stake(acct, 10).await;
    let worker = h.worker();

    assert!(matches!(
        worker.replay_stake(stake).await,
        Err(StakeflowError::StakeNotResolved(id)) if id == stake
    ));
    assert!(matches!(
        worker.replay_stake(StakeId::new()).await,
        Err(StakeflowError::StakeNotFound(_))
    ));
}

#[tokio::test]
async fn periodic_check_publishes_reports_until_shutdown() {
    let h = Harness::new();
    let acct = h.funded(100).await;
    let (stop, shutdown) = watch::channel(false);
    let (running, mut reports) = h.checker().spawn_periodic(Duration::from_millis(10), shutdown);

    let first = tokio::time::timeout(Duration::from_secs(5), reports.wait_for(Option::is_some))
        .await
        .expect("no report published")
        .unwrap()
        .clone();
    assert!(first.is_some_and(|r| r.is_clean()));

    let raw = rusqlite::Connection::open(h.db_path()).unwrap();
    raw.execute(
        "UPDATE accounts SET balance = balance + 5 WHERE id = ?1",
        rusqlite::params![acct.to_string()],
    )
    .unwrap();
    let drifted = tokio::time::timeout(
        Duration::from_secs(5),
        reports.wait_for(|r| r.as_ref().is_some_and(|r| !r.is_clean())),
    )
    .await
    .expect("drift never reported")
    .unwrap()
    .clone();
    let drifts = drifted.map(|r| r.drifts).unwrap_or_default();
    assert_eq!(drifts.len(), 1);
    assert_eq!(drifts[0].account_id, acct);
    // Reporting never corrects.
    assert_eq!(h.reader.balance(acct).unwrap(), Some(105));

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("checker ignored shutdown")
        .unwrap();
}

#[tokio::test]
async fn drift_is_reported_not_corrected_until_repair() {
    let h = Harness::new();
    let acct = h.funded(100).await;
    h.stake(acct, 10).await;

    let raw = rusqlite::Connection::open(h.db_path()).unwrap();
    raw.execute(
        "UPDATE accounts SET balance = balance + 5 WHERE id = ?1",
        rusqlite::params![acct.to_string()],
    )
    .unwrap();

    let checker = h.checker();
    let report = checker.check().await.unwrap();
    assert_eq!(report.drifts.len(), 1);
    let drift = report.drifts[0];
    assert_eq!(drift.account_id, acct);
    assert_eq!((drift.balance, drift.ledger_sum), (95, 90));
    assert!(matches!(
        report.drift_errors()[0],
        StakeflowError::BalanceDrift { balance: 95, ledger_sum: 90, .. }
    ));

    // A second pass still sees it: check never writes.
    assert_eq!(checker.check().await.unwrap().drifts.len(), 1);

    let repair = checker.repair(acct).await.unwrap();
    assert_eq!(repair.previous_balance, 95);
    assert_eq!(repair.repaired_balance, 90);
    assert!(checker.check().await.unwrap().is_clean());
    assert_eq!(h.reader.balance(acct).unwrap(), Some(90));
}

/// Cold store that silently flips the last byte it stores.
#[derive(Debug)]
struct CorruptingStore(FsColdStore);

impl ColdStore for CorruptingStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut damaged = bytes.to_vec();
        if let Some(last) = damaged.last_mut() {
            *last ^= 0xFF;
        }
        self.0.put(key, &damaged)
    }

    fn stat(&self, key: &str) -> Result<ObjectStat> {
        self.0.stat(key)
    }
}

/// Cold store whose writes always fail.
#[derive(Debug, Default)]
struct FailingStore {
    attempts: std::sync::atomic::AtomicUsize,
}

impl ColdStore for FailingStore {
    fn put(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
        self.attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Err(StakeflowError::Io("bucket unreachable".into()))
    }

    fn stat(&self, key: &str) -> Result<ObjectStat> {
        Err(StakeflowError::Io(format!("{key} not found")))
    }
}

/// One resolved winning stake inside `[START_MS, START_MS + 60s)`.
async fn settled_period(h: &Harness) -> (AccountId, ArchivePeriod) {
    let acct = h.funded(100).await;
    h.stake(acct, 10).await;
    h.tick(1_017_000, 105).await;
    h.tick(1_020_000, 200).await;
    h.clock.set(ts(1_020_500));
    assert_eq!(h.worker().run_once().await.unwrap().won, 1);
    h.clock.set(ts(START_MS + 120_000));
    (acct, ArchivePeriod::new(ts(START_MS), ts(START_MS + 60_000)))
}

#[tokio::test]
async fn verified_archive_purges_and_advances_marker() {
    let h = Harness::new();
    let (acct, period) = settled_period(&h).await;
    let cold_dir = tempfile::tempdir().unwrap();
    let cold = Arc::new(FsColdStore::new(cold_dir.path()).unwrap());
    let archiver = h.archiver(cold.clone());
    assert_eq!(archiver.marker().unwrap(), None);

    let outcome = archiver.archive(period).await.unwrap();
    assert_eq!(outcome.manifest.stake_count, 1);
    // Deposit, stake debit, payout.
    assert_eq!(outcome.manifest.entry_count, 3);
    assert_eq!(outcome.marker, h.clock.now());
    assert_eq!(outcome.purged.stakes, 1);
    assert_eq!(outcome.purged.ledger_entries, 3);

    let stored = cold.stat(&period.object_key()).unwrap();
    assert_eq!(stored.sha256, outcome.manifest.sha256);
    assert_eq!(stored.size_bytes, outcome.manifest.size_bytes);
    let bytes = std::fs::read(cold.root().join(period.object_key())).unwrap();
    let snapshot: ArchiveSnapshot = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(snapshot.stakes.len(), 1);
    assert_eq!(snapshot.ledger_entries.len(), 3);

    assert_eq!(h.reader.hot_counts().unwrap(), (0, 0));
    assert_eq!(h.reader.balance(acct).unwrap(), Some(110));
    assert!(h.checker().check().await.unwrap().is_clean());
    assert_eq!(
        h.reader.archive_manifest(&period.object_key()).unwrap(),
        Some(outcome.manifest.clone())
    );

    // The next period archives later; the marker only moves forward.
    h.clock.advance(Duration::from_secs(1));
    let next = archiver
        .archive(ArchivePeriod::new(period.end, ts(START_MS + 120_000)))
        .await
        .unwrap();
    assert!(next.marker > outcome.marker);
    assert_eq!(archiver.marker().unwrap(), Some(next.marker));
}

#[tokio::test]
async fn archiving_a_period_again_never_rewrites_cold_data() {
    let h = Harness::new();
    let (acct, period) = settled_period(&h).await;
    let cold_dir = tempfile::tempdir().unwrap();
    let cold = Arc::new(FsColdStore::new(cold_dir.path()).unwrap());
    let object = cold.root().join(period.object_key());
    let retention = Duration::from_secs(600);

    // Rows are still inside hot retention: archived, nothing purged yet.
    let first = h.archiver_retaining(cold.clone(), retention).archive(period).await.unwrap();
    assert_eq!(first.purged, PurgeReport::default());
    assert_eq!(h.reader.hot_counts().unwrap(), (1, 3));
    let original = std::fs::read(&object).unwrap();

    // Later run once the rows have aged: verified against the manifest, then purged.
    h.clock.advance(Duration::from_secs(3_600));
    let second = h.archiver_retaining(cold.clone(), retention).archive(period).await.unwrap();
    assert_eq!(second.manifest, first.manifest);
    assert_eq!(second.marker, first.marker);
    assert_eq!(second.purged.stakes, 1);
    assert_eq!(second.purged.ledger_entries, 3);
    assert_eq!(h.reader.hot_counts().unwrap(), (0, 0));

    // With the hot rows gone, another run must still leave the full object.
    let third = h.archiver(cold.clone()).archive(period).await.unwrap();
    assert_eq!(third.purged, PurgeReport::default());
    assert_eq!(std::fs::read(&object).unwrap(), original);
    let snapshot: ArchiveSnapshot = serde_json::from_slice(&original).unwrap();
    assert_eq!((snapshot.stakes.len(), snapshot.ledger_entries.len()), (1, 3));
    assert_eq!(
        h.reader.archive_manifest(&period.object_key()).unwrap(),
        Some(first.manifest)
    );
    assert_eq!(h.reader.balance(acct).unwrap(), Some(110));
    assert!(h.checker().check().await.unwrap().is_clean());
}

#[tokio::test]
async fn tampered_cold_object_blocks_the_purge() {
    let h = Harness::new();
    let (_acct, period) = settled_period(&h).await;
    let cold_dir = tempfile::tempdir().unwrap();
    let cold = Arc::new(FsColdStore::new(cold_dir.path()).unwrap());
    let archiver = h.archiver_retaining(cold.clone(), Duration::from_secs(600));
    archiver.archive(period).await.unwrap();

    std::fs::write(cold.root().join(period.object_key()), b"{}").unwrap();
    h.clock.advance(Duration::from_secs(3_600));
    let err = archiver.archive(period).await.unwrap_err();
    assert!(matches!(err, StakeflowError::ArchiveVerificationFailed { .. }));
    assert_eq!(h.reader.hot_counts().unwrap(), (1, 3));
}

#[tokio::test]
async fn corrupted_upload_keeps_hot_rows_and_marker() {
    let h = Harness::new();
    let (_acct, period) = settled_period(&h).await;
    let before = h.reader.hot_counts().unwrap();
    let cold_dir = tempfile::tempdir().unwrap();
    let cold = Arc::new(CorruptingStore(FsColdStore::new(cold_dir.path()).unwrap()));

    let err = h.archiver(cold).archive(period).await.unwrap_err();
    assert!(matches!(err, StakeflowError::ArchiveVerificationFailed { .. }));
    assert!(err.to_string().starts_with("SF_ERR_602"));

    assert_eq!(h.reader.hot_counts().unwrap(), before);
    assert_eq!(h.reader.last_archive_marker().unwrap(), None);
    assert_eq!(h.reader.archive_manifest(&period.object_key()).unwrap(), None);
}

#[tokio::test]
async fn failed_upload_is_retried_then_reported() {
    let h = Harness::new();
    let (_acct, period) = settled_period(&h).await;
    let cold = Arc::new(FailingStore::default());

    let err = h.archiver(cold.clone()).archive(period).await.unwrap_err();
    assert!(matches!(err, StakeflowError::UploadFailed { .. }));
    assert_eq!(cold.attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(h.reader.last_archive_marker().unwrap(), None);
}

#[tokio::test]
async fn open_or_unresolved_periods_are_refused() {
    let h = Harness::new();
    let acct = h.funded(100).await;
    h.stake(acct, 10).await;
    let cold_dir = tempfile::tempdir().unwrap();
    let archiver = h.archiver(Arc::new(FsColdStore::new(cold_dir.path()).unwrap()));

    // Ends in the future.
    let open = ArchivePeriod::new(ts(START_MS), ts(START_MS + 60_000));
    assert!(matches!(
        archiver.archive(open).await,
        Err(StakeflowError::ArchivePeriodOpen { .. })
    ));

    // Closed, but the stake in it is still confirmed.
    h.clock.set(ts(START_MS + 120_000));
    assert!(matches!(
        archiver.archive(open).await,
        Err(StakeflowError::ArchivePeriodOpen { .. })
    ));
    assert_eq!(h.reader.hot_counts().unwrap().0, 1);
}
