//! Resolution worker: decides elapsed stakes from persisted price history.
//!
//! A stake wins iff some sample taken inside its cell's time window
//! (`window_start <= at < window_end`) has a price inside the cell's
//! inclusive price range. The decision is a pure function of stored
//! samples, so any resolution can be replayed for a dispute.
//!
//! The worker pauses while the feed is `CRITICAL` and defers any cell
//! whose window the feed has not yet covered, rather than guessing.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stakeflow_ingress::PriceHealthMonitor;
use stakeflow_ledger::{StoreReader, Verdict, WriterHandle};
use stakeflow_types::{
    Cell, CellId, Clock, HealthStatus, PriceSample, ResolutionConfig, Result, Stake, StakeId,
    StakeStatus, StakeflowError,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Decision for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellVerdict {
    pub won: bool,
    /// Samples inside the time window.
    pub samples_considered: usize,
    /// First in-window sample whose price hit the range.
    pub hit: Option<PriceSample>,
}

/// Decide a cell from its samples. `None` when no sample falls in the
/// window: there is nothing to decide on yet.
#[must_use]
pub fn resolve_cell(cell: &Cell, samples: &[PriceSample]) -> Option<CellVerdict> {
    let mut considered = 0;
    let mut hit = None;
    for sample in samples.iter().filter(|s| cell.contains_time(s.at)) {
        considered += 1;
        if hit.is_none() && cell.contains_price(sample.price) {
            hit = Some(*sample);
        }
    }
    (considered > 0).then_some(CellVerdict {
        won: hit.is_some(),
        samples_considered: considered,
        hit,
    })
}

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// The feed was critical; nothing was scanned.
    pub paused: bool,
    pub scanned: usize,
    pub won: usize,
    pub lost: usize,
    /// Stakes left for a later cycle (no samples, or window not yet covered).
    pub deferred: usize,
    /// Deferred stakes whose window has no samples at all.
    pub empty_windows: usize,
    /// Empty-window stakes past price retention. They stay `confirmed`
    /// until an operator backfills prices, and hold back archival of their
    /// period.
    pub stranded: usize,
    /// Stakes another cycle already settled.
    pub already_resolved: usize,
    pub credited: i64,
}

impl ResolutionReport {
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.won + self.lost
    }
}

/// Dispute replay result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub stake_id: StakeId,
    pub stored_status: StakeStatus,
    pub stored_payout: Option<i64>,
    /// `None` when the stored history no longer has samples for the window.
    pub recomputed: Option<CellVerdict>,
    pub matches: bool,
}

/// Periodic resolver.
#[derive(Debug)]
pub struct ResolutionWorker {
    reader: StoreReader,
    writer: WriterHandle,
    monitor: Arc<PriceHealthMonitor>,
    clock: Arc<dyn Clock>,
    cfg: ResolutionConfig,
}

impl ResolutionWorker {
    #[must_use]
    pub fn new(
        reader: StoreReader,
        writer: WriterHandle,
        monitor: Arc<PriceHealthMonitor>,
        clock: Arc<dyn Clock>,
        cfg: ResolutionConfig,
    ) -> Self {
        Self {
            reader,
            writer,
            monitor,
            clock,
            cfg,
        }
    }

    /// One scan: load due stakes, decide per cell, settle in one transaction.
    ///
    /// Due stakes are paged by `(window_end, id)` until `max_stakes_per_cycle`
    /// verdicts are collected or the due set is exhausted, so deferred cells
    /// never hide decidable ones behind them.
    pub async fn run_once(&self) -> Result<ResolutionReport> {
        if self.monitor.current_status() == HealthStatus::Critical {
            info!("resolution paused: price feed critical");
            return Ok(ResolutionReport {
                paused: true,
                ..ResolutionReport::default()
            });
        }
        let now = self.clock.now();
        // Samples up to here have arrived; later windows may still be filling.
        let covered_until = self.monitor.last_sample().unwrap_or(now).min(now);

        let limit = self.cfg.max_stakes_per_cycle.max(1);
        let mut report = ResolutionReport::default();
        let mut verdicts = Vec::new();
        let mut cursor = None;
        while verdicts.len() < limit {
            let page = self.read(move |r| r.due_stakes(now, cursor, limit)).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some((last.cell.window_end, last.id));
            let exhausted = page.len() < limit;
            report.scanned += page.len();
            let reached_uncovered = self
                .decide_page(page, now, covered_until, &mut verdicts, &mut report)
                .await?;
            // Pages are ordered by window end: past the feed's coverage,
            // everything later is uncovered too.
            if exhausted || reached_uncovered {
                break;
            }
        }
        if report.scanned == 0 {
            return Ok(report);
        }

        if !verdicts.is_empty() {
            let settled = self.writer.settle(verdicts).await?;
            report.won = settled.won;
            report.lost = settled.lost;
            report.already_resolved = settled.already_resolved;
            report.credited = settled.credited;
        }
        info!(
            scanned = report.scanned,
            won = report.won,
            lost = report.lost,
            deferred = report.deferred,
            empty_windows = report.empty_windows,
            stranded = report.stranded,
            credited = report.credited,
            "resolution cycle complete"
        );
        Ok(report)
    }

    /// Decide one page of due stakes, cell by cell. Returns `true` once a
    /// cell past the feed's coverage is reached.
    async fn decide_page(
        &self,
        page: Vec<Stake>,
        now: DateTime<Utc>,
        covered_until: DateTime<Utc>,
        verdicts: &mut Vec<Verdict>,
        report: &mut ResolutionReport,
    ) -> Result<bool> {
        let mut by_cell: BTreeMap<CellId, Vec<Stake>> = BTreeMap::new();
        for stake in page {
            by_cell.entry(stake.cell.id).or_default().push(stake);
        }

        let mut reached_uncovered = false;
        for (cell_id, stakes) in by_cell {
            let cell = stakes[0].cell.clone();
            if cell.window_end > covered_until {
                report.deferred += stakes.len();
                reached_uncovered = true;
                continue;
            }
            let (start, end) = (cell.window_start, cell.window_end);
            let samples = self.read(move |r| r.price_samples(start, end)).await?;
            match resolve_cell(&cell, &samples) {
                Some(verdict) => {
                    debug!(cell = %cell_id, won = verdict.won, samples = verdict.samples_considered, "cell resolved");
                    verdicts.extend(stakes.iter().map(|s| Verdict {
                        stake_id: s.id,
                        won: verdict.won,
                    }));
                }
                None => {
                    report.deferred += stakes.len();
                    report.empty_windows += stakes.len();
                    if self.is_stranded(&cell, now) {
                        report.stranded += stakes.len();
                        error!(
                            cell = %cell_id,
                            stakes = stakes.len(),
                            window_end = %cell.window_end,
                            "window has no samples and is past price retention; stakes cannot resolve and block archival"
                        );
                    } else {
                        warn!(cell = %cell_id, stakes = stakes.len(), "no samples in window, deferring");
                    }
                }
            }
        }
        Ok(reached_uncovered)
    }

    /// A window older than the price retention can no longer gain samples.
    fn is_stranded(&self, cell: &Cell, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(self.cfg.price_retention)
            .is_ok_and(|retention| cell.window_end < now - retention)
    }

    /// Loop on `interval` until `shutdown` flips to `true`. Also trims price
    /// history past the retention window.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "resolution cycle failed");
                    }
                    self.prune_prices().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("resolution worker stopped");
                        break;
                    }
                }
            }
        }
    }

    async fn prune_prices(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.cfg.price_retention) else {
            return;
        };
        let before = self.clock.now() - retention;
        match self.writer.prune_prices(before).await {
            Ok(0) => {}
            Ok(n) => debug!(pruned = n, "old price samples pruned"),
            Err(e) => warn!(error = %e, "price pruning failed"),
        }
    }

    /// Recompute a resolved stake from stored samples.
    ///
    /// # Errors
    /// - [`StakeflowError::StakeNotFound`] if the stake is not in hot storage
    /// - [`StakeflowError::StakeNotResolved`] if it has not been decided yet
    pub async fn replay_stake(&self, stake_id: StakeId) -> Result<ReplayReport> {
        let stake = self
            .read(move |r| r.stake(stake_id))
            .await?
            .ok_or(StakeflowError::StakeNotFound(stake_id))?;
        if !matches!(stake.status, StakeStatus::Won | StakeStatus::Lost) {
            return Err(StakeflowError::StakeNotResolved(stake_id));
        }
        let (start, end) = (stake.cell.window_start, stake.cell.window_end);
        let samples = self.read(move |r| r.price_samples(start, end)).await?;
        let recomputed = resolve_cell(&stake.cell, &samples);
        let matches = recomputed.is_some_and(|v| {
            v.won == (stake.status == StakeStatus::Won)
                && (!v.won || stake.payout == Some(stake.winning_payout()))
        });
        Ok(ReplayReport {
            stake_id,
            stored_status: stake.status,
            stored_payout: stake.payout,
            recomputed,
            matches,
        })
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreReader) -> Result<T> + Send + 'static,
    {
        let reader = self.reader.clone();
        tokio::task::spawn_blocking(move || f(&reader))
            .await
            .map_err(|e| StakeflowError::Internal(format!("store read task failed: {e}")))?
    }
}
