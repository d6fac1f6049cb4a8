//! Ledger reconciliation.
//!
//! Invariant checked for every account:
//! ```text
//! balance == Σ(hot ledger_entries.amount) + archived_ledger_totals.total
//! ```
//!
//! Ledger rows are the trusted side. A mismatch means the cached balance is
//! wrong, so `check` only reports it; [`IntegrityChecker::repair`] is the
//! explicit recovery action that rewrites the balance from the ledger sum.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stakeflow_ledger::{BalanceCheck, RepairReport, StoreReader, WriterHandle};
use stakeflow_types::{AccountId, Clock, Result, StakeflowError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub checked_at: DateTime<Utc>,
    pub accounts_checked: usize,
    /// Accounts whose balance disagrees with their ledger sum.
    pub drifts: Vec<BalanceCheck>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }

    /// Drifts as typed errors, for callers that escalate.
    #[must_use]
    pub fn drift_errors(&self) -> Vec<StakeflowError> {
        self.drifts
            .iter()
            .map(|d| StakeflowError::BalanceDrift {
                account_id: d.account_id,
                balance: d.balance,
                ledger_sum: d.ledger_sum,
            })
            .collect()
    }
}

/// Compares every balance with its ledger sum.
#[derive(Debug, Clone)]
pub struct IntegrityChecker {
    reader: StoreReader,
    writer: WriterHandle,
    clock: Arc<dyn Clock>,
}

impl IntegrityChecker {
    #[must_use]
    pub fn new(reader: StoreReader, writer: WriterHandle, clock: Arc<dyn Clock>) -> Self {
        Self {
            reader,
            writer,
            clock,
        }
    }

    /// Run one pass. Drifts are reported, never corrected here.
    pub async fn check(&self) -> Result<IntegrityReport> {
        let reader = self.reader.clone();
        let checks = tokio::task::spawn_blocking(move || reader.reconciliation())
            .await
            .map_err(|e| StakeflowError::Internal(format!("reconciliation task failed: {e}")))??;

        let accounts_checked = checks.len();
        let drifts: Vec<BalanceCheck> = checks.into_iter().filter(|c| !c.is_consistent()).collect();
        let report = IntegrityReport {
            checked_at: self.clock.now(),
            accounts_checked,
            drifts,
        };

        for drift in &report.drifts {
            error!(
                account = %drift.account_id,
                balance = drift.balance,
                ledger_sum = drift.ledger_sum,
                delta = drift.balance - drift.ledger_sum,
                "balance drift detected"
            );
        }
        let summary = serde_json::to_string(&report)
            .map_err(|e| StakeflowError::Serialization(e.to_string()))?;
        if report.is_clean() {
            info!(accounts = accounts_checked, report = %summary, "integrity check clean");
        } else {
            warn!(
                accounts = accounts_checked,
                drifted = report.drifts.len(),
                report = %summary,
                "integrity check found drift"
            );
        }
        Ok(report)
    }

    /// Explicit recovery: overwrite `account_id`'s balance with its ledger sum.
    ///
    /// # Errors
    /// [`StakeflowError::AccountNotFound`] if the account does not exist.
    pub async fn repair(&self, account_id: AccountId) -> Result<RepairReport> {
        warn!(account = %account_id, "balance repair requested");
        self.writer.repair_balance(account_id).await
    }

    /// Run [`Self::check`] every `interval` until `shutdown` flips to `true`.
    /// The receiver holds the latest completed report.
    pub fn spawn_periodic(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, watch::Receiver<Option<IntegrityReport>>) {
        let checker = self.clone();
        let (reports_tx, reports_rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match checker.check().await {
                            Ok(report) => {
                                reports_tx.send_replace(Some(report));
                            }
                            Err(e) => warn!(error = %e, "integrity check failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("integrity checker stopped");
                            break;
                        }
                    }
                }
            }
        });
        (handle, reports_rx)
    }
}
