//! The single-writer actor.
//!
//! One OS thread owns the [`LedgerStore`] and applies [`WriteCommand`]s in
//! arrival order. Async callers talk to it through a cloneable
//! [`WriterHandle`]; each command carries a oneshot for its reply. Because
//! nothing else holds a write connection, there is no lock contention to
//! retry on in the steady state.

use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use stakeflow_types::{
    Account, AccountId, Clock, LedgerConfig, LedgerEntry, PriceSample, Result, StakeNotification,
    StakeflowError,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::cache::BalanceCache;
use crate::store::{
    ArchiveManifest, FlushReport, LedgerStore, PurgeReport, RepairReport, SettleReport, StakeDraft,
    Verdict,
};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Work items accepted by the writer thread.
#[derive(Debug)]
pub enum WriteCommand {
    FlushStakes {
        drafts: Vec<StakeDraft>,
        reply: Reply<FlushReport>,
    },
    Settle {
        verdicts: Vec<Verdict>,
        reply: Reply<SettleReport>,
    },
    OpenAccount {
        account_id: AccountId,
        reply: Reply<Account>,
    },
    Deposit {
        account_id: AccountId,
        amount: i64,
        metadata: serde_json::Value,
        reply: Reply<LedgerEntry>,
    },
    AppendPrices {
        samples: Vec<PriceSample>,
        reply: Reply<usize>,
    },
    PrunePrices {
        before: DateTime<Utc>,
        reply: Reply<usize>,
    },
    RecordArchive {
        manifest: ArchiveManifest,
        reply: Reply<DateTime<Utc>>,
    },
    PurgeArchived {
        object_key: String,
        cutoff: DateTime<Utc>,
        reply: Reply<PurgeReport>,
    },
    RepairBalance {
        account_id: AccountId,
        reply: Reply<RepairReport>,
    },
    Shutdown,
}

/// Spawner for the writer thread.
pub struct LedgerWriter;

impl LedgerWriter {
    /// Move `store` onto a dedicated thread and return the async handle.
    ///
    /// # Errors
    /// Returns [`StakeflowError::Io`] if the thread cannot be spawned.
    pub fn spawn(
        store: LedgerStore,
        cfg: &LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(WriterHandle, JoinHandle<()>)> {
        let (tx, rx) = mpsc::channel(cfg.writer_channel_capacity.max(1));
        let (notify_tx, _) = broadcast::channel(cfg.notification_capacity.max(1));
        let cache = BalanceCache::new();

        let handle = WriterHandle {
            tx,
            cache: cache.clone(),
            notifications: notify_tx.clone(),
        };
        let worker = WriterLoop {
            store,
            cache,
            notifications: notify_tx,
            clock,
        };
        let join = std::thread::Builder::new()
            .name("ledger-writer".into())
            .spawn(move || worker.run(rx))?;
        Ok((handle, join))
    }
}

struct WriterLoop {
    store: LedgerStore,
    cache: BalanceCache,
    notifications: broadcast::Sender<StakeNotification>,
    clock: Arc<dyn Clock>,
}

impl WriterLoop {
    fn run(mut self, mut rx: mpsc::Receiver<WriteCommand>) {
        info!(path = %self.store.path().display(), "ledger writer started");
        while let Some(cmd) = rx.blocking_recv() {
            if matches!(cmd, WriteCommand::Shutdown) {
                break;
            }
            self.apply(cmd);
        }
        info!("ledger writer stopped");
    }

    fn apply(&mut self, cmd: WriteCommand) {
        let now = self.clock.now();
        match cmd {
            WriteCommand::FlushStakes { drafts, reply } => {
                let result = self.store.flush_stakes(&drafts, now);
                match &result {
                    Ok(report) => {
                        self.cache.apply(&report.balances);
                        self.publish(&report.notifications);
                    }
                    Err(e) => error!(batch = drafts.len(), error = %e, "stake batch aborted"),
                }
                let _ = reply.send(result);
            }
            WriteCommand::Settle { verdicts, reply } => {
                let result = self.store.settle(&verdicts, now);
                match &result {
                    Ok(report) => {
                        self.cache.apply(&report.balances);
                        self.publish(&report.notifications);
                    }
                    Err(e) => error!(verdicts = verdicts.len(), error = %e, "settlement aborted"),
                }
                let _ = reply.send(result);
            }
            WriteCommand::OpenAccount { account_id, reply } => {
                let _ = reply.send(self.store.open_account(account_id, now));
            }
            WriteCommand::Deposit {
                account_id,
                amount,
                metadata,
                reply,
            } => {
                let result = self.store.deposit(account_id, amount, metadata, now);
                if let Ok(entry) = &result {
                    self.cache.set(account_id, entry.balance_after);
                }
                let _ = reply.send(result);
            }
            WriteCommand::AppendPrices { samples, reply } => {
                let result = self.store.append_prices(&samples);
                if let Err(e) = &result {
                    warn!(error = %e, samples = samples.len(), "failed to persist price samples");
                }
                let _ = reply.send(result);
            }
            WriteCommand::PrunePrices { before, reply } => {
                let _ = reply.send(self.store.prune_prices(before));
            }
            WriteCommand::RecordArchive { manifest, reply } => {
                let _ = reply.send(self.store.record_archive(&manifest));
            }
            WriteCommand::PurgeArchived {
                object_key,
                cutoff,
                reply,
            } => {
                let _ = reply.send(self.store.purge_archived(&object_key, cutoff));
            }
            WriteCommand::RepairBalance { account_id, reply } => {
                let result = self.store.repair_balance(account_id);
                if let Ok(report) = &result {
                    self.cache.set(account_id, report.repaired_balance);
                }
                let _ = reply.send(result);
            }
            WriteCommand::Shutdown => {}
        }
    }

    fn publish(&self, notifications: &[StakeNotification]) {
        // No subscribers is normal; notification loss never affects the ledger.
        for n in notifications {
            if self.notifications.send(n.clone()).is_err() {
                debug!("no notification subscribers");
                break;
            }
        }
    }
}

/// Cloneable async client of the writer thread.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteCommand>,
    cache: BalanceCache,
    notifications: broadcast::Sender<StakeNotification>,
}

impl WriterHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> WriteCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| StakeflowError::WriterUnavailable)?;
        rx.await.map_err(|_| StakeflowError::WriterUnavailable)?
    }

    /// Commit one batch. Every draft gets exactly one result in the report.
    pub async fn flush_stakes(&self, drafts: Vec<StakeDraft>) -> Result<FlushReport> {
        self.request(|reply| WriteCommand::FlushStakes { drafts, reply }).await
    }

    pub async fn settle(&self, verdicts: Vec<Verdict>) -> Result<SettleReport> {
        self.request(|reply| WriteCommand::Settle { verdicts, reply }).await
    }

    pub async fn open_account(&self, account_id: AccountId) -> Result<Account> {
        self.request(|reply| WriteCommand::OpenAccount { account_id, reply }).await
    }

    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: i64,
        metadata: serde_json::Value,
    ) -> Result<LedgerEntry> {
        self.request(|reply| WriteCommand::Deposit {
            account_id,
            amount,
            metadata,
            reply,
        })
        .await
    }

    pub async fn append_prices(&self, samples: Vec<PriceSample>) -> Result<usize> {
        self.request(|reply| WriteCommand::AppendPrices { samples, reply }).await
    }

    pub async fn prune_prices(&self, before: DateTime<Utc>) -> Result<usize> {
        self.request(|reply| WriteCommand::PrunePrices { before, reply }).await
    }

    pub async fn record_archive(&self, manifest: ArchiveManifest) -> Result<DateTime<Utc>> {
        self.request(|reply| WriteCommand::RecordArchive { manifest, reply }).await
    }

    pub async fn purge_archived(&self, object_key: String, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        self.request(|reply| WriteCommand::PurgeArchived {
            object_key,
            cutoff,
            reply,
        })
        .await
    }

    pub async fn repair_balance(&self, account_id: AccountId) -> Result<RepairReport> {
        self.request(|reply| WriteCommand::RepairBalance { account_id, reply }).await
    }

    /// Ask the thread to stop after the commands already queued.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WriteCommand::Shutdown).await;
    }

    /// Post-commit balance view.
    #[must_use]
    pub fn cache(&self) -> &BalanceCache {
        &self.cache
    }

    /// Subscribe to committed stake status changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StakeNotification> {
        self.notifications.subscribe()
    }
}
