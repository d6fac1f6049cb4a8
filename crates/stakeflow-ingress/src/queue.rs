//! Batch ingestion queue.
//!
//! [`StakeQueue::submit`] never blocks: a full buffer fails immediately.
//! A single [`BatchFlusher`] drains the buffer into batches and hands each
//! batch to the ledger writer as one transaction. A batch closes when it
//! reaches `batch_size` items or `batch_timeout` after its first item was
//! submitted, whichever comes first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use stakeflow_ledger::{StakeDraft, WriterHandle};
use stakeflow_types::{QueueConfig, Result, StakeId, StakeResult, StakeflowError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::placement::Reservation;

/// A request waiting for its batch.
#[derive(Debug)]
pub struct QueuedStake {
    pub draft: StakeDraft,
    /// Released once the batch containing this stake has finished.
    pub reservation: Option<Reservation>,
    enqueued_at: Instant,
    reply: oneshot::Sender<Result<StakeResult>>,
}

/// Caller's side of a submitted stake.
#[derive(Debug)]
pub struct ResultHandle {
    stake_id: StakeId,
    rx: oneshot::Receiver<Result<StakeResult>>,
}

impl ResultHandle {
    #[must_use]
    pub fn stake_id(&self) -> StakeId {
        self.stake_id
    }

    /// Wait for the batch outcome.
    ///
    /// Expiry yields a `timeout` result, never a failure: the batch may
    /// still commit, so the caller must consult history. `Err` means the
    /// batch aborted and nothing was recorded.
    pub async fn wait(self, timeout: Duration) -> Result<StakeResult> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                warn!(stake = %self.stake_id, "flusher dropped stake without a reply");
                Ok(StakeResult::timeout(self.stake_id))
            }
            Err(_) => Ok(StakeResult::timeout(self.stake_id)),
        }
    }
}

/// Bounded, non-blocking submission side.
#[derive(Debug, Clone)]
pub struct StakeQueue {
    tx: mpsc::Sender<QueuedStake>,
    capacity: usize,
}

impl StakeQueue {
    /// Create the queue and the receiver its flusher will drain.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<QueuedStake>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, rx)
    }

    /// Enqueue a validated stake.
    ///
    /// # Errors
    /// - [`StakeflowError::QueueFull`] when the buffer is at capacity
    /// - [`StakeflowError::QueueClosed`] when the flusher has stopped
    ///
    /// On error the reservation is released.
    pub fn submit(&self, draft: StakeDraft, reservation: Option<Reservation>) -> Result<ResultHandle> {
        let stake_id = draft.stake_id;
        let (reply, rx) = oneshot::channel();
        let item = QueuedStake {
            draft,
            reservation,
            enqueued_at: Instant::now(),
            reply,
        };
        match self.tx.try_send(item) {
            Ok(()) => Ok(ResultHandle { stake_id, rx }),
            Err(mpsc::error::TrySendError::Full(_)) => Err(StakeflowError::QueueFull {
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(StakeflowError::QueueClosed),
        }
    }

    /// Items currently buffered.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Counters maintained by the flusher.
#[derive(Debug, Default)]
pub struct FlushStats {
    pub batches: AtomicU64,
    pub items: AtomicU64,
    pub aborted_batches: AtomicU64,
    /// Batches closed by the size trigger.
    pub full_batches: AtomicU64,
    pub largest_batch: AtomicUsize,
}

impl FlushStats {
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn items(&self) -> u64 {
        self.items.load(Ordering::Relaxed)
    }
}

/// Single consumer of the queue.
#[derive(Debug)]
pub struct BatchFlusher {
    rx: mpsc::Receiver<QueuedStake>,
    writer: WriterHandle,
    batch_size: usize,
    batch_timeout: Duration,
    stats: Arc<FlushStats>,
}

impl BatchFlusher {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<QueuedStake>, writer: WriterHandle, cfg: &QueueConfig) -> Self {
        Self {
            rx,
            writer,
            batch_size: cfg.batch_size.max(1),
            batch_timeout: cfg.batch_timeout,
            stats: Arc::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<FlushStats> {
        Arc::clone(&self.stats)
    }

    /// Drain until every [`StakeQueue`] clone is dropped and the buffer is empty.
    pub async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            let deadline = first.enqueued_at + self.batch_timeout;
            let mut batch = Vec::with_capacity(self.batch_size);
            batch.push(first);
            while batch.len() < self.batch_size {
                match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                    Ok(Some(item)) => batch.push(item),
                    Ok(None) | Err(_) => break,
                }
            }
            if batch.len() == self.batch_size {
                self.stats.full_batches.fetch_add(1, Ordering::Relaxed);
            }
            self.flush(batch).await;
        }
        debug!("batch flusher stopped");
    }

    async fn flush(&self, batch: Vec<QueuedStake>) {
        let started = Instant::now();
        let size = batch.len();
        let mut drafts = Vec::with_capacity(size);
        let mut waiters = Vec::with_capacity(size);
        for item in batch {
            waiters.push((item.draft.stake_id, item.reply, item.reservation));
            drafts.push(item.draft);
        }

        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats.items.fetch_add(u64::try_from(size).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.stats.largest_batch.fetch_max(size, Ordering::Relaxed);

        match self.writer.flush_stakes(drafts).await {
            Ok(report) => {
                debug!(
                    batch = size,
                    confirmed = report.confirmed,
                    rejected = report.rejected,
                    attempts = report.attempts,
                    elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
                    "batch flushed"
                );
                for (stake_id, reply, _reservation) in waiters {
                    let result = report
                        .results
                        .get(&stake_id)
                        .copied()
                        .unwrap_or_else(|| StakeResult::timeout(stake_id));
                    let _ = reply.send(Ok(result));
                }
            }
            Err(e) => {
                self.stats.aborted_batches.fetch_add(1, Ordering::Relaxed);
                error!(batch = size, error = %e, "batch aborted, failing every caller");
                for (_, reply, _reservation) in waiters {
                    let _ = reply.send(Err(abort_for_caller(&e)));
                }
            }
        }
    }
}

fn abort_for_caller(e: &StakeflowError) -> StakeflowError {
    match e {
        StakeflowError::WriterUnavailable => StakeflowError::WriterUnavailable,
        other => StakeflowError::TransactionAborted {
            reason: other.to_string(),
        },
    }
}
