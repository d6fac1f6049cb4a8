//! Placement façade: gate → rules → queue → wait.

use std::sync::Arc;
use std::time::Duration;

use stakeflow_ledger::{StakeDraft, StoreReader, WriterHandle};
use stakeflow_types::{
    AccountId, Clock, PlacementOutcome, QueueConfig, RejectReason, Result, StakeRequest,
    StakeflowError,
};
use tracing::{debug, warn};

use crate::gate::{Admission, AdmissionGate};
use crate::placement::{Placement, PlacementRules};
use crate::queue::{BatchFlusher, FlushStats, StakeQueue};

/// Entry point for inbound stake requests.
#[derive(Debug)]
pub struct StakeService {
    gate: AdmissionGate,
    rules: PlacementRules,
    queue: StakeQueue,
    writer: WriterHandle,
    reader: StoreReader,
    clock: Arc<dyn Clock>,
    result_timeout: Duration,
    flush_stats: Arc<FlushStats>,
}

impl StakeService {
    /// Build the service and the flusher that must be spawned alongside it.
    #[must_use]
    pub fn new(
        cfg: &QueueConfig,
        gate: AdmissionGate,
        rules: PlacementRules,
        writer: WriterHandle,
        reader: StoreReader,
        clock: Arc<dyn Clock>,
    ) -> (Self, BatchFlusher) {
        let (queue, rx) = StakeQueue::bounded(cfg.capacity);
        let flusher = BatchFlusher::new(rx, writer.clone(), cfg);
        let service = Self {
            gate,
            rules,
            queue,
            writer,
            reader,
            clock,
            result_timeout: cfg.result_timeout,
            flush_stats: flusher.stats(),
        };
        (service, flusher)
    }

    /// Place one stake.
    ///
    /// Business rejections (stale feed, closed cell, duplicate, full queue,
    /// insufficient funds) are `Ok(Rejected)`. A timeout is
    /// `Ok(Unknown)`: the stake may still commit. `Err` is reserved for
    /// infrastructure failures, where nothing was recorded.
    pub async fn place(&self, request: StakeRequest) -> Result<PlacementOutcome> {
        let warning = match self.gate.admit(&request) {
            Admission::Allow { warning } => warning,
            Admission::Reject(reason) => return Ok(rejected(reason)),
        };

        let rules = self.rules.clone();
        let checked = request.clone();
        let placement = tokio::task::spawn_blocking(move || rules.check(&checked))
            .await
            .map_err(|e| StakeflowError::Internal(format!("placement check failed: {e}")))??;
        let (cell, reservation) = match placement {
            Placement::Accepted { cell, reservation } => (cell, reservation),
            Placement::Rejected(reason) => {
                debug!(account = %request.account_id, code = reason.code(), "stake rejected before queue");
                return Ok(rejected(reason));
            }
        };

        let draft = StakeDraft::new(request, cell, self.clock.now())?;
        let handle = match self.queue.submit(draft, Some(reservation)) {
            Ok(handle) => handle,
            Err(StakeflowError::QueueFull { capacity }) => {
                warn!(capacity, depth = self.queue.depth(), "ingestion queue full, shedding stake");
                return Ok(rejected(RejectReason::QueueFull));
            }
            Err(e) => return Err(e),
        };

        let stake_id = handle.stake_id();
        let result = handle.wait(self.result_timeout).await?;
        let outcome = PlacementOutcome::from_result(result, warning);
        match outcome.reject_reason() {
            Some(reason) => debug!(stake = %stake_id, code = reason.code(), "stake rejected at commit"),
            None if !outcome.is_confirmed() => {
                warn!(stake = %stake_id, "stake outcome unknown after timeout, caller must check history");
            }
            None => {}
        }
        Ok(outcome)
    }

    /// Display balance: cache first, then the store.
    pub fn balance(&self, account_id: AccountId) -> Result<Option<i64>> {
        match self.writer.cache().get(account_id) {
            Some(balance) => Ok(Some(balance)),
            None => self.reader.balance(account_id),
        }
    }

    #[must_use]
    pub fn flush_stats(&self) -> &FlushStats {
        &self.flush_stats
    }

    #[must_use]
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }
}

fn rejected(reason: RejectReason) -> PlacementOutcome {
    PlacementOutcome::Rejected {
        stake_id: None,
        reason,
    }
}
