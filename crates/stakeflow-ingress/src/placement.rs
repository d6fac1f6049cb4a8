//! Placement rules checked before a request reaches the queue.
//!
//! 1. Amount and reward rate must be positive.
//! 2. Placement window: the past, current and next column are closed.
//! 3. At most one live stake per (account, cell), counting both committed
//!    stakes and requests still in flight.
//!
//! The in-flight set is guarded by RAII [`Reservation`]s that travel with the
//! queued request and release once its batch has committed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use stakeflow_ledger::StoreReader;
use stakeflow_types::{AccountId, Cell, CellId, Clock, GridSpec, RejectReason, Result, StakeRequest};

type InFlight = Arc<Mutex<HashSet<(AccountId, CellId)>>>;

/// Claim on an (account, cell) pair while its request is in flight.
#[derive(Debug)]
pub struct Reservation {
    key: (AccountId, CellId),
    in_flight: InFlight,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        set.remove(&self.key);
    }
}

/// Result of [`PlacementRules::check`].
#[derive(Debug)]
pub enum Placement {
    Accepted { cell: Cell, reservation: Reservation },
    Rejected(RejectReason),
}

/// Placement-window and uniqueness rules.
#[derive(Debug, Clone)]
pub struct PlacementRules {
    grid: GridSpec,
    clock: Arc<dyn Clock>,
    reader: StoreReader,
    in_flight: InFlight,
}

impl PlacementRules {
    #[must_use]
    pub fn new(grid: GridSpec, clock: Arc<dyn Clock>, reader: StoreReader) -> Self {
        Self {
            grid,
            clock,
            reader,
            in_flight: Arc::default(),
        }
    }

    #[must_use]
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Run all rules. Business rejections are `Ok(Placement::Rejected)`;
    /// `Err` means the store could not be read.
    pub fn check(&self, request: &StakeRequest) -> Result<Placement> {
        if request.amount <= 0 {
            return Ok(Placement::Rejected(RejectReason::InvalidStake {
                reason: format!("amount must be positive, got {}", request.amount),
            }));
        }
        if request.reward_rate <= Decimal::ZERO {
            return Ok(Placement::Rejected(RejectReason::InvalidStake {
                reason: format!("reward rate must be positive, got {}", request.reward_rate),
            }));
        }

        let cell_id = request.cell_id;
        if !self.grid.is_placeable(cell_id, self.clock.now()) {
            return Ok(Placement::Rejected(RejectReason::CellUnavailable { cell: cell_id }));
        }

        // Reserve first so a concurrent request for the same cell fails here
        // even before this one is committed.
        let Some(reservation) = self.reserve(request.account_id, cell_id) else {
            return Ok(Placement::Rejected(RejectReason::DuplicateStake { cell: cell_id }));
        };
        if self.reader.has_live_stake(request.account_id, cell_id)? {
            return Ok(Placement::Rejected(RejectReason::DuplicateStake { cell: cell_id }));
        }

        Ok(Placement::Accepted {
            cell: self.grid.cell(cell_id),
            reservation,
        })
    }

    fn reserve(&self, account_id: AccountId, cell_id: CellId) -> Option<Reservation> {
        let key = (account_id, cell_id);
        let mut set = self.in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        set.insert(key).then(|| Reservation {
            key,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Requests currently holding a reservation.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }
}
