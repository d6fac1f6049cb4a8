//! Price feed health monitor.
//!
//! Health is a function of the age of the newest sample:
//!
//! ```text
//! age <  degraded            -> HEALTHY
//! degraded <= age < critical -> DEGRADED
//! age >= critical            -> CRITICAL
//! ```
//!
//! Entering `CRITICAL` is immediate. Leaving it needs `recovery_window` of
//! continuously fresh samples, so a feed flapping around the threshold
//! stays `CRITICAL`. Before the first sample the monitor is `CRITICAL`.
//!
//! Status is re-evaluated on a ticker, not only when samples arrive, so a
//! silent feed is detected.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use stakeflow_types::{Clock, HealthConfig, HealthStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct MonitorState {
    last_sample: Option<DateTime<Utc>>,
    status: HealthStatus,
    /// Start of the current fresh run while `Critical`.
    stable_since: Option<DateTime<Utc>>,
}

/// Tracks sample freshness and derives [`HealthStatus`].
#[derive(Debug)]
pub struct PriceHealthMonitor {
    cfg: HealthConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<MonitorState>,
    status_tx: watch::Sender<HealthStatus>,
}

impl PriceHealthMonitor {
    #[must_use]
    pub fn new(cfg: HealthConfig, clock: Arc<dyn Clock>) -> Self {
        let (status_tx, _) = watch::channel(HealthStatus::Critical);
        Self {
            cfg,
            clock,
            state: Mutex::new(MonitorState {
                last_sample: None,
                status: HealthStatus::Critical,
                stable_since: None,
            }),
            status_tx,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.cfg
    }

    /// Record a price tick observed at `at`. Out-of-order ticks never move
    /// the freshness mark backwards, and ticks stamped ahead of the clock
    /// count as arriving now. Returns the status evaluated at the clock's
    /// current time.
    pub fn record_sample(&self, at: DateTime<Utc>) -> HealthStatus {
        let now = self.clock.now();
        if at > now {
            debug!(%at, %now, "price tick stamped in the future, clamped to now");
        }
        let at = at.min(now);
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let gap = state.last_sample.map(|last| non_negative(at - last));
            if state.status == HealthStatus::Critical
                && (state.stable_since.is_none()
                    || gap.is_some_and(|g| g >= self.cfg.degraded_threshold))
            {
                state.stable_since = Some(at);
            }
            if state.last_sample.is_none_or(|last| at > last) {
                state.last_sample = Some(at);
            }
        }
        self.current_status()
    }

    /// Evaluate at the injected clock's now.
    pub fn current_status(&self) -> HealthStatus {
        self.status_at(self.clock.now())
    }

    /// Evaluate at `now`, applying hysteresis, and publish any transition.
    pub fn status_at(&self, now: DateTime<Utc>) -> HealthStatus {
        let (previous, next, age) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let age = state.last_sample.map(|last| non_negative(now - last));
            let raw = age.map_or(HealthStatus::Critical, |age| self.classify(age));
            let previous = state.status;

            let next = if previous == HealthStatus::Critical {
                match raw {
                    HealthStatus::Healthy => {
                        let since = *state.stable_since.get_or_insert(state.last_sample.unwrap_or(now));
                        if non_negative(now - since) >= self.cfg.recovery_window {
                            state.stable_since = None;
                            HealthStatus::Healthy
                        } else {
                            HealthStatus::Critical
                        }
                    }
                    // A gap during recovery restarts the stability window.
                    HealthStatus::Degraded | HealthStatus::Critical => {
                        state.stable_since = None;
                        HealthStatus::Critical
                    }
                }
            } else {
                if raw == HealthStatus::Critical {
                    state.stable_since = None;
                }
                raw
            };
            state.status = next;
            (previous, next, age)
        };

        if previous != next {
            let age_ms = age.map(|a| u64::try_from(a.as_millis()).unwrap_or(u64::MAX));
            match next {
                HealthStatus::Critical => warn!(from = %previous, to = %next, ?age_ms, "price feed critical"),
                HealthStatus::Degraded => warn!(from = %previous, to = %next, ?age_ms, "price feed degraded"),
                HealthStatus::Healthy => info!(from = %previous, to = %next, ?age_ms, "price feed healthy"),
            }
            self.status_tx.send_replace(next);
        }
        next
    }

    fn classify(&self, age: Duration) -> HealthStatus {
        if age >= self.cfg.critical_threshold {
            HealthStatus::Critical
        } else if age >= self.cfg.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Time of the newest recorded sample.
    #[must_use]
    pub fn last_sample(&self) -> Option<DateTime<Utc>> {
        self.lock().last_sample
    }

    /// Observe status transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status_tx.subscribe()
    }

    /// Re-evaluate every `tick_interval` until `shutdown` flips to `true`.
    pub fn spawn_ticker(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.cfg.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.current_status();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("health ticker stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn non_negative(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}
