//! Jittered exponential backoff.
//!
//! Used for the two bounded, component-local retry scopes: a batch
//! transaction that hit a busy store (blocking, on the writer thread) and a
//! cold-storage upload (async).

use std::time::Duration;

use rand::Rng;

/// Backoff policy: `base · 2^attempt`, capped at `max_delay`, ± `jitter_pct`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration, jitter_pct: f64) -> Self {
        let base_delay = base_delay.max(Duration::from_millis(1));
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// A single attempt, no waiting.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1, Duration::from_millis(1), Duration::from_millis(1), 0.0)
    }

    /// Delay before retry number `attempt + 1`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = 2_u32.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
        let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
        if self.jitter_pct <= 0.0 {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        let spread = (millis as f64 * self.jitter_pct) as i64;
        let delta = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(millis.saturating_add_signed(delta))
    }

    /// Run `op` on the current thread until it succeeds, `retryable` says
    /// no, or attempts run out. Returns the last error and the attempt count.
    pub fn retry_blocking<T, E>(
        &self,
        mut op: impl FnMut(usize) -> Result<T, E>,
        retryable: impl Fn(&E) -> bool,
    ) -> (Result<T, E>, usize) {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(v) => return (Ok(v), attempt + 1),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !retryable(&e) {
                        return (Err(e), attempt);
                    }
                    std::thread::sleep(self.delay_for(attempt - 1));
                }
            }
        }
    }

    /// Async variant of [`Self::retry_blocking`] for tokio tasks.
    pub async fn retry_async<F, Fut, T, E>(&self, mut op: F, retryable: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !retryable(&e) {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay_for(attempt - 1)).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(250), Duration::from_secs(5), 0.2)
    }
}
