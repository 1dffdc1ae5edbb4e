//! Retry with exponential backoff for optimistic concurrency conflicts
//!
//! Every mutating unit loads a snapshot, computes the new state and commits
//! it against the version it read. When another writer got there first the
//! commit fails with a conflict and the whole unit is re-run from the load.
//!
//! # Example
//!
//! ```ignore
//! use salonpass_core::retry::{with_retry, RetryConfig};
//!
//! let visit = with_retry(&RetryConfig::default(), || recorder.redeem_once(id, salon, at)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::metrics;

/// Conflict retry budget and backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Re-runs allowed after the first attempt
    pub retries: u32,
    /// Pause before the first re-run; doubles on each later one
    pub backoff: Duration,
    /// Upper bound on a single pause
    pub backoff_cap: Duration,
    /// Add up to a quarter of the pause at random
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(100),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Default backoff with a budget of `retries` re-runs
    #[must_use]
    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    /// Start pausing at `backoff` and never pause longer than `cap`
    #[must_use]
    pub fn backoff(mut self, backoff: Duration, cap: Duration) -> Self {
        self.backoff = backoff;
        self.backoff_cap = cap;
        self
    }

    /// Pause before re-run number `attempt`, counting from zero
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
        let pause = base.min(self.backoff_cap);

        let spread = pause.as_millis() as u64 / 4;
        if !self.jitter || spread == 0 {
            return pause;
        }
        pause + Duration::from_millis(rand::thread_rng().gen_range(0..spread))
    }
}

/// Errors that mark a unit as safe to re-run
pub trait RetryableError {
    /// Whether the unit may be re-run from its load
    fn is_retryable(&self) -> bool;
}

/// Run a unit, re-running it while it fails with a retryable error
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() || attempt >= config.retries {
                    return Err(err);
                }

                let delay = config.delay(attempt);
                debug!(
                    attempt = attempt + 1,
                    retries = config.retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after version conflict"
                );
                metrics::record_conflict_retry();

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
