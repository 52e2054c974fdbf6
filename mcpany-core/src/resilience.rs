//! Retry with exponential backoff, and deadline enforcement.
//!
//! Only errors classified retriable by [`crate::error::Error::is_retriable`]
//! are retried; permanent failures surface immediately. Backoff doubles up to
//! the configured ceiling with a small random jitter so synchronized callers
//! do not stampede a recovering upstream.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::definition::ResilienceSpec;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(ResilienceSpec::default())
    }
}

impl From<ResilienceSpec> for RetryPolicy {
    fn from(spec: ResilienceSpec) -> Self {
        Self {
            max_attempts: spec.max_attempts.max(1),
            initial_backoff: Duration::from_millis(spec.initial_backoff_ms),
            max_backoff: Duration::from_millis(spec.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

/// Run `operation` under the retry policy. The closure receives the attempt
/// number (starting at 1) so callers can log or vary behavior per attempt.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;

    for attempt in 1..=policy.max_attempts {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retriable() && attempt < policy.max_attempts => {
                let delay = jittered(backoff);
                warn!(
                    label,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off before retry"
                );
                tokio::time::sleep(delay).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop returns within the loop")
}

/// Enforce a deadline around a future, mapping overrun to
/// `deadline_exceeded`.
pub async fn with_deadline<T, Fut>(deadline: Duration, future: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::DeadlineExceeded { elapsed: deadline }),
    }
}

/// Up to 20% random jitter on top of the base delay.
fn jittered(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let extra = rand::rng().random_range(0..=base.as_millis() as u64 / 5);
    base + Duration::from_millis(extra)
}
