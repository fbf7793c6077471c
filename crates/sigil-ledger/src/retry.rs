//! Bounded backoff for ledger RPC calls.
//!
//! Transient ledger failures are retried with exponential, linear or fixed
//! backoff plus jitter. Once the attempt budget is spent the last error is
//! escalated to `RpcFatal`; non-retryable errors are returned immediately.

use std::{future::Future, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sigil_core::{Clock, LedgerError};
use tracing::{debug, warn};

/// Retry policy for ledger calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,

    /// How delays grow between attempts.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Delay doubles each attempt.
    Exponential,
    /// Delay grows by the base amount each attempt.
    Linear,
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry {
        /// Wait before the next attempt.
        delay: Duration,
    },
    /// Stop and surface an error.
    GiveUp {
        /// Why no further attempt is made.
        reason: String,
    },
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Decides whether attempt number `attempt` (1-based), which failed
    /// with `error`, should be followed by another.
    pub fn decide(&self, attempt: u32, error: &LedgerError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {error}") };
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts),
            };
        }

        RetryDecision::Retry { delay: self.calculate_delay(attempt) }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };

        let capped = delay.min(self.max_delay);
        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomises `duration` by up to ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent. Delays go through `clock`.
///
/// # Errors
///
/// Returns non-retryable errors unchanged, and
/// `LedgerError::retries_exhausted` once the budget is spent.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    operation_name: &str,
    mut operation: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => match policy.decide(attempt, &error) {
                RetryDecision::Retry { delay } => {
                    debug!(
                        operation = operation_name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "retrying ledger call"
                    );
                    clock.sleep(delay).await;
                    attempt += 1;
                },
                RetryDecision::GiveUp { reason } if error.is_retryable() => {
                    warn!(operation = operation_name, attempt, error = %error, %reason, "giving up on ledger call");
                    return Err(LedgerError::retries_exhausted(attempt, &error));
                },
                RetryDecision::GiveUp { .. } => return Err(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use sigil_core::{RejectReason, TestClock};

    use super::*;

    fn no_jitter(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            backoff_strategy: strategy,
        }
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = no_jitter(BackoffStrategy::Exponential);
        let delays: Vec<_> = (1..=5).map(|attempt| policy.calculate_delay(attempt)).collect();

        assert_eq!(delays, [1, 2, 4, 8, 16].map(Duration::from_secs));
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = no_jitter(BackoffStrategy::Linear);
        assert_eq!(linear.calculate_delay(3), Duration::from_secs(3));

        let fixed = no_jitter(BackoffStrategy::Fixed);
        assert!((1..=5).all(|attempt| fixed.calculate_delay(attempt) == Duration::from_secs(1)));
    }

    #[test]
    fn max_delay_enforced() {
        let policy = RetryPolicy { jitter_factor: 0.5, ..no_jitter(BackoffStrategy::Exponential) };
        for attempt in 1..=30 {
            assert!(policy.calculate_delay(attempt) <= Duration::from_secs(60));
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..50 {
            let jittered = apply_jitter(Duration::from_secs(10), 0.5);
            assert!(jittered >= Duration::from_secs(5));
            assert!(jittered <= Duration::from_secs(15));
        }
    }

    #[test]
    fn decide_respects_error_class_and_budget() {
        let policy = RetryPolicy { max_attempts: 3, ..no_jitter(BackoffStrategy::Fixed) };
        let transient = LedgerError::rpc_transient("timeout");

        assert!(matches!(policy.decide(1, &transient), RetryDecision::Retry { .. }));
        assert!(matches!(
            policy.decide(3, &transient),
            RetryDecision::GiveUp { reason } if reason.contains("maximum attempts")
        ));
        assert!(matches!(
            policy.decide(1, &LedgerError::rpc_fatal("insufficient funds")),
            RetryDecision::GiveUp { reason } if reason.contains("non-retryable")
        ));
        assert!(matches!(
            policy.decide(1, &LedgerError::rejected(RejectReason::Unauthorized)),
            RetryDecision::GiveUp { .. }
        ));
    }

    #[tokio::test]
    async fn with_retry_recovers_from_transient_errors() {
        let clock = TestClock::new();
        let calls = AtomicU32::new(0);
        let policy = no_jitter(BackoffStrategy::Exponential);

        let value = with_retry(&policy, &clock, "height", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LedgerError::rpc_transient("connection reset"))
            } else {
                Ok(7u64)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn with_retry_escalates_after_budget() {
        let clock = TestClock::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 4, ..no_jitter(BackoffStrategy::Fixed) };

        let err = with_retry(&policy, &clock, "height", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u64, _>(LedgerError::rpc_transient("503"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, LedgerError::RpcFatal { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn with_retry_surfaces_fatal_immediately() {
        let clock = TestClock::new();
        let calls = AtomicU32::new(0);

        let err = with_retry(&RetryPolicy::default(), &clock, "submit", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u64, _>(LedgerError::rpc_fatal("malformed transaction"))
        })
        .await
        .unwrap_err();

        assert_eq!(err, LedgerError::rpc_fatal("malformed transaction"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
