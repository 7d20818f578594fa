//! Retry policy for failed reconciliation calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// How often and how fast a failed field application is retried.
///
/// The default retries forever with no delay: a failed call is simply
/// repeated on the next loop iteration.
///
/// # Example
///
/// ```yaml
/// retry:
///   max_attempts: 10
///   backoff_ms: 200
///   max_backoff_ms: 5000
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Consecutive failures after which the field is left alone until a
    /// new request arrives. `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Delay after the first failure, doubled after each further one.
    /// Zero disables backoff.
    #[serde(default)]
    pub backoff_ms: u64,

    /// Upper bound for the backoff delay. Zero means no bound.
    #[serde(default)]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay_after(&self, failures: u32) -> Duration {
        if self.backoff_ms == 0 || failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(32);
        let mut delay = self.backoff_ms.saturating_mul(1u64 << exponent);
        if self.max_backoff_ms > 0 {
            delay = delay.min(self.max_backoff_ms);
        }
        Duration::from_millis(delay)
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// What the control loop should do with a dirty field this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Attempt,
    /// Backing off until the given instant.
    Wait(Instant),
    /// Retry budget spent for this request.
    GaveUp,
}

/// Retry bookkeeping for one field.
///
/// Counters belong to a request generation and reset as soon as a newer
/// request is seen.
#[derive(Debug, Default)]
pub struct FieldRetry {
    generation: u64,
    failures: u32,
    next_attempt: Option<Instant>,
    skip_reported: bool,
}

impl FieldRetry {
    pub fn decide(&mut self, policy: &RetryPolicy, generation: u64, now: Instant) -> Decision {
        if generation != self.generation {
            *self = Self {
                generation,
                ..Self::default()
            };
        }
        if policy.is_exhausted(self.failures) {
            return Decision::GaveUp;
        }
        match self.next_attempt {
            Some(at) if at > now => Decision::Wait(at),
            _ => Decision::Attempt,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.next_attempt = None;
    }

    /// Records a failed attempt. Returns `true` when this failure spent
    /// the retry budget.
    pub fn record_failure(&mut self, policy: &RetryPolicy, now: Instant) -> bool {
        self.failures = self.failures.saturating_add(1);
        let delay = policy.delay_after(self.failures);
        self.next_attempt = (!delay.is_zero()).then(|| now + delay);
        policy.is_exhausted(self.failures)
    }

    /// Returns `true` the first time it is called for the current request,
    /// so a field skipped after giving up is reported once.
    pub fn report_skip(&mut self) -> bool {
        !std::mem::replace(&mut self.skip_reported, true)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
