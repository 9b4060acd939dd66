//! Retry policy: backoff growth and the failure transition.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::task::TaskRecord;

/// Scheduling policy applied to failed tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Multiplicative growth factor applied to the interval on each failure.
    pub backoff_base: f64,
    /// Interval a freshly enqueued task starts with.
    pub backoff_initial: Duration,
    /// Ceiling on the retry interval.
    pub backoff_max: Duration,
    /// Total dispatch attempts before a task is dropped.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: 2.0,
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(120),
            max_attempts: 20,
        }
    }
}

impl RetryPolicy {
    /// Policy that dispatches a task once and never retries it.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_backoff_base(mut self, base: f64) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_backoff_initial(mut self, initial: Duration) -> Self {
        self.backoff_initial = initial;
        self
    }

    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Next retry interval after a failure.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_base).min(self.backoff_max)
    }

    /// Apply one failed dispatch to a record.
    ///
    /// Pure transition over (record, failure): either the record is
    /// rescheduled with a grown backoff, or the attempt budget is spent
    /// and the record is to be dropped. No I/O, no logging.
    pub fn on_failure(&self, record: &mut TaskRecord, now: Instant) -> RetryDecision {
        record.attempts += 1;
        if record.attempts >= self.max_attempts {
            return RetryDecision::GiveUp {
                attempts: record.attempts,
            };
        }

        record.backoff = self.next_backoff(record.backoff);
        record.eligible_at = now + record.backoff;
        RetryDecision::Retry {
            attempt: record.attempts,
            delay: record.backoff,
        }
    }
}

/// Outcome of applying a failure to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Record was rescheduled; dispatch again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Attempt budget exhausted; drop the record.
    GiveUp { attempts: u32 },
}
