//! Attempt bookkeeping and retry-deadline arithmetic.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::id::QueueName;
use crate::payload::{CommandReference, JobPayload};

/// Retry configuration of a remote queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed (`None` = unlimited).
    pub max_attempts: Option<u32>,
    /// Time window, measured from the first attempt, in which retries may run.
    pub max_retry_duration: Option<Duration>,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    /// Cloud Tasks' documented queue defaults.
    fn default() -> Self {
        Self {
            max_attempts: Some(100),
            max_retry_duration: None,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Interpret the remote `maxAttempts` value; `-1` (and `0`) mean unlimited.
    pub fn max_attempts_from_remote(raw: Option<i64>) -> Option<u32> {
        match raw {
            Some(n) if n > 0 => u32::try_from(n).ok(),
            _ => None,
        }
    }

    /// Absolute deadline for retries, given the first attempt's dispatch time.
    ///
    /// `None` when either the first attempt is unknown or the policy has no
    /// maximum retry duration.
    pub fn retry_until(&self, first_attempt_at: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let first = first_attempt_at?;
        let window = TimeDelta::from_std(self.max_retry_duration?).ok()?;
        first.checked_add_signed(window)
    }

    pub fn apply(mut self, overrides: &RetryPolicyOverride) -> Self {
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = Some(max_attempts);
        }
        if let Some(min_backoff) = overrides.min_backoff {
            self.min_backoff = min_backoff;
        }
        if let Some(max_backoff) = overrides.max_backoff {
            self.max_backoff = max_backoff;
        }
        self
    }
}

/// Fields forced on top of a fetched [`RetryPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicyOverride {
    pub max_attempts: Option<u32>,
    pub min_backoff: Option<Duration>,
    pub max_backoff: Option<Duration>,
}

impl RetryPolicyOverride {
    /// Fast, deterministic retries for emulators and tests.
    pub fn emulated() -> Self {
        Self {
            max_attempts: Some(3),
            min_backoff: Some(Duration::ZERO),
            max_backoff: Some(Duration::ZERO),
        }
    }
}

/// Where this delivery sits in the job's attempt history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    pub queue: QueueName,
    pub max_tries: Option<u32>,
    /// Only ever set for attempts after the first.
    pub retry_until: Option<DateTime<Utc>>,
}

impl AttemptContext {
    /// Attempt number for a delivered retry count (0 on first delivery).
    pub fn attempt_from_retry_count(retry_count: u32) -> u32 {
        retry_count.saturating_add(1)
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    /// The job already ran out of attempts or time before this attempt.
    pub fn already_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.max_tries.is_some_and(|max| self.attempt > max) || self.deadline_passed(now)
    }

    /// A failure of this attempt is terminal.
    pub fn is_last_attempt(&self, now: DateTime<Utc>) -> bool {
        self.max_tries.is_some_and(|max| self.attempt >= max) || self.deadline_passed(now)
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.retry_until.is_some_and(|until| until < now)
    }
}

/// Everything the worker needs to run one attempt of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub payload: JobPayload,
    pub command: CommandReference,
    pub attempt: AttemptContext,
    /// Body exactly as delivered (kept for the failure ledger).
    pub raw_payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn policy(max_retry_duration: Option<u64>) -> RetryPolicy {
        RetryPolicy {
            max_attempts: Some(5),
            max_retry_duration: max_retry_duration.map(Duration::from_secs),
            ..RetryPolicy::default()
        }
    }

    fn context(attempt: u32, max_tries: Option<u32>, retry_until: Option<DateTime<Utc>>) -> AttemptContext {
        AttemptContext {
            attempt,
            queue: QueueName::new("default").unwrap(),
            max_tries,
            retry_until,
        }
    }

    #[test]
    fn retry_until_adds_window_to_first_attempt() {
        let first = at(1_700_000_000);
        assert_eq!(policy(Some(3600)).retry_until(Some(first)), Some(at(1_700_003_600)));
    }

    #[test]
    fn retry_until_requires_both_inputs() {
        assert_eq!(policy(None).retry_until(Some(at(0))), None);
        assert_eq!(policy(Some(60)).retry_until(None), None);
    }

    #[test]
    fn remote_max_attempts_interpretation() {
        assert_eq!(RetryPolicy::max_attempts_from_remote(Some(-1)), None);
        assert_eq!(RetryPolicy::max_attempts_from_remote(Some(0)), None);
        assert_eq!(RetryPolicy::max_attempts_from_remote(None), None);
        assert_eq!(RetryPolicy::max_attempts_from_remote(Some(5)), Some(5));
    }

    #[test]
    fn emulated_override_keeps_retry_window() {
        let fetched = RetryPolicy {
            max_attempts: Some(50),
            max_retry_duration: Some(Duration::from_secs(600)),
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(300),
        };
        let applied = fetched.apply(&RetryPolicyOverride::emulated());
        assert_eq!(applied.max_attempts, Some(3));
        assert_eq!(applied.min_backoff, Duration::ZERO);
        assert_eq!(applied.max_backoff, Duration::ZERO);
        assert_eq!(applied.max_retry_duration, Some(Duration::from_secs(600)));
    }

    #[test]
    fn exhaustion_rules() {
        let now = at(1_000);

        assert!(!context(1, Some(3), None).already_exhausted(now));
        assert!(!context(3, Some(3), None).already_exhausted(now));
        assert!(context(4, Some(3), None).already_exhausted(now));
        assert!(context(2, None, Some(at(999))).already_exhausted(now));
        assert!(!context(2, None, Some(at(1_000))).already_exhausted(now));

        assert!(context(3, Some(3), None).is_last_attempt(now));
        assert!(!context(2, Some(3), None).is_last_attempt(now));
        assert!(!context(50, None, None).is_last_attempt(now));
    }

    #[test]
    fn first_delivery_is_attempt_one() {
        assert_eq!(AttemptContext::attempt_from_retry_count(0), 1);
        assert_eq!(AttemptContext::attempt_from_retry_count(2), 3);
        assert_eq!(AttemptContext::attempt_from_retry_count(u32::MAX), u32::MAX);
    }

    proptest! {
        #[test]
        fn retry_until_is_first_plus_window(first in 0i64..4_000_000_000, window in 0u64..10_000_000) {
            let until = policy(Some(window)).retry_until(Some(at(first))).unwrap();
            prop_assert_eq!(until.timestamp(), first + window as i64);
        }

        #[test]
        fn attempt_is_always_at_least_one(retry_count in any::<u32>()) {
            prop_assert!(AttemptContext::attempt_from_retry_count(retry_count) >= 1);
        }
    }
}
