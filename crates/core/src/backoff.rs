//! Retry backoff policy.
//!
//! A tabulated delay schedule: the n-th failed attempt schedules the next
//! attempt `delays[n]` later, and the last entry is reused once the table is
//! exhausted. Bounded and predictable, no exponential blowup.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::DomainError;

/// Ordered list of retry delays consulted after each failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    delays: Vec<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(60),
                Duration::from_secs(5 * 60),
                Duration::from_secs(15 * 60),
            ],
        }
    }
}

impl BackoffPolicy {
    /// Build a policy from an explicit delay table. The table must be
    /// non-empty; every entry must be a positive duration.
    pub fn new(delays: Vec<Duration>) -> Result<Self, DomainError> {
        if delays.is_empty() {
            return Err(DomainError::validation("retry delay table must not be empty"));
        }
        if delays.iter().any(|d| d.is_zero()) {
            return Err(DomainError::validation("retry delays must be positive"));
        }
        Ok(Self { delays })
    }

    /// Delay applied after a failure with `attempts` completed attempts
    /// before it. Saturates on the last table entry.
    pub fn delay_for(&self, attempts: i32) -> Duration {
        let idx = usize::try_from(attempts.max(0)).unwrap_or(0);
        self.delays[idx.min(self.delays.len() - 1)]
    }

    /// Earliest time of the next attempt, computed from the caller's clock.
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempts: i32) -> DateTime<Utc> {
        let delay = self.delay_for(attempts);
        now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}
