//! Retry policy and backoff timing.

use std::time::Duration;

use crate::error::PollError;

/// Wait-time growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Constant baseline.
    None,
    /// `baseline * attempt`.
    Linear,
    /// `baseline * 2^(attempt - 1)`.
    Exponential,
}

/// Immutable retry settings shared read-only by every poll in a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub baseline: Duration,
    /// Total invocations allowed, including the first (>= 1).
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(baseline: Duration, max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            baseline,
            max_attempts,
            backoff,
        }
    }

    /// A single attempt with no retries.
    pub fn once() -> Self {
        Self::new(Duration::ZERO, 1, Backoff::None)
    }

    /// Constant `interval` with enough attempts to keep checking for all of `budget`.
    pub fn spanning(interval: Duration, budget: Duration) -> Self {
        let attempts = if interval.is_zero() {
            u32::MAX
        } else {
            u32::try_from(budget.as_millis() / interval.as_millis().max(1))
                .unwrap_or(u32::MAX)
                .saturating_add(1)
        };
        Self::new(interval, attempts, Backoff::None)
    }

    /// Wait before the attempt that follows `attempt` (1-based).
    pub fn wait_for(&self, attempt: u32) -> Result<Duration, PollError> {
        if attempt == 0 {
            return Err(PollError::InvalidAttempt(attempt));
        }
        let wait = match self.backoff {
            Backoff::None => self.baseline,
            Backoff::Linear => self.baseline.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.baseline.saturating_mul(factor)
            }
        };
        Ok(wait)
    }

    /// `max_attempts`, never below 1.
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
