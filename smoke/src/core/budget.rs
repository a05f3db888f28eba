//! Shared time budget helpers for deterministic orchestration.
//!
//! `now` is always passed in so the engine can run against a fake clock.

use std::time::{Duration, Instant};

/// Deadline `budget` after `now`; a budget too large to represent means no deadline.
pub fn deadline_after(now: Instant, budget: Duration) -> Option<Instant> {
    now.checked_add(budget)
}

/// Time left until `deadline`, or `None` when there is no deadline.
pub fn remaining_budget(deadline: Option<Instant>, now: Instant) -> Option<Duration> {
    deadline.map(|d| d.checked_duration_since(now).unwrap_or(Duration::ZERO))
}

pub fn deadline_passed(deadline: Option<Instant>, now: Instant) -> bool {
    remaining_budget(deadline, now).is_some_and(|left| left.is_zero())
}

/// Shorten `wait` so a sleep never runs past the deadline.
pub fn clamp_to_deadline(wait: Duration, deadline: Option<Instant>, now: Instant) -> Duration {
    match remaining_budget(deadline, now) {
        Some(left) => wait.min(left),
        None => wait,
    }
}
