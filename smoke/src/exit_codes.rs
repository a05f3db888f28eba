//! Stable exit codes for `redis-smoke`.

/// Every step passed or was skipped.
pub const OK: i32 = 0;
/// A step failed, or an awaited operation failed or never finished.
pub const FAILED: i32 = 1;
/// Invalid configuration or usage.
pub const INVALID: i32 = 2;
