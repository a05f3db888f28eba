//! Deterministic, pure logic shared by the smoke-test harness.
//!
//! Core modules must be free of I/O side effects. They operate on captured
//! results and configuration values and return deterministic outputs.

pub mod backoff;
pub mod budget;
pub mod classifier;
pub mod rules;
pub mod types;
