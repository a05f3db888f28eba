//! Smoke tests for a Redis service offering on Cloud Foundry.
//!
//! Every platform interaction runs through one retry engine that issues a
//! command, classifies its captured output and either stops or backs off and
//! tries again. The layout keeps that engine testable:
//!
//! - **[`core`]**: Pure logic (backoff timing, output classification, rule sets).
//!   No I/O.
//! - **[`io`]**: Side effects (child processes, HTTP, clock, config files).
//!   Each sits behind a trait so tests can script it.
//!
//! [`poll`] joins the two; [`step`], [`suite`] and [`report`] build the
//! smoke-test narrative on top.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod poll;
pub mod report;
pub mod step;
pub mod suite;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
