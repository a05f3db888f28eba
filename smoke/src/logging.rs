//! Tracing setup for smoke-test runs.
//!
//! Step results go to the report on stdout; tracing is operator diagnostics
//! on stderr and is controlled by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset so each step and retry is visible.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=smoke=debug redis-smoke run --config config.json
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
