//! I/O boundaries for the smoke tests.

pub mod app;
pub mod cf;
pub mod clock;
pub mod config;
pub mod process;
