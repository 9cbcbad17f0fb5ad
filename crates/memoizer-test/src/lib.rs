//! Helpers for testing the memoizer.
//!
//! Integration tests should call [`setup`] first, so that log output of the memoizer is captured
//! by the test harness.

use std::time::Duration;

use memoizer::MemoizerConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `memoizer` crate and test
///    crates and mutes all other logs (such as moka or tokio).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memoizer=trace,integration=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A config for tests, with the background sweep disabled.
///
/// Tests that rely on expiration should set short durations themselves.
pub fn memoizer_config() -> MemoizerConfig {
    MemoizerConfig {
        name: "test".into(),
        default_expiration: Duration::from_secs(90),
        cleanup_interval: Duration::ZERO,
        ..Default::default()
    }
}
