//! Shared helpers for integration tests

use tracing_subscriber::{fmt, EnvFilter};

/// Route library logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // Only the first test in a binary installs the subscriber
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}
