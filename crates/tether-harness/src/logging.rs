//! Tracing subscriber for tests.
//!
//! Level conventions across the tether crates:
//! - WARN: a handler tree failed (desync, tamper, bad signature)
//! - DEBUG: lifecycle (handshake transitions, channels opened and closed)
//! - TRACE: per-message events

use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `debug`. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
