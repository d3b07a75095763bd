//! Tracing setup for tests.
//!
//! The core crate logs through `tracing`. Call [`init_tracing`] at the start
//! of a test to see those events; `RUST_LOG` overrides the default filter.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber writing to the test output.
///
/// Safe to call from every test: only the first call installs a subscriber.
pub fn init_tracing() {
    init_tracing_with("info");
}

/// Like [`init_tracing`], with `default_filter` used when `RUST_LOG` is unset.
pub fn init_tracing_with(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
