//! Shared helpers for unit tests.
//!
//! Every test starts with [`init_test_logging`] and a `test_phase!` marker so
//! that interleaved output from concurrent tests can be attributed.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing` subscriber for tests, once per process.
///
/// Honors `RUST_LOG`; defaults to `ordo=debug`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ordo=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .try_init();
    });
}

/// Marks the start of a named test phase in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(test = %$name, "==== test phase ====");
    };
}

/// Marks successful completion of a named test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(test = %$name, "==== test complete ====");
    };
}

/// Asserts a condition, logging expected and actual values first.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {{
        let ok = $cond;
        ::tracing::debug!(
            what = %$what,
            expected = ?$expected,
            actual = ?$actual,
            ok,
            "assertion"
        );
        assert!(
            ok,
            "{}: expected {:?}, got {:?}",
            $what, $expected, $actual
        );
    }};
}
