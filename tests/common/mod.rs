//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

/// Installs a test `tracing` subscriber once per test binary.
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

/// Polls `f` until it holds, failing the test after five seconds.
pub fn wait_until(mut f: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !f() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(test = %$name, "==== test phase ====");
    };
}

macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(test = %$name, "==== test complete ====");
    };
}

macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {{
        let ok = $cond;
        ::tracing::debug!(what = %$what, expected = ?$expected, actual = ?$actual, ok, "assertion");
        assert!(ok, "{}: expected {:?}, got {:?}", $what, $expected, $actual);
    }};
}
