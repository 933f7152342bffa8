//! Runtime observability.
//!
//! Structured logging goes through [`crate::tracing_compat`]; this module
//! holds the counters and latency statistics.

pub mod metrics;

pub use metrics::{GlobalEventStats, LatencyHistogram, MetricsSnapshot, RuntimeMetrics};
