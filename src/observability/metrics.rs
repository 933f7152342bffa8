//! Runtime metrics.
//!
//! Counters are lock-free atomics bumped on the hot path. Latency is tracked
//! in millisecond histograms behind a mutex; request-to-commit sampling is
//! opt-in because it costs a clock read per committed event.

use crate::runtime::GlobalEventTag;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A histogram of latencies in milliseconds.
///
/// An implicit `+Inf` bucket follows the configured bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyHistogram {
    buckets: Vec<f64>,
    counts: Vec<u64>,
    sum_ms: f64,
    max_ms: f64,
    count: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new(vec![
            0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0,
        ])
    }
}

impl LatencyHistogram {
    /// Creates a histogram with ascending bucket bounds in milliseconds.
    #[must_use]
    pub fn new(buckets: Vec<f64>) -> Self {
        let slots = buckets.len() + 1;
        Self {
            buckets,
            counts: vec![0; slots],
            sum_ms: 0.0,
            max_ms: 0.0,
            count: 0,
        }
    }

    /// Records one latency.
    pub fn observe(&mut self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1_000.0;
        self.sum_ms += ms;
        self.max_ms = self.max_ms.max(ms);
        self.count += 1;
        let slot = self
            .buckets
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(self.buckets.len());
        self.counts[slot] += 1;
    }

    /// Returns the number of observations.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Returns the mean latency, if anything was observed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_secs_f64(self.sum_ms / self.count as f64 / 1_000.0))
    }

    /// Returns the largest observed latency.
    #[must_use]
    pub fn max(&self) -> Duration {
        Duration::from_secs_f64(self.max_ms / 1_000.0)
    }

    /// Returns per-bucket counts, `+Inf` last.
    #[must_use]
    pub fn bucket_counts(&self) -> &[u64] {
        &self.counts
    }

    /// Clears every observation.
    pub fn reset(&mut self) {
        self.counts.fill(0);
        self.sum_ms = 0.0;
        self.max_ms = 0.0;
        self.count = 0;
    }
}

impl fmt::Display for LatencyHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count={} sum={:.3}ms max={:.3}ms",
            self.count, self.sum_ms, self.max_ms
        )
    }
}

/// Dispatch-to-commit latency per global event kind.
#[derive(Debug, Default)]
pub struct GlobalEventStats {
    create_context: Mutex<LatencyHistogram>,
    migration: Mutex<LatencyHistogram>,
    modify_ownership: Mutex<LatencyHistogram>,
}

impl GlobalEventStats {
    fn slot(&self, tag: GlobalEventTag) -> &Mutex<LatencyHistogram> {
        match tag {
            GlobalEventTag::CreateContext => &self.create_context,
            GlobalEventTag::Migration => &self.migration,
            GlobalEventTag::ModifyOwnership => &self.modify_ownership,
        }
    }

    /// Records the latency of one committed global event.
    pub fn record(&self, tag: GlobalEventTag, latency: Duration) {
        self.slot(tag).lock().observe(latency);
    }

    /// Returns a copy of one kind's histogram.
    #[must_use]
    pub fn histogram(&self, tag: GlobalEventTag) -> LatencyHistogram {
        self.slot(tag).lock().clone()
    }

    /// Returns the number of committed events of one kind.
    #[must_use]
    pub fn count(&self, tag: GlobalEventTag) -> u64 {
        self.slot(tag).lock().count()
    }
}

/// Counters shared by every runtime component.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    events_enqueued: AtomicU64,
    events_dispatched: AtomicU64,
    events_committed: AtomicU64,
    global_committed: AtomicU64,
    global_deferred: AtomicU64,
    elasticity_accepted: AtomicU64,
    elasticity_dropped: AtomicU64,
    relocations_failed: AtomicU64,
    async_executed: AtomicU64,
    async_panicked: AtomicU64,
    commit_latency: Option<Mutex<LatencyHistogram>>,
    global: GlobalEventStats,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl RuntimeMetrics {
    /// Creates metrics, optionally sampling request-to-commit latency.
    #[must_use]
    pub fn new(sample_latency: bool) -> Self {
        Self {
            commit_latency: sample_latency.then(|| Mutex::new(LatencyHistogram::default())),
            ..Self::default()
        }
    }

    bump! {
        on_enqueued => events_enqueued,
        on_dispatched => events_dispatched,
        on_committed => events_committed,
        on_global_committed => global_committed,
        on_global_deferred => global_deferred,
        on_elasticity_accepted => elasticity_accepted,
        on_elasticity_dropped => elasticity_dropped,
        on_relocation_failed => relocations_failed,
        on_async_executed => async_executed,
        on_async_panicked => async_panicked,
    }

    /// Returns true if request-to-commit latency is sampled.
    #[must_use]
    pub const fn samples_latency(&self) -> bool {
        self.commit_latency.is_some()
    }

    /// Records one request-to-commit latency, if sampling is enabled.
    pub fn sample_latency(&self, latency: Duration) {
        if let Some(histogram) = &self.commit_latency {
            histogram.lock().observe(latency);
        }
    }

    /// Returns the mean request-to-commit latency.
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        self.commit_latency.as_ref().and_then(|h| h.lock().mean())
    }

    /// Returns the per-kind global event statistics.
    #[must_use]
    pub const fn global_events(&self) -> &GlobalEventStats {
        &self.global
    }

    /// Returns a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            events_enqueued: load(&self.events_enqueued),
            events_dispatched: load(&self.events_dispatched),
            events_committed: load(&self.events_committed),
            global_committed: load(&self.global_committed),
            global_deferred: load(&self.global_deferred),
            elasticity_accepted: load(&self.elasticity_accepted),
            elasticity_dropped: load(&self.elasticity_dropped),
            relocations_failed: load(&self.relocations_failed),
            async_executed: load(&self.async_executed),
            async_panicked: load(&self.async_panicked),
            commit_latency: self.commit_latency.as_ref().map(|h| h.lock().clone()),
        }
    }
}

/// Serializable copy of [`RuntimeMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Events accepted by the dispatcher.
    pub events_enqueued: u64,
    /// Events whose handler ran.
    pub events_dispatched: u64,
    /// Events committed by the commit pipeline.
    pub events_committed: u64,
    /// Global events committed.
    pub global_committed: u64,
    /// Global commits deferred behind an in-flight migration.
    pub global_deferred: u64,
    /// Elasticity requests accepted.
    pub elasticity_accepted: u64,
    /// Elasticity requests dropped as overlapping.
    pub elasticity_dropped: u64,
    /// Relocations that failed to start.
    pub relocations_failed: u64,
    /// Async callbacks run.
    pub async_executed: u64,
    /// Async callbacks that panicked.
    pub async_panicked: u64,
    /// Request-to-commit latency, when sampled.
    pub commit_latency: Option<LatencyHistogram>,
}
