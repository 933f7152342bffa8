//! Unordered callback pool.
//!
//! The escape hatch for work that needs no ticket: boxed callbacks run in
//! FIFO order of pickup, on whichever worker is free. A panicking callback is
//! contained and counted.

use super::pool::{Lane, Next, Phase, PoolShared, WorkerPool};
use crate::config::PoolBounds;
use crate::error::{Component, Result};
use crate::observability::RuntimeMetrics;
use crate::tracing_compat::{trace, warn};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

type Callback = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct AsyncLane {
    queue: VecDeque<Callback>,
}

impl Lane for AsyncLane {
    type Job = Callback;
    type Ctx = Arc<RuntimeMetrics>;

    fn poll(&mut self, _: &Arc<RuntimeMetrics>, phase: Phase) -> Next<Callback> {
        if phase == Phase::Halted {
            return Next::Stop;
        }
        match self.queue.pop_front() {
            Some(callback) => Next::Run(callback),
            None if phase == Phase::Draining => Next::Stop,
            None => Next::Wait,
        }
    }

    fn run(pool: &PoolShared<Self>, callback: Callback) {
        let metrics = pool.ctx();
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            warn!("async callback panicked");
            metrics.on_async_panicked();
        }
        metrics.on_async_executed();
    }
}

/// Bounded pool running boxed callbacks without ordering guarantees.
pub struct AsyncPool {
    pool: WorkerPool<AsyncLane>,
}

impl std::fmt::Debug for AsyncPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPool")
            .field("queued", &self.queued())
            .field("workers", &self.live_workers())
            .finish()
    }
}

impl AsyncPool {
    /// Starts `bounds.min` workers.
    pub fn start(bounds: PoolBounds, keep_alive: Duration, metrics: Arc<RuntimeMetrics>) -> Result<Self> {
        let pool = WorkerPool::start(
            "async",
            Component::AsyncPool,
            bounds,
            keep_alive,
            AsyncLane {
                queue: VecDeque::new(),
            },
            metrics,
        )?;
        Ok(Self { pool })
    }

    /// Queues a callback.
    ///
    /// Refused with [`crate::Error::Halted`] once the pool is halting.
    pub fn enqueue<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool
            .submit(|lane| lane.queue.push_back(Box::new(callback)))?;
        trace!("async callback queued");
        Ok(())
    }

    /// Returns the number of queued callbacks.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.pool.shared().with_lane(|lane| lane.queue.len())
    }

    /// Returns the number of live workers.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.pool.live_workers()
    }

    /// Runs every queued callback, then joins the workers.
    pub fn halt_and_wait(&self) {
        self.pool.drain_and_join();
    }

    /// Abandons queued callbacks and joins the workers.
    pub fn halt_and_no_wait(&self) {
        self.pool.halt_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn halt_and_wait_runs_every_callback() {
        init_test("halt_and_wait_runs_every_callback");
        let metrics = Arc::new(RuntimeMetrics::default());
        let pool = AsyncPool::start(PoolBounds::new(1, 4), Duration::from_millis(20), Arc::clone(&metrics))
            .expect("start");
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let hits = Arc::clone(&hits);
            pool.enqueue(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .expect("enqueue");
        }
        pool.halt_and_wait();
        crate::assert_with_log!(
            hits.load(Ordering::SeqCst) == 100,
            "callbacks run",
            100,
            hits.load(Ordering::SeqCst)
        );
        assert_eq!(pool.live_workers(), 0);
        assert_eq!(metrics.snapshot().async_executed, 100);
        crate::test_complete!("halt_and_wait_runs_every_callback");
    }

    #[test]
    fn enqueue_after_halt_is_refused() {
        init_test("enqueue_after_halt_is_refused");
        let pool = AsyncPool::start(PoolBounds::fixed(1), Duration::from_secs(1), Arc::default()).expect("start");
        pool.halt_and_wait();
        let refused = pool.enqueue(|| {});
        assert!(matches!(refused, Err(Error::Halted(Component::AsyncPool))));
        crate::test_complete!("enqueue_after_halt_is_refused");
    }

    #[test]
    fn panicking_callback_does_not_kill_worker() {
        init_test("panicking_callback_does_not_kill_worker");
        let metrics = Arc::new(RuntimeMetrics::default());
        let pool = AsyncPool::start(PoolBounds::fixed(1), Duration::from_secs(1), Arc::clone(&metrics))
            .expect("start");
        pool.enqueue(|| panic!("callback failure")).expect("enqueue");
        let (tx, rx) = mpsc::channel();
        pool.enqueue(move || {
            let _ = tx.send(());
        })
        .expect("enqueue");
        rx.recv_timeout(Duration::from_secs(5)).expect("second callback ran");
        pool.halt_and_wait();
        assert_eq!(metrics.snapshot().async_panicked, 1);
        crate::test_complete!("panicking_callback_does_not_kill_worker");
    }

    #[test]
    fn no_wait_halt_abandons_queue() {
        init_test("no_wait_halt_abandons_queue");
        let pool = AsyncPool::start(PoolBounds::fixed(1), Duration::from_secs(1), Arc::default()).expect("start");
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        pool.enqueue(move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
        })
        .expect("enqueue");
        started_rx.recv_timeout(Duration::from_secs(5)).expect("started");
        pool.enqueue(|| {}).expect("enqueue");
        assert_eq!(pool.queued(), 1);
        pool.pool.halt();
        drop(gate_tx);
        pool.halt_and_no_wait();
        assert_eq!(pool.queued(), 1);
        crate::test_complete!("no_wait_halt_abandons_queue");
    }
}
