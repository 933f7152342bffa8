//! Bounded worker pool shared by every channel.
//!
//! A pool owns a [`Lane`]: the channel-specific queue state that decides what
//! a worker runs next. The lane lives inside the pool mutex, so the channel
//! and its workers agree on one lock. Workers follow a fixed loop:
//!
//! 1. poll the lane under the lock
//! 2. run the returned job with the lock released
//! 3. otherwise park on the pool condition variable
//!
//! The pool starts `min` workers, grows toward `max` when work is submitted
//! and no worker is idle, and lets surplus workers exit after an idle
//! keep-alive. Teardown is cooperative: the phase changes, every worker is
//! woken, then threads are joined.

use crate::config::PoolBounds;
use crate::error::{Component, Error, Result};
use crate::tracing_compat::{debug, error, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Lifecycle phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Accepting and running work.
    Running,
    /// No new work; workers finish what the lane still offers.
    Draining,
    /// Workers stop at their next poll; pending work is abandoned.
    Halted,
}

/// What a worker should do after polling its lane.
pub(crate) enum Next<J> {
    /// Run this job with the pool lock released.
    Run(J),
    /// Nothing runnable yet; park until woken.
    Wait,
    /// Exit the worker loop.
    Stop,
}

/// Channel-specific queue state driven by a [`WorkerPool`].
pub(crate) trait Lane: Send + Sized + 'static {
    /// Unit of work handed to a worker. Never leaves the polling thread.
    type Job;
    /// Immutable collaborators shared by every worker.
    type Ctx: Send + Sync + 'static;

    /// Picks the next job. Called with the pool lock held.
    fn poll(&mut self, ctx: &Self::Ctx, phase: Phase) -> Next<Self::Job>;

    /// Runs a job. Called with the pool lock released.
    fn run(pool: &PoolShared<Self>, job: Self::Job);
}

pub(crate) struct PoolState<L> {
    pub(crate) lane: L,
    phase: Phase,
    live: usize,
    idle: usize,
    wakeups: usize,
    spawned: u64,
}

/// State shared between a pool handle and its workers.
pub(crate) struct PoolShared<L: Lane> {
    name: &'static str,
    component: Component,
    bounds: PoolBounds,
    keep_alive: Duration,
    ctx: L::Ctx,
    state: Mutex<PoolState<L>>,
    wakeup: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<L: Lane> PoolShared<L> {
    /// Returns the collaborators shared by every worker.
    pub(crate) fn ctx(&self) -> &L::Ctx {
        &self.ctx
    }

    /// Locks the pool state.
    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolState<L>> {
        self.state.lock()
    }

    /// Runs `f` against the lane under the pool lock.
    pub(crate) fn with_lane<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        f(&mut self.state.lock().lane)
    }

    /// Mutates the lane and wakes every parked worker.
    ///
    /// Used when a change may make work runnable without adding any, such as
    /// a counter moving or a terminal ticket being recorded.
    pub(crate) fn update_and_wake<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        let mut state = self.state.lock();
        let out = f(&mut state.lane);
        self.wakeup.notify_all();
        out
    }

    /// Wakes every parked worker.
    pub(crate) fn wake_all(&self) {
        let _state = self.state.lock();
        self.wakeup.notify_all();
    }

    /// Returns true while the pool accepts work.
    pub(crate) fn is_running(&self) -> bool {
        self.state.lock().phase == Phase::Running
    }
}

/// Owning handle of a bounded worker pool.
pub(crate) struct WorkerPool<L: Lane> {
    shared: Arc<PoolShared<L>>,
}

impl<L: Lane> WorkerPool<L> {
    /// Creates the pool and starts its minimum number of workers.
    pub(crate) fn start(
        name: &'static str,
        component: Component,
        bounds: PoolBounds,
        keep_alive: Duration,
        lane: L,
        ctx: L::Ctx,
    ) -> Result<Self> {
        let shared = Arc::new(PoolShared {
            name,
            component,
            bounds,
            keep_alive,
            ctx,
            state: Mutex::new(PoolState {
                lane,
                phase: Phase::Running,
                live: 0,
                idle: 0,
                wakeups: 0,
                spawned: 0,
            }),
            wakeup: Condvar::new(),
            handles: Mutex::new(Vec::with_capacity(bounds.max)),
        });
        let pool = Self { shared };
        {
            let mut state = pool.shared.state.lock();
            for _ in 0..bounds.min.max(1) {
                if let Err(err) = spawn_worker(&pool.shared, &mut state) {
                    state.phase = Phase::Halted;
                    drop(state);
                    pool.shared.wakeup.notify_all();
                    pool.join();
                    return Err(err);
                }
            }
        }
        debug!(pool = name, min = bounds.min, max = bounds.max, "worker pool started");
        Ok(pool)
    }

    /// Returns the shared state, for wiring listeners.
    pub(crate) fn shared(&self) -> &Arc<PoolShared<L>> {
        &self.shared
    }

    /// Mutates the lane to add work, then wakes or spawns a worker.
    ///
    /// Fails with [`Error::Halted`] once the pool has left `Running`; in that
    /// case `f` is not called.
    pub(crate) fn submit<R>(&self, f: impl FnOnce(&mut L) -> R) -> Result<R> {
        let mut state = self.shared.state.lock();
        if state.phase != Phase::Running {
            return Err(Error::Halted(self.shared.component));
        }
        let out = f(&mut state.lane);
        if state.idle > state.wakeups {
            state.wakeups += 1;
            self.shared.wakeup.notify_one();
        } else if state.live < self.shared.bounds.max {
            if let Err(err) = spawn_worker(&self.shared, &mut state) {
                if state.live == 0 {
                    return Err(err);
                }
                error!(pool = self.shared.name, %err, "pool growth failed; continuing with live workers");
            }
        }
        Ok(out)
    }

    /// Returns the number of live workers.
    pub(crate) fn live_workers(&self) -> usize {
        self.shared.state.lock().live
    }

    /// Stops accepting work; workers drain what the lane still offers.
    pub(crate) fn begin_drain(&self) {
        self.set_phase(Phase::Draining);
    }

    /// Stops every worker at its next poll without joining.
    pub(crate) fn halt(&self) {
        self.set_phase(Phase::Halted);
    }

    /// Drains the lane and joins every worker.
    pub(crate) fn drain_and_join(&self) {
        self.begin_drain();
        self.join();
    }

    /// Abandons pending work and joins every worker.
    pub(crate) fn halt_and_join(&self) {
        self.halt();
        self.join();
    }

    fn set_phase(&self, phase: Phase) {
        let mut state = self.shared.state.lock();
        // Halted is terminal; Draining never resumes Running.
        if state.phase == Phase::Halted || (state.phase == Phase::Draining && phase == Phase::Running) {
            return;
        }
        state.phase = phase;
        drop(state);
        debug!(pool = self.shared.name, ?phase, "pool phase changed");
        self.shared.wakeup.notify_all();
    }

    /// Joins every worker thread except the caller's own.
    pub(crate) fn join(&self) {
        let me = thread::current().id();
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.shared.handles.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.thread().id() == me {
                    continue;
                }
                if handle.join().is_err() {
                    error!(pool = self.shared.name, "worker thread panicked");
                }
            }
        }
        debug!(pool = self.shared.name, "worker pool joined");
    }
}

impl<L: Lane> Drop for WorkerPool<L> {
    fn drop(&mut self) {
        self.halt();
    }
}

fn spawn_worker<L: Lane>(shared: &Arc<PoolShared<L>>, state: &mut PoolState<L>) -> Result<()> {
    state.spawned += 1;
    state.live += 1;
    let worker = Arc::clone(shared);
    let thread_name = format!("ordo-{}-{}", shared.name, state.spawned);
    match thread::Builder::new()
        .name(thread_name)
        .spawn(move || worker_loop(&worker))
    {
        Ok(handle) => {
            let mut handles = shared.handles.lock();
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
            Ok(())
        }
        Err(source) => {
            state.live -= 1;
            Err(Error::Spawn {
                component: shared.component,
                source,
            })
        }
    }
}

struct LiveGuard<'a, L: Lane> {
    shared: &'a PoolShared<L>,
    thread: ThreadId,
}

impl<L: Lane> Drop for LiveGuard<'_, L> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.live -= 1;
        drop(state);
        trace!(pool = self.shared.name, thread = ?self.thread, "worker exited");
        // Hand any pending wakeup to a remaining worker.
        self.shared.wakeup.notify_one();
    }
}

fn worker_loop<L: Lane>(shared: &PoolShared<L>) {
    let _live = LiveGuard {
        shared,
        thread: thread::current().id(),
    };
    trace!(pool = shared.name, "worker started");
    let mut state = shared.state.lock();
    loop {
        let phase = state.phase;
        match state.lane.poll(&shared.ctx, phase) {
            Next::Run(job) => {
                MutexGuard::unlocked(&mut state, || L::run(shared, job));
                if state.idle > 0 {
                    shared.wakeup.notify_all();
                }
            }
            Next::Stop => break,
            Next::Wait => {
                if state.phase == Phase::Halted {
                    break;
                }
                state.idle += 1;
                let surplus = state.live > shared.bounds.min;
                let timed_out = if surplus {
                    shared.wakeup.wait_for(&mut state, shared.keep_alive).timed_out()
                } else {
                    shared.wakeup.wait(&mut state);
                    false
                };
                state.idle -= 1;
                state.wakeups = state.wakeups.saturating_sub(1).min(state.idle);
                if timed_out && state.phase == Phase::Running && state.live > shared.bounds.min {
                    trace!(pool = shared.name, "surplus worker idle past keep-alive");
                    break;
                }
            }
        }
    }
}
