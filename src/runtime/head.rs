//! Ticket-ordered head dispatcher.
//!
//! Events wait in a min-priority queue keyed by [`OrderId`]. A worker takes
//! the queue head only when its ticket equals the authority's `now_serving`
//! and the target context's execution lock is free, so no event ever runs
//! ahead of an earlier ticket, even when a later one is runnable. Workers
//! that find nothing runnable park until a ticket advances or a context is
//! released.
//!
//! Execution path of one event:
//!
//! 1. pop under the pool lock and take the context lock
//! 2. release the pool lock and admit the ticket
//! 3. run the handler
//! 4. release write exclusivity, hand off to the [`CommitPipeline`]
//! 5. release the context lock

use super::commit::CommitPipeline;
use super::context::{ContextTable, ExecGuard};
use super::event::{ByTicket, Event};
use super::pool::{Lane, Next, Phase, PoolShared, WorkerPool};
use crate::config::PoolBounds;
use crate::error::{Component, Error, Result, Violation, fail_fast};
use crate::observability::RuntimeMetrics;
use crate::sync::{Advance, LockMode, TicketAuthority};
use crate::tracing_compat::{debug, error, info, trace, warn};
use crate::types::OrderId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub(crate) struct DispatchLane {
    queue: BinaryHeap<Reverse<ByTicket>>,
    terminal: Option<OrderId>,
    terminal_popped: bool,
    last_popped: Option<OrderId>,
}

pub(crate) struct DispatchCtx {
    authority: Arc<TicketAuthority>,
    contexts: Arc<ContextTable>,
    pipeline: Arc<CommitPipeline>,
    metrics: Arc<RuntimeMetrics>,
}

pub(crate) struct DispatchJob {
    event: Event,
    exec: ExecGuard,
}

impl Lane for DispatchLane {
    type Job = DispatchJob;
    type Ctx = DispatchCtx;

    fn poll(&mut self, ctx: &DispatchCtx, phase: Phase) -> Next<DispatchJob> {
        if phase == Phase::Halted || self.terminal_popped {
            return Next::Stop;
        }
        let Some(Reverse(ByTicket(head))) = self.queue.peek() else {
            return if phase == Phase::Draining {
                Next::Stop
            } else {
                Next::Wait
            };
        };

        let now_serving = ctx.authority.now_serving();
        if head.id.ticket() < now_serving {
            fail_fast(
                ctx.authority.policy(),
                Violation::TicketAlreadyServed {
                    ticket: head.id,
                    now_serving,
                },
            );
        }
        if head.id.ticket() > now_serving {
            // Only an event already popped by a worker can close the gap.
            if phase == Phase::Draining {
                debug!(id = %head.id, now_serving, "drain stopped at ticket gap");
                return Next::Stop;
            }
            return Next::Wait;
        }

        let Some(exec) = ctx.contexts.exec_lock(&head.context) else {
            fail_fast(
                ctx.authority.policy(),
                Violation::UnknownContext(head.context.clone()),
            );
        };
        let Some(exec) = exec.try_lock_arc() else {
            trace!(id = %head.id, context = %head.context, "context busy");
            return Next::Wait;
        };

        let Some(Reverse(ByTicket(event))) = self.queue.pop() else {
            return Next::Wait;
        };
        self.last_popped = Some(event.id);
        if self.terminal == Some(event.id) {
            self.terminal_popped = true;
            debug!(id = %event.id, "terminal ticket dispatched");
        }
        Next::Run(DispatchJob { event, exec })
    }

    fn run(pool: &PoolShared<Self>, job: DispatchJob) {
        let ctx = pool.ctx();
        let DispatchJob { mut event, exec } = job;
        let id = event.id;

        ctx.authority.acquire(id, event.mode);
        trace!(%id, context = %event.context, mode = ?event.mode, "executing event");
        let handler = Arc::clone(&event.handler);
        let payload = event.payload.clone();
        if catch_unwind(AssertUnwindSafe(|| handler.execute(id, &payload))).is_err() {
            error!(%id, context = %event.context, "event handler panicked");
            event.failed = true;
        }
        ctx.metrics.on_dispatched();

        if event.mode == LockMode::Write {
            ctx.authority.downgrade(id, LockMode::Read);
        }
        if let Err(err) = ctx.pipeline.commit_event(event) {
            warn!(%id, %err, "finished event not committed");
        }
        drop(exec);
    }
}

/// Worker pool executing events in strict ticket order.
pub struct HeadDispatcher {
    pool: WorkerPool<DispatchLane>,
}

impl std::fmt::Debug for HeadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadDispatcher")
            .field("queued", &self.queued())
            .field("workers", &self.pool.live_workers())
            .finish()
    }
}

impl HeadDispatcher {
    /// Starts the dispatcher workers.
    pub fn start(
        authority: Arc<TicketAuthority>,
        contexts: Arc<ContextTable>,
        pipeline: Arc<CommitPipeline>,
        metrics: Arc<RuntimeMetrics>,
        bounds: PoolBounds,
        keep_alive: Duration,
    ) -> Result<Self> {
        let pool = WorkerPool::start(
            "head",
            Component::Dispatcher,
            bounds,
            keep_alive,
            DispatchLane {
                queue: BinaryHeap::new(),
                terminal: None,
                terminal_popped: false,
                last_popped: None,
            },
            DispatchCtx {
                authority: Arc::clone(&authority),
                contexts,
                pipeline,
                metrics,
            },
        )?;
        let weak: Weak<PoolShared<DispatchLane>> = Arc::downgrade(pool.shared());
        authority.on_advance(move |advance| {
            if let (Advance::Served(_), Some(shared)) = (advance, weak.upgrade()) {
                shared.wake_all();
            }
        });
        Ok(Self { pool })
    }

    /// Queues an event for ticket-ordered execution.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        let ctx = self.pool.shared().ctx();
        if event.id.domain() != ctx.authority.domain() {
            fail_fast(
                ctx.authority.policy(),
                Violation::ForeignTicket { ticket: event.id },
            );
        }
        self.pool.submit(|lane| {
            if lane.terminal_popped {
                return Err(Error::Halted(Component::Dispatcher));
            }
            trace!(id = %event.id, "event enqueued");
            lane.queue.push(Reverse(ByTicket(event)));
            Ok(())
        })??;
        ctx.metrics.on_enqueued();
        Ok(())
    }

    /// Records the terminal ticket; workers stop once it has been taken.
    ///
    /// Does not block.
    pub fn prepare_halt(&self, terminal: OrderId) {
        info!(%terminal, "dispatcher preparing to halt");
        self.pool.shared().update_and_wake(|lane| {
            lane.terminal = Some(terminal);
            if lane.last_popped.is_some_and(|last| last >= terminal) {
                lane.terminal_popped = true;
            }
        });
    }

    /// Runs queued events up to the first ticket gap, then joins all workers.
    ///
    /// Events behind a ticket that was issued but never enqueued stay queued.
    pub fn halt_and_wait(&self) {
        self.pool.drain_and_join();
    }

    /// Stops workers at their next poll without waiting for them.
    pub fn halt_and_no_wait(&self) {
        self.pool.halt();
    }

    /// Returns the number of queued events.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.pool.shared().with_lane(|lane| lane.queue.len())
    }

    /// Returns the number of live workers.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.pool.live_workers()
    }
}
