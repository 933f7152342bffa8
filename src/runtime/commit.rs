//! Single-threaded, ticket-ordered commit pipeline.
//!
//! Workers of the dispatcher finish events in any order. Each finished event
//! is parked in a slab slot and indexed by ticket; the one commit thread
//! applies the lowest parked ticket exactly when it equals the authority's
//! `now_committing`. A parked ticket below `now_committing` means the ticket
//! is being committed twice and is fatal.
//!
//! Committing an [`EventKind::Terminal`] event halts the pipeline.

use super::event::{Event, EventKind};
use super::pool::{Lane, Next, Phase, PoolShared, WorkerPool};
use crate::config::PoolBounds;
use crate::error::{Component, Error, Result, Violation, fail_fast};
use crate::observability::RuntimeMetrics;
use crate::sync::{Advance, TicketAuthority};
use crate::tracing_compat::{debug, info, trace};
use crate::types::OrderId;
use slab::Slab;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub(crate) struct CommitLane {
    slots: Slab<Event>,
    order: BinaryHeap<Reverse<(OrderId, usize)>>,
    terminal_seen: bool,
}

impl CommitLane {
    fn head(&self) -> Option<OrderId> {
        self.order.peek().map(|Reverse((id, _))| *id)
    }
}

pub(crate) struct CommitCtx {
    authority: Arc<TicketAuthority>,
    metrics: Arc<RuntimeMetrics>,
    halted: AtomicBool,
}

impl Lane for CommitLane {
    type Job = Event;
    type Ctx = CommitCtx;

    fn poll(&mut self, ctx: &CommitCtx, phase: Phase) -> Next<Event> {
        if phase == Phase::Halted || self.terminal_seen {
            return Next::Stop;
        }
        let Some(head) = self.head() else {
            return if phase == Phase::Draining {
                Next::Stop
            } else {
                Next::Wait
            };
        };
        let now_committing = ctx.authority.now_committing();
        match head.ticket().cmp(&now_committing) {
            CmpOrdering::Less => fail_fast(
                ctx.authority.policy(),
                Violation::DuplicateCommit {
                    ticket: head,
                    now_committing,
                },
            ),
            CmpOrdering::Greater if phase == Phase::Draining => {
                debug!(%head, now_committing, "drain stopped at commit gap");
                Next::Stop
            }
            CmpOrdering::Greater => Next::Wait,
            CmpOrdering::Equal => {
                let Some(Reverse((_, key))) = self.order.pop() else {
                    return Next::Wait;
                };
                let event = self.slots.remove(key);
                if event.kind == EventKind::Terminal {
                    self.terminal_seen = true;
                }
                Next::Run(event)
            }
        }
    }

    fn run(pool: &PoolShared<Self>, event: Event) {
        let ctx = pool.ctx();
        if event.failed {
            debug!(id = %event.id, "skipping commit hook of failed event");
        } else {
            event.handler.commit(event.id, &event.payload);
        }
        ctx.authority.commit(event.id);
        ctx.metrics.on_committed();
        if ctx.metrics.samples_latency() {
            ctx.metrics.sample_latency(event.created_at.elapsed());
        }
        trace!(id = %event.id, "event committed");
        if event.kind == EventKind::Terminal {
            ctx.halted.store(true, Ordering::Release);
            info!(id = %event.id, "terminal event committed, commit pipeline halted");
        }
    }
}

/// Applies commit effects strictly in ticket order on one thread.
pub struct CommitPipeline {
    pool: WorkerPool<CommitLane>,
}

impl std::fmt::Debug for CommitPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitPipeline")
            .field("pending", &self.pending())
            .field("halted", &self.is_halted())
            .finish()
    }
}

impl CommitPipeline {
    /// Starts the commit thread for `authority`.
    pub fn start(authority: Arc<TicketAuthority>, metrics: Arc<RuntimeMetrics>) -> Result<Self> {
        let pool = WorkerPool::start(
            "commit",
            Component::CommitPipeline,
            PoolBounds::fixed(1),
            Duration::MAX,
            CommitLane {
                slots: Slab::new(),
                order: BinaryHeap::new(),
                terminal_seen: false,
            },
            CommitCtx {
                authority: Arc::clone(&authority),
                metrics,
                halted: AtomicBool::new(false),
            },
        )?;
        let weak: Weak<PoolShared<CommitLane>> = Arc::downgrade(pool.shared());
        authority.on_advance(move |advance| {
            if let (Advance::Committed(_), Some(shared)) = (advance, weak.upgrade()) {
                shared.wake_all();
            }
        });
        Ok(Self { pool })
    }

    /// Parks a finished event until its ticket is next to commit.
    pub fn commit_event(&self, event: Event) -> Result<()> {
        self.pool.submit(|lane| {
            if lane.terminal_seen {
                return Err(Error::Halted(Component::CommitPipeline));
            }
            let id = event.id;
            let key = lane.slots.insert(event);
            lane.order.push(Reverse((id, key)));
            Ok(())
        })?
    }

    /// Returns true if the lowest parked ticket can commit right now.
    #[must_use]
    pub fn has_uncommitted_events(&self) -> bool {
        let state = self.pool.shared().lock();
        state
            .lane
            .head()
            .is_some_and(|head| head.ticket() == self.pool.shared().ctx().authority.now_committing())
    }

    /// Returns the number of parked events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pool.shared().with_lane(|lane| lane.slots.len())
    }

    /// Returns true once a terminal event has committed.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.pool.shared().ctx().halted.load(Ordering::Acquire)
    }

    /// Commits every committable parked event, then joins the commit thread.
    pub fn halt_and_wait_commit(&self) {
        self.pool.drain_and_join();
    }

    /// Abandons parked events and joins the commit thread.
    pub fn halt_and_no_wait_commit(&self) {
        self.pool.halt_and_join();
    }
}
