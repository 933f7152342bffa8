//! Global lifecycle-event channel.
//!
//! Context creation, migration and ownership changes run through their own
//! ticket space, disjoint from per-context tickets. Events wait in a FIFO and
//! a worker dispatches the front event only when its ticket equals
//! `now_serving_ticket`; the ticket advances only when the event commits.
//! Because several lifecycle operations finish on a remote node, commit is
//! usually triggered by an inbound reply rather than by the worker itself:
//!
//! | event            | committed by                                        |
//! |------------------|-----------------------------------------------------|
//! | create (local)   | the worker, after instantiating the context          |
//! | create (remote)  | [`GlobalEventChannel::context_allocated`]            |
//! | migration        | the last [`GlobalEventChannel::context_migrated`]    |
//! | modify ownership | the worker, after every affected node acknowledged  |
//!
//! A migration holds the channel until
//! [`GlobalEventChannel::signal_migration_complete`] arrives. A commit that
//! races ahead of that signal is parked in a deferred set and applied when
//! the signal lands. Only one migration is in flight at a time, so a second
//! deferral of the same ticket is a violation. Nothing times out: a
//! migration that never signals stalls the channel.

use super::context::ContextTable;
use super::elasticity::Relocator;
use super::ownership::{OwnershipDelta, OwnershipTable, PlaceLocally, PlacementRule};
use super::pool::{Lane, Next, Phase, PoolShared, WorkerPool};
use crate::config::PoolBounds;
use crate::error::{Component, FailurePolicy, Result, Violation, fail_fast};
use crate::observability::RuntimeMetrics;
use crate::tracing_compat::{debug, info, trace, warn};
use crate::types::{Address, ContextName, GlobalTicket};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Kind of a global event, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GlobalEventTag {
    /// Context creation.
    CreateContext,
    /// Context migration.
    Migration,
    /// Parent/child ownership change.
    ModifyOwnership,
}

impl fmt::Display for GlobalEventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateContext => "create_context",
            Self::Migration => "migration",
            Self::ModifyOwnership => "modify_ownership",
        })
    }
}

/// Payload of a global event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalEventKind<A> {
    /// Create a context, optionally under a parent.
    CreateContext {
        /// Context to create.
        context: ContextName,
        /// Owning context, if any.
        parent: Option<ContextName>,
    },
    /// Move contexts to a destination node.
    Migration {
        /// Contexts to move.
        contexts: Vec<ContextName>,
        /// Destination node.
        destination: A,
    },
    /// Apply parent/child ownership deltas.
    ModifyOwnership {
        /// Deltas to apply.
        deltas: Vec<OwnershipDelta>,
        /// Node to notify once every affected node acknowledged.
        requester: Option<A>,
    },
}

impl<A> GlobalEventKind<A> {
    /// Returns the event tag.
    pub const fn tag(&self) -> GlobalEventTag {
        match self {
            Self::CreateContext { .. } => GlobalEventTag::CreateContext,
            Self::Migration { .. } => GlobalEventTag::Migration,
            Self::ModifyOwnership { .. } => GlobalEventTag::ModifyOwnership,
        }
    }

    fn contexts(&self) -> Vec<ContextName> {
        match self {
            Self::CreateContext { context, .. } => vec![context.clone()],
            Self::Migration { contexts, .. } => contexts.clone(),
            Self::ModifyOwnership { deltas, .. } => {
                let set: BTreeSet<_> = deltas
                    .iter()
                    .flat_map(|d| [d.parent.clone(), d.child.clone()])
                    .collect();
                set.into_iter().collect()
            }
        }
    }
}

/// A lifecycle event bound to a global ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalEvent<A> {
    /// Global ticket.
    pub ticket: GlobalTicket,
    /// Payload.
    pub kind: GlobalEventKind<A>,
}

/// Messages the channel sends to other nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadMessage<A> {
    /// Instantiate a context on the receiving node, then reply with
    /// `context_allocated`.
    AllocateContext {
        /// Creating ticket.
        ticket: GlobalTicket,
        /// Context to instantiate.
        context: ContextName,
        /// Owning context, if any.
        parent: Option<ContextName>,
    },
    /// Prepare to move contexts to `destination`.
    MigrationRequest {
        /// Migration ticket.
        ticket: GlobalTicket,
        /// Contexts being moved.
        contexts: Vec<ContextName>,
        /// Destination node.
        destination: A,
    },
    /// Every context of the migration has arrived.
    MigrationDone {
        /// Migration ticket.
        ticket: GlobalTicket,
        /// Contexts moved.
        contexts: Vec<ContextName>,
    },
    /// Apply ownership deltas, then reply with `acknowledge_ownership`.
    OwnershipUpdate {
        /// Modifying ticket.
        ticket: GlobalTicket,
        /// Deltas to apply.
        deltas: Vec<OwnershipDelta>,
    },
    /// Every affected node applied the ownership change.
    OwnershipReply {
        /// Modifying ticket.
        ticket: GlobalTicket,
    },
}

/// The "send to address" primitive.
///
/// Delivery, retries and failures belong to the implementation; the channel
/// never retries.
pub trait Messenger<A: Address>: Send + Sync + 'static {
    /// Sends `message` to `to`.
    fn send(&self, to: &A, message: HeadMessage<A>);
}

impl<A, F> Messenger<A> for F
where
    A: Address,
    F: Fn(&A, HeadMessage<A>) + Send + Sync + 'static,
{
    fn send(&self, to: &A, message: HeadMessage<A>) {
        self(to, message);
    }
}

/// Outcome of [`GlobalEventChannel::commit_global_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalCommit {
    /// `now_serving_ticket` advanced.
    Applied,
    /// Parked until the in-flight migration signals completion.
    Deferred,
}

/// A committed global event, as reported to commit listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedGlobal {
    /// Committed ticket.
    pub ticket: GlobalTicket,
    /// Event kind.
    pub tag: GlobalEventTag,
    /// Contexts the event touched.
    pub contexts: Vec<ContextName>,
}

type CommitListener = Arc<dyn Fn(&CommittedGlobal) + Send + Sync>;

struct Serving {
    ticket: GlobalTicket,
    tag: GlobalEventTag,
    contexts: Vec<ContextName>,
    started: Instant,
}

struct InFlightMigration<A> {
    ticket: GlobalTicket,
    contexts: Vec<ContextName>,
    awaiting: BTreeSet<ContextName>,
    origins: BTreeSet<A>,
    destination: A,
    finalized: bool,
    signalled: bool,
    done: Option<Sender<()>>,
}

struct PendingAcks<A> {
    ticket: GlobalTicket,
    awaiting: BTreeSet<A>,
    done: Option<Sender<()>>,
}

pub(crate) struct GlobalLane<A> {
    next_ticket: GlobalTicket,
    now_serving: GlobalTicket,
    queue: VecDeque<GlobalEvent<A>>,
    serving: Option<Serving>,
    migration: Option<InFlightMigration<A>>,
    deferred: BTreeSet<GlobalTicket>,
    acks: Option<PendingAcks<A>>,
    creating: HashMap<ContextName, GlobalTicket>,
    listeners: Vec<CommitListener>,
}

impl<A> GlobalLane<A> {
    fn issue(&mut self) -> GlobalTicket {
        let ticket = self.next_ticket;
        self.next_ticket = ticket.next();
        ticket
    }

    fn insert(&mut self, event: GlobalEvent<A>) {
        let pos = self.queue.partition_point(|e| e.ticket < event.ticket);
        self.queue.insert(pos, event);
    }
}

pub(crate) struct GlobalCtx<A: Address> {
    local: A,
    messenger: Arc<dyn Messenger<A>>,
    placement: Arc<dyn PlacementRule<A>>,
    contexts: Arc<ContextTable>,
    ownership: Arc<OwnershipTable<A>>,
    metrics: Arc<RuntimeMetrics>,
    policy: FailurePolicy,
    halt_rx: Receiver<()>,
}

type Shared<A> = PoolShared<GlobalLane<A>>;

impl<A: Address> Lane for GlobalLane<A> {
    type Job = GlobalEvent<A>;
    type Ctx = GlobalCtx<A>;

    fn poll(&mut self, ctx: &GlobalCtx<A>, phase: Phase) -> Next<GlobalEvent<A>> {
        if phase == Phase::Halted {
            return Next::Stop;
        }
        let Some(front) = self.queue.front() else {
            return if phase == Phase::Draining && self.serving.is_none() {
                Next::Stop
            } else {
                Next::Wait
            };
        };
        match front.ticket.cmp(&self.now_serving) {
            Ordering::Less => fail_fast(
                ctx.policy,
                Violation::GlobalQueueOrder {
                    front: front.ticket,
                    now_serving: self.now_serving,
                },
            ),
            Ordering::Greater if phase == Phase::Draining && self.serving.is_none() => Next::Stop,
            Ordering::Greater => Next::Wait,
            Ordering::Equal if self.serving.is_some() => Next::Wait,
            Ordering::Equal => {
                let Some(event) = self.queue.pop_front() else {
                    return Next::Wait;
                };
                self.serving = Some(Serving {
                    ticket: event.ticket,
                    tag: event.kind.tag(),
                    contexts: event.kind.contexts(),
                    started: Instant::now(),
                });
                Next::Run(event)
            }
        }
    }

    fn run(pool: &Shared<A>, event: GlobalEvent<A>) {
        let ticket = event.ticket;
        debug!(%ticket, tag = %event.kind.tag(), "dispatching global event");
        match event.kind {
            GlobalEventKind::CreateContext { context, parent } => {
                create_context(pool, ticket, context, parent);
            }
            GlobalEventKind::Migration {
                contexts,
                destination,
            } => migrate(pool, ticket, contexts, destination),
            GlobalEventKind::ModifyOwnership { deltas, requester } => {
                modify_ownership(pool, ticket, &deltas, requester);
            }
        }
    }
}

fn create_context<A: Address>(
    pool: &Shared<A>,
    ticket: GlobalTicket,
    context: ContextName,
    parent: Option<ContextName>,
) {
    let ctx = pool.ctx();
    let host = ctx
        .placement
        .place(&context, parent.as_ref(), &ctx.ownership, &ctx.local);
    ctx.ownership
        .record(context.clone(), host.clone(), parent.clone());
    if host == ctx.local {
        ctx.contexts.create(context.clone());
        pool.with_lane(|lane| lane.creating.remove(&context));
        info!(%ticket, %context, "context created locally");
        commit(pool, ticket);
    } else {
        debug!(%ticket, %context, ?host, "forwarding context allocation");
        ctx.messenger.send(
            &host,
            HeadMessage::AllocateContext {
                ticket,
                context,
                parent,
            },
        );
    }
}

fn migrate<A: Address>(
    pool: &Shared<A>,
    ticket: GlobalTicket,
    contexts: Vec<ContextName>,
    destination: A,
) {
    let ctx = pool.ctx();
    let origins: BTreeSet<A> = contexts
        .iter()
        .filter_map(|c| ctx.ownership.host_of(c))
        .filter(|host| *host != destination)
        .collect();
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    pool.with_lane(|lane| {
        lane.migration = Some(InFlightMigration {
            ticket,
            contexts: contexts.clone(),
            awaiting: contexts.iter().cloned().collect(),
            origins: origins.clone(),
            destination: destination.clone(),
            finalized: false,
            signalled: false,
            done: Some(done_tx),
        });
    });

    let request = HeadMessage::MigrationRequest {
        ticket,
        contexts: contexts.clone(),
        destination: destination.clone(),
    };
    ctx.messenger.send(&destination, request.clone());
    for origin in &origins {
        ctx.messenger.send(origin, request.clone());
    }
    info!(%ticket, contexts = contexts.len(), ?destination, "migration in flight");
    if contexts.is_empty() {
        finalize_migration(pool, ticket);
    }

    crossbeam_channel::select! {
        recv(done_rx) -> _ => {
            trace!(%ticket, "migration completion observed");
        }
        recv(ctx.halt_rx) -> _ => {
            warn!(%ticket, "channel halted with migration in flight");
        }
    }
}

fn finalize_migration<A: Address>(pool: &Shared<A>, ticket: GlobalTicket) {
    let ctx = pool.ctx();
    let taken = pool.with_lane(|lane| match &mut lane.migration {
        Some(m) if m.ticket == ticket && !m.finalized => {
            m.finalized = true;
            Some((m.contexts.clone(), m.origins.clone(), m.destination.clone()))
        }
        _ => None,
    });
    let Some((contexts, origins, destination)) = taken else {
        return;
    };

    for context in &contexts {
        ctx.ownership.set_host(context, destination.clone());
        if destination == ctx.local {
            ctx.contexts.create(context.clone());
        } else {
            ctx.contexts.remove(context);
        }
    }
    let done = HeadMessage::MigrationDone {
        ticket,
        contexts,
    };
    ctx.messenger.send(&destination, done.clone());
    for origin in &origins {
        ctx.messenger.send(origin, done.clone());
    }
    commit(pool, ticket);
}

fn modify_ownership<A: Address>(
    pool: &Shared<A>,
    ticket: GlobalTicket,
    deltas: &[OwnershipDelta],
    requester: Option<A>,
) {
    let ctx = pool.ctx();
    let affected: BTreeSet<A> = ctx
        .ownership
        .apply(deltas)
        .into_iter()
        .filter(|node| *node != ctx.local)
        .collect();

    if !affected.is_empty() {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        pool.with_lane(|lane| {
            lane.acks = Some(PendingAcks {
                ticket,
                awaiting: affected.clone(),
                done: Some(done_tx),
            });
        });
        for node in &affected {
            ctx.messenger.send(
                node,
                HeadMessage::OwnershipUpdate {
                    ticket,
                    deltas: deltas.to_vec(),
                },
            );
        }
        debug!(%ticket, nodes = affected.len(), "awaiting ownership acknowledgements");
        crossbeam_channel::select! {
            recv(done_rx) -> _ => {}
            recv(ctx.halt_rx) -> _ => {
                warn!(%ticket, "channel halted awaiting ownership acknowledgements");
                return;
            }
        }
    }

    if let Some(requester) = requester {
        ctx.messenger
            .send(&requester, HeadMessage::OwnershipReply { ticket });
    }
    commit(pool, ticket);
}

fn commit<A: Address>(pool: &Shared<A>, ticket: GlobalTicket) -> GlobalCommit {
    let ctx = pool.ctx();
    let mut state = pool.lock();
    let lane = &mut state.lane;
    let serving_matches = lane.serving.as_ref().is_some_and(|s| s.ticket == ticket);
    if ticket != lane.now_serving || !serving_matches {
        fail_fast(
            ctx.policy,
            Violation::GlobalTicketMismatch {
                ticket,
                now_serving: lane.now_serving,
            },
        );
    }
    if let Some(m) = &lane.migration {
        if m.ticket == ticket && !m.signalled {
            if !lane.deferred.insert(ticket) {
                fail_fast(ctx.policy, Violation::DuplicateDeferredCommit(ticket));
            }
            drop(state);
            ctx.metrics.on_global_deferred();
            debug!(%ticket, "global commit deferred behind migration signal");
            return GlobalCommit::Deferred;
        }
    }

    lane.now_serving = ticket.next();
    lane.deferred.remove(&ticket);
    if lane.migration.as_ref().is_some_and(|m| m.ticket == ticket) {
        lane.migration = None;
    }
    let serving = lane.serving.take();
    let listeners = lane.listeners.clone();
    drop(state);
    pool.wake_all();

    ctx.metrics.on_global_committed();
    let Some(serving) = serving else {
        return GlobalCommit::Applied;
    };
    ctx.metrics
        .global_events()
        .record(serving.tag, serving.started.elapsed());
    info!(%ticket, tag = %serving.tag, "global event committed");
    let committed = CommittedGlobal {
        ticket,
        tag: serving.tag,
        contexts: serving.contexts,
    };
    for listener in listeners {
        listener(&committed);
    }
    GlobalCommit::Applied
}

/// Builder for [`GlobalEventChannel`].
pub struct GlobalChannelBuilder<A: Address> {
    local: A,
    messenger: Arc<dyn Messenger<A>>,
    placement: Arc<dyn PlacementRule<A>>,
    contexts: Arc<ContextTable>,
    ownership: Arc<OwnershipTable<A>>,
    metrics: Arc<RuntimeMetrics>,
    policy: FailurePolicy,
    bounds: PoolBounds,
    keep_alive: Duration,
}

impl<A: Address> GlobalChannelBuilder<A> {
    /// Sets the placement rule for new contexts.
    #[must_use]
    pub fn placement(mut self, rule: Arc<dyn PlacementRule<A>>) -> Self {
        self.placement = rule;
        self
    }

    /// Shares a context table with the dispatcher.
    #[must_use]
    pub fn contexts(mut self, contexts: Arc<ContextTable>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Shares an ownership table.
    #[must_use]
    pub fn ownership(mut self, ownership: Arc<OwnershipTable<A>>) -> Self {
        self.ownership = ownership;
        self
    }

    /// Shares runtime metrics.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the violation policy.
    #[must_use]
    pub const fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the worker bounds.
    #[must_use]
    pub const fn bounds(mut self, bounds: PoolBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Sets the surplus-worker keep-alive.
    #[must_use]
    pub const fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Starts the channel workers.
    pub fn start(self) -> Result<GlobalEventChannel<A>> {
        let (halt_tx, halt_rx) = crossbeam_channel::bounded(0);
        let pool = WorkerPool::start(
            "global",
            Component::GlobalChannel,
            self.bounds,
            self.keep_alive,
            GlobalLane {
                next_ticket: GlobalTicket::FIRST,
                now_serving: GlobalTicket::FIRST,
                queue: VecDeque::new(),
                serving: None,
                migration: None,
                deferred: BTreeSet::new(),
                acks: None,
                creating: HashMap::new(),
                listeners: Vec::new(),
            },
            GlobalCtx {
                local: self.local,
                messenger: self.messenger,
                placement: self.placement,
                contexts: self.contexts,
                ownership: self.ownership,
                metrics: self.metrics,
                policy: self.policy,
                halt_rx,
            },
        )?;
        Ok(GlobalEventChannel {
            pool,
            halt_tx: Mutex::new(Some(halt_tx)),
        })
    }
}

/// Ticket-ordered channel for context lifecycle operations.
pub struct GlobalEventChannel<A: Address> {
    pool: WorkerPool<GlobalLane<A>>,
    halt_tx: Mutex<Option<Sender<()>>>,
}

impl<A: Address> fmt::Debug for GlobalEventChannel<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalEventChannel")
            .field("now_serving", &self.now_serving_ticket())
            .field("queued", &self.queued())
            .field("migration", &self.migration_in_flight())
            .finish_non_exhaustive()
    }
}

impl<A: Address> GlobalEventChannel<A> {
    /// Starts building a channel for the node at `local`.
    pub fn builder(local: A, messenger: Arc<dyn Messenger<A>>) -> GlobalChannelBuilder<A> {
        GlobalChannelBuilder {
            local,
            messenger,
            placement: Arc::new(PlaceLocally),
            contexts: Arc::new(ContextTable::new()),
            ownership: Arc::new(OwnershipTable::new()),
            metrics: Arc::new(RuntimeMetrics::default()),
            policy: FailurePolicy::Abort,
            bounds: PoolBounds::fixed(1),
            keep_alive: Duration::from_secs(1),
        }
    }

    fn shared(&self) -> &Shared<A> {
        self.pool.shared()
    }

    /// Issues a global ticket without enqueueing anything.
    pub fn issue_ticket(&self) -> GlobalTicket {
        self.shared().with_lane(GlobalLane::issue)
    }

    /// Appends an event whose ticket was issued by this channel.
    pub fn enqueue_global_event(&self, event: GlobalEvent<A>) -> Result<()> {
        let policy = self.shared().ctx().policy;
        self.pool.submit(|lane| {
            if event.ticket < lane.now_serving {
                fail_fast(
                    policy,
                    Violation::GlobalQueueOrder {
                        front: event.ticket,
                        now_serving: lane.now_serving,
                    },
                );
            }
            trace!(ticket = %event.ticket, tag = %event.kind.tag(), "global event enqueued");
            lane.insert(event);
        })
    }

    /// Creates a context unless it exists or is already being created.
    ///
    /// Returns the creating ticket, or `None` for a duplicate.
    pub fn create_context(
        &self,
        context: impl Into<ContextName>,
        parent: Option<ContextName>,
    ) -> Result<Option<GlobalTicket>> {
        let context = context.into();
        let ctx = self.shared().ctx();
        self.pool.submit(|lane| {
            if lane.creating.contains_key(&context)
                || ctx.contexts.contains(&context)
                || ctx.ownership.host_of(&context).is_some()
            {
                debug!(%context, "context exists or is being created");
                return None;
            }
            let ticket = lane.issue();
            lane.creating.insert(context.clone(), ticket);
            lane.insert(GlobalEvent {
                ticket,
                kind: GlobalEventKind::CreateContext { context, parent },
            });
            Some(ticket)
        })
    }

    /// Migrates contexts to `destination`.
    pub fn migrate_context(
        &self,
        contexts: Vec<ContextName>,
        destination: A,
    ) -> Result<GlobalTicket> {
        self.issue_and_enqueue(GlobalEventKind::Migration {
            contexts,
            destination,
        })
    }

    /// Applies ownership deltas across every affected node.
    pub fn modify_ownership(
        &self,
        deltas: Vec<OwnershipDelta>,
        requester: Option<A>,
    ) -> Result<GlobalTicket> {
        self.issue_and_enqueue(GlobalEventKind::ModifyOwnership { deltas, requester })
    }

    fn issue_and_enqueue(&self, kind: GlobalEventKind<A>) -> Result<GlobalTicket> {
        self.pool.submit(|lane| {
            let ticket = lane.issue();
            lane.insert(GlobalEvent { ticket, kind });
            ticket
        })
    }

    /// Commits the event being served.
    ///
    /// `ticket` must equal `now_serving_ticket`. While the event's migration
    /// has not signalled completion the commit is deferred.
    pub fn commit_global_event(&self, ticket: GlobalTicket) -> GlobalCommit {
        commit(self.shared(), ticket)
    }

    /// Reports that a remote node instantiated a context.
    pub fn context_allocated(&self, ticket: GlobalTicket, context: &ContextName) {
        self.shared().with_lane(|lane| lane.creating.remove(context));
        debug!(%ticket, %context, "remote context allocated");
        commit(self.shared(), ticket);
    }

    /// Reports that one context of the in-flight migration arrived.
    ///
    /// Returns `true` if it was the last outstanding context.
    pub fn context_migrated(&self, context: &ContextName) -> bool {
        let last = self.shared().with_lane(|lane| {
            let m = lane.migration.as_mut()?;
            if !m.awaiting.remove(context) {
                return None;
            }
            m.awaiting.is_empty().then_some(m.ticket)
        });
        match last {
            Some(ticket) => {
                finalize_migration(self.shared(), ticket);
                true
            }
            None => false,
        }
    }

    /// Signals that the in-flight migration may complete.
    ///
    /// Releases the dispatching worker and applies a deferred commit.
    pub fn signal_migration_complete(&self, ticket: GlobalTicket) {
        let shared = self.shared();
        let (done, release) = {
            let mut state = shared.lock();
            let lane = &mut state.lane;
            match &mut lane.migration {
                Some(m) if m.ticket == ticket => {
                    m.signalled = true;
                    (m.done.take(), lane.deferred.contains(&ticket))
                }
                other => {
                    let in_flight = other.as_ref().map(|m| m.ticket);
                    drop(state);
                    fail_fast(
                        shared.ctx().policy,
                        Violation::MigrationSignalMismatch {
                            signalled: ticket,
                            in_flight,
                        },
                    );
                }
            }
        };
        info!(%ticket, "migration completion signalled");
        if let Some(done) = done {
            let _ = done.send(());
        }
        if release {
            commit(shared, ticket);
        }
    }

    /// Records an ownership acknowledgement from `from`.
    pub fn acknowledge_ownership(&self, ticket: GlobalTicket, from: &A) {
        let done = self.shared().with_lane(|lane| {
            let pending = lane.acks.as_mut().filter(|p| p.ticket == ticket)?;
            pending.awaiting.remove(from);
            if !pending.awaiting.is_empty() {
                return None;
            }
            lane.acks.take().and_then(|mut p| p.done.take())
        });
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// Registers a listener run after every applied commit.
    pub fn on_commit<F>(&self, listener: F)
    where
        F: Fn(&CommittedGlobal) + Send + Sync + 'static,
    {
        self.shared()
            .with_lane(|lane| lane.listeners.push(Arc::new(listener)));
    }

    /// Returns the ticket currently being served.
    #[must_use]
    pub fn now_serving_ticket(&self) -> GlobalTicket {
        self.shared().with_lane(|lane| lane.now_serving)
    }

    /// Returns the next ticket to be issued.
    #[must_use]
    pub fn next_ticket(&self) -> GlobalTicket {
        self.shared().with_lane(|lane| lane.next_ticket)
    }

    /// Returns the number of queued events.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared().with_lane(|lane| lane.queue.len())
    }

    /// Returns the in-flight migration ticket.
    #[must_use]
    pub fn migration_in_flight(&self) -> Option<GlobalTicket> {
        self.shared()
            .with_lane(|lane| lane.migration.as_ref().map(|m| m.ticket))
    }

    /// Returns the number of deferred commits.
    #[must_use]
    pub fn deferred_commits(&self) -> usize {
        self.shared().with_lane(|lane| lane.deferred.len())
    }

    /// Returns the ownership table.
    #[must_use]
    pub fn ownership(&self) -> &Arc<OwnershipTable<A>> {
        &self.shared().ctx().ownership
    }

    /// Returns the local context table.
    #[must_use]
    pub fn contexts(&self) -> &Arc<ContextTable> {
        &self.shared().ctx().contexts
    }

    /// Drains runnable events, then joins the workers.
    pub fn halt_and_wait(&self) {
        self.pool.drain_and_join();
    }

    /// Abandons queued events, releases blocked workers and joins them.
    pub fn halt_and_no_wait(&self) {
        self.pool.halt();
        self.halt_tx.lock().take();
        self.pool.join();
    }
}

impl<A: Address> Relocator<A> for GlobalEventChannel<A> {
    fn host_of(&self, context: &ContextName) -> Option<A> {
        self.ownership().host_of(context)
    }

    fn relocate(&self, contexts: Vec<ContextName>, destination: A) -> Result<GlobalTicket> {
        self.migrate_context(contexts, destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(u16, HeadMessage<u16>)>>);

    impl Messenger<u16> for Outbox {
        fn send(&self, to: &u16, message: HeadMessage<u16>) {
            self.0.lock().push((*to, message));
        }
    }

    impl Outbox {
        fn sent(&self) -> Vec<(u16, HeadMessage<u16>)> {
            self.0.lock().clone()
        }
    }

    struct PlaceOn(u16);

    impl PlacementRule<u16> for PlaceOn {
        fn place(&self, _: &ContextName, _: Option<&ContextName>, _: &OwnershipTable<u16>, _: &u16) -> u16 {
            self.0
        }
    }

    const LOCAL: u16 = 0;

    fn channel(placement: Arc<dyn PlacementRule<u16>>) -> (GlobalEventChannel<u16>, Arc<Outbox>) {
        let outbox = Arc::new(Outbox::default());
        let channel = GlobalEventChannel::builder(LOCAL, Arc::clone(&outbox) as Arc<dyn Messenger<u16>>)
            .placement(placement)
            .failure_policy(FailurePolicy::Panic)
            .start()
            .expect("start");
        (channel, outbox)
    }

    fn wait_until(mut f: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn name(s: &str) -> ContextName {
        ContextName::new(s)
    }

    #[test]
    fn local_create_commits_and_dedups() {
        init_test("local_create_commits_and_dedups");
        let (channel, _outbox) = channel(Arc::new(PlaceLocally));
        let ticket = channel.create_context("Room[1]", None).expect("submit");
        assert_eq!(ticket, Some(GlobalTicket::FIRST));
        wait_until(|| channel.now_serving_ticket() == GlobalTicket::new(2));
        assert!(channel.contexts().contains(&name("Room[1]")));
        assert_eq!(channel.ownership().host_of(&name("Room[1]")), Some(LOCAL));

        let dup = channel.create_context("Room[1]", None).expect("submit");
        crate::assert_with_log!(dup.is_none(), "duplicate create", "None", dup);
        channel.halt_and_wait();
        crate::test_complete!("local_create_commits_and_dedups");
    }

    #[test]
    fn remote_create_waits_for_allocation() {
        init_test("remote_create_waits_for_allocation");
        let (channel, outbox) = channel(Arc::new(PlaceOn(5)));
        let ticket = channel
            .create_context("Room[2]", Some(name("Lobby")))
            .expect("submit")
            .expect("fresh");
        assert!(channel.create_context("Room[2]", None).expect("submit").is_none());
        wait_until(|| !outbox.sent().is_empty());
        assert_eq!(
            outbox.sent()[0],
            (
                5,
                HeadMessage::AllocateContext {
                    ticket,
                    context: name("Room[2]"),
                    parent: Some(name("Lobby")),
                }
            )
        );
        assert_eq!(channel.now_serving_ticket(), ticket);

        channel.context_allocated(ticket, &name("Room[2]"));
        assert_eq!(channel.now_serving_ticket(), ticket.next());
        assert!(!channel.contexts().contains(&name("Room[2]")));
        channel.halt_and_wait();
        crate::test_complete!("remote_create_waits_for_allocation");
    }

    #[test]
    fn out_of_order_global_commit_is_rejected() {
        init_test("out_of_order_global_commit_is_rejected");
        let (channel, outbox) = channel(Arc::new(PlaceOn(5)));
        let t1 = channel.create_context("a", None).expect("submit").expect("fresh");
        let t2 = channel.migrate_context(vec![name("a")], 7).expect("submit");
        wait_until(|| !outbox.sent().is_empty());

        let err = catch_unwind(AssertUnwindSafe(|| channel.commit_global_event(t2)))
            .expect_err("violation");
        let violation = err.downcast::<Violation>().expect("payload");
        assert_eq!(
            *violation,
            Violation::GlobalTicketMismatch {
                ticket: t2,
                now_serving: t1,
            }
        );
        assert_eq!(channel.now_serving_ticket(), t1);
        channel.halt_and_no_wait();
        crate::test_complete!("out_of_order_global_commit_is_rejected");
    }

    #[test]
    fn migration_commit_is_deferred_until_signalled() {
        init_test("migration_commit_is_deferred_until_signalled");
        let (channel, outbox) = channel(Arc::new(PlaceLocally));
        channel.ownership().record(name("a"), 1, None);
        channel.ownership().record(name("b"), 1, None);
        let ticket = channel
            .migrate_context(vec![name("a"), name("b")], 2)
            .expect("submit");
        wait_until(|| channel.migration_in_flight() == Some(ticket));
        wait_until(|| outbox.sent().len() == 2);

        assert!(!channel.context_migrated(&name("elsewhere")));
        assert!(!channel.context_migrated(&name("a")));
        assert!(!channel.context_migrated(&name("a")));
        assert!(channel.context_migrated(&name("b")));
        crate::assert_with_log!(
            channel.deferred_commits() == 1,
            "deferred commits",
            1,
            channel.deferred_commits()
        );
        assert_eq!(channel.now_serving_ticket(), ticket);
        let done: Vec<u16> = outbox
            .sent()
            .into_iter()
            .filter(|(_, m)| matches!(m, HeadMessage::MigrationDone { .. }))
            .map(|(to, _)| to)
            .collect();
        assert_eq!(done, vec![2, 1]);

        channel.signal_migration_complete(ticket);
        assert_eq!(channel.now_serving_ticket(), ticket.next());
        assert_eq!(channel.deferred_commits(), 0);
        assert_eq!(channel.migration_in_flight(), None);
        assert_eq!(channel.ownership().host_of(&name("a")), Some(2));
        channel.halt_and_wait();
        crate::test_complete!("migration_commit_is_deferred_until_signalled");
    }

    #[test]
    fn unsignalled_migration_holds_the_channel() {
        init_test("unsignalled_migration_holds_the_channel");
        let (channel, _outbox) = channel(Arc::new(PlaceLocally));
        let migration = channel.migrate_context(vec![name("a")], 3).expect("submit");
        let create = channel.create_context("b", None).expect("submit");
        assert!(create.is_some());
        wait_until(|| channel.migration_in_flight() == Some(migration));
        channel.context_migrated(&name("a"));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(channel.now_serving_ticket(), migration);
        assert_eq!(channel.queued(), 1);
        assert!(!channel.contexts().contains(&name("b")));
        channel.halt_and_no_wait();
        assert_eq!(channel.now_serving_ticket(), migration);
        crate::test_complete!("unsignalled_migration_holds_the_channel");
    }

    #[test]
    fn early_signal_lets_last_context_commit_directly() {
        init_test("early_signal_lets_last_context_commit_directly");
        let (channel, _outbox) = channel(Arc::new(PlaceLocally));
        let ticket = channel.migrate_context(vec![name("a")], LOCAL).expect("submit");
        wait_until(|| channel.migration_in_flight() == Some(ticket));
        channel.signal_migration_complete(ticket);
        assert_eq!(channel.now_serving_ticket(), ticket);
        assert!(channel.context_migrated(&name("a")));
        assert_eq!(channel.now_serving_ticket(), ticket.next());
        assert!(channel.contexts().contains(&name("a")));
        channel.halt_and_wait();
        crate::test_complete!("early_signal_lets_last_context_commit_directly");
    }

    #[test]
    fn ownership_change_waits_for_every_ack() {
        init_test("ownership_change_waits_for_every_ack");
        let (channel, outbox) = channel(Arc::new(PlaceLocally));
        channel.ownership().record(name("a"), 1, None);
        channel.ownership().record(name("b"), 2, None);
        let committed = Arc::new(Mutex::new(Vec::new()));
        {
            let committed = Arc::clone(&committed);
            channel.on_commit(move |c| committed.lock().push(c.clone()));
        }

        let ticket = channel
            .modify_ownership(vec![OwnershipDelta::add("a", "b")], Some(9))
            .expect("submit");
        wait_until(|| outbox.sent().len() == 2);
        channel.acknowledge_ownership(ticket, &1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.now_serving_ticket(), ticket);

        channel.acknowledge_ownership(ticket, &2);
        wait_until(|| channel.now_serving_ticket() == ticket.next());
        let sent = outbox.sent();
        assert_eq!(sent.last(), Some(&(9, HeadMessage::OwnershipReply { ticket })));
        let committed = committed.lock().clone();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].tag, GlobalEventTag::ModifyOwnership);
        assert_eq!(committed[0].contexts, vec![name("a"), name("b")]);
        assert_eq!(channel.ownership().children_of(&name("a")), vec![name("b")]);
        channel.halt_and_wait();
        crate::test_complete!("ownership_change_waits_for_every_ack");
    }

    #[test]
    fn signal_for_wrong_migration_is_rejected() {
        init_test("signal_for_wrong_migration_is_rejected");
        let (channel, _outbox) = channel(Arc::new(PlaceLocally));
        let err = catch_unwind(AssertUnwindSafe(|| {
            channel.signal_migration_complete(GlobalTicket::new(4));
        }))
        .expect_err("violation");
        let violation = err.downcast::<Violation>().expect("payload");
        assert_eq!(
            *violation,
            Violation::MigrationSignalMismatch {
                signalled: GlobalTicket::new(4),
                in_flight: None,
            }
        );
        channel.halt_and_wait();
        crate::test_complete!("signal_for_wrong_migration_is_rejected");
    }
}
