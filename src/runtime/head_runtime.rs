//! One node's runtime, wired from a [`RuntimeConfig`].
//!
//! [`HeadRuntime`] owns the head-domain ticket authority, the local context
//! table, the dispatcher and its commit pipeline, the global lifecycle
//! channel, the elasticity channel and the async pool. Migrations committed
//! on the global channel release their contexts from the elasticity
//! channel's relocating set.
//!
//! # Shutdown
//!
//! ```text
//! prepare_halt(t)          record terminal ticket, return immediately
//! halt_and_wait()          drain and join dispatcher, channels, async pool
//! halt_and_wait_commit()   commit what can commit, join commit thread
//! halt_and_no_wait_commit()  abandon parked commits, join commit thread
//! ```

use super::async_pool::AsyncPool;
use super::commit::CommitPipeline;
use super::context::ContextTable;
use super::elasticity::{ElasticityChannel, Relocator, Submission};
use super::event::Event;
use super::global::{GlobalEventChannel, GlobalEventTag, Messenger};
use super::head::HeadDispatcher;
use super::ownership::{PlaceLocally, PlacementRule};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::observability::RuntimeMetrics;
use crate::sync::TicketAuthority;
use crate::tracing_compat::info;
use crate::types::{Address, ContextName, DomainId, GlobalTicket, OrderId};
use smallvec::SmallVec;
use std::sync::{Arc, Weak};

/// Builder for [`HeadRuntime`].
pub struct HeadRuntimeBuilder<A: Address> {
    local: A,
    messenger: Arc<dyn Messenger<A>>,
    placement: Arc<dyn PlacementRule<A>>,
    config: RuntimeConfig,
}

impl<A: Address> HeadRuntimeBuilder<A> {
    /// Replaces the default configuration.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the placement rule for new contexts.
    #[must_use]
    pub fn placement(mut self, rule: Arc<dyn PlacementRule<A>>) -> Self {
        self.placement = rule;
        self
    }

    /// Validates the configuration and starts every component.
    pub fn start(self) -> Result<HeadRuntime<A>> {
        let config = self.config;
        config.validate()?;
        let keep_alive = config.keep_alive();
        let metrics = Arc::new(RuntimeMetrics::new(config.sample_latency));
        let authority = Arc::new(TicketAuthority::with_policy(
            DomainId::HEAD,
            config.failure_policy,
        ));
        let contexts = Arc::new(ContextTable::new());

        let pipeline = Arc::new(CommitPipeline::start(
            Arc::clone(&authority),
            Arc::clone(&metrics),
        )?);
        let dispatcher = HeadDispatcher::start(
            Arc::clone(&authority),
            Arc::clone(&contexts),
            Arc::clone(&pipeline),
            Arc::clone(&metrics),
            config.head,
            keep_alive,
        )?;
        let global = Arc::new(
            GlobalEventChannel::builder(self.local, self.messenger)
                .placement(self.placement)
                .contexts(Arc::clone(&contexts))
                .metrics(Arc::clone(&metrics))
                .failure_policy(config.failure_policy)
                .bounds(config.global)
                .keep_alive(keep_alive)
                .start()?,
        );
        let elasticity = Arc::new(ElasticityChannel::start(
            Arc::clone(&global) as Arc<dyn Relocator<A>>,
            Arc::clone(&metrics),
            config.elasticity,
            keep_alive,
        )?);
        let weak: Weak<ElasticityChannel<A>> = Arc::downgrade(&elasticity);
        global.on_commit(move |committed| {
            if committed.tag != GlobalEventTag::Migration {
                return;
            }
            if let Some(elasticity) = weak.upgrade() {
                for context in &committed.contexts {
                    elasticity.relocation_finished(context);
                }
            }
        });
        let async_pool = AsyncPool::start(config.async_pool, keep_alive, Arc::clone(&metrics))?;

        info!(
            head = config.head.max,
            global = config.global.max,
            elasticity = config.elasticity.max,
            async_pool = config.async_pool.max,
            "head runtime started"
        );
        Ok(HeadRuntime {
            config,
            authority,
            contexts,
            metrics,
            pipeline,
            dispatcher,
            global,
            elasticity,
            async_pool,
        })
    }
}

/// Every ordering component of one node.
pub struct HeadRuntime<A: Address> {
    config: RuntimeConfig,
    authority: Arc<TicketAuthority>,
    contexts: Arc<ContextTable>,
    metrics: Arc<RuntimeMetrics>,
    pipeline: Arc<CommitPipeline>,
    dispatcher: HeadDispatcher,
    global: Arc<GlobalEventChannel<A>>,
    elasticity: Arc<ElasticityChannel<A>>,
    async_pool: AsyncPool,
}

impl<A: Address> std::fmt::Debug for HeadRuntime<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadRuntime")
            .field("authority", &self.authority.snapshot())
            .field("dispatcher", &self.dispatcher)
            .field("pipeline", &self.pipeline)
            .field("global", &self.global)
            .finish_non_exhaustive()
    }
}

impl<A: Address> HeadRuntime<A> {
    /// Starts building a runtime for the node at `local`.
    pub fn builder(local: A, messenger: Arc<dyn Messenger<A>>) -> HeadRuntimeBuilder<A> {
        HeadRuntimeBuilder {
            local,
            messenger,
            placement: Arc::new(PlaceLocally),
            config: RuntimeConfig::default(),
        }
    }

    /// Issues the next head-domain ticket.
    pub fn issue(&self) -> OrderId {
        self.authority.issue()
    }

    /// Issues `count` consecutive head-domain tickets.
    pub fn issue_many(&self, count: usize) -> SmallVec<[OrderId; 8]> {
        self.authority.issue_many(count)
    }

    /// Queues an event on the dispatcher.
    pub fn submit(&self, event: Event) -> Result<()> {
        self.dispatcher.enqueue(event)
    }

    /// Creates a context through the global channel.
    pub fn create_context(
        &self,
        context: impl Into<ContextName>,
        parent: Option<ContextName>,
    ) -> Result<Option<GlobalTicket>> {
        self.global.create_context(context, parent)
    }

    /// Suggests colocating `sources` with `destination`.
    pub fn request_colocation(
        &self,
        destination: impl Into<ContextName>,
        sources: Vec<ContextName>,
    ) -> Result<Submission> {
        self.elasticity.request_colocation(destination, sources)
    }

    /// Queues an unordered callback.
    pub fn spawn_async<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.async_pool.enqueue(callback)
    }

    /// Returns the effective configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the head-domain ticket authority.
    #[must_use]
    pub const fn authority(&self) -> &Arc<TicketAuthority> {
        &self.authority
    }

    /// Returns the local context table.
    #[must_use]
    pub const fn contexts(&self) -> &Arc<ContextTable> {
        &self.contexts
    }

    /// Returns the shared metrics.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.metrics
    }

    /// Returns the commit pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Arc<CommitPipeline> {
        &self.pipeline
    }

    /// Returns the dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &HeadDispatcher {
        &self.dispatcher
    }

    /// Returns the global lifecycle channel.
    #[must_use]
    pub const fn global(&self) -> &Arc<GlobalEventChannel<A>> {
        &self.global
    }

    /// Returns the elasticity channel.
    #[must_use]
    pub const fn elasticity(&self) -> &Arc<ElasticityChannel<A>> {
        &self.elasticity
    }

    /// Returns the async pool.
    #[must_use]
    pub const fn async_pool(&self) -> &AsyncPool {
        &self.async_pool
    }

    /// Records the terminal ticket. Does not block.
    pub fn prepare_halt(&self, terminal: OrderId) {
        self.dispatcher.prepare_halt(terminal);
    }

    /// Drains and joins the dispatcher, both channels and the async pool.
    ///
    /// Blocks while a global migration awaits its completion signal.
    pub fn halt_and_wait(&self) {
        self.dispatcher.halt_and_wait();
        self.elasticity.halt_and_wait();
        self.global.halt_and_wait();
        self.async_pool.halt_and_wait();
        info!("head runtime halted");
    }

    /// Commits every committable parked event, then joins the commit thread.
    pub fn halt_and_wait_commit(&self) {
        self.pipeline.halt_and_wait_commit();
    }

    /// Abandons parked commits and joins the commit thread.
    pub fn halt_and_no_wait_commit(&self) {
        self.pipeline.halt_and_no_wait_commit();
    }

    /// Abandons queued work everywhere and joins every thread.
    pub fn halt_and_no_wait(&self) {
        self.dispatcher.halt_and_no_wait();
        self.elasticity.halt_and_no_wait();
        self.global.halt_and_no_wait();
        self.async_pool.halt_and_no_wait();
        self.pipeline.halt_and_no_wait_commit();
    }
}
