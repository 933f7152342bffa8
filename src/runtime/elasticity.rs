//! Best-effort relocation suggestions.
//!
//! A colocation request asks that a set of source contexts be moved next to
//! a destination context. Requests touching a context that is already being
//! relocated are dropped at submission, never queued. Accepted sources stay
//! in the relocating set until [`ElasticityChannel::relocation_finished`]
//! releases them, normally from a global-channel commit listener.
//!
//! Nothing here is fatal: a failed relocation is logged and counted.

use super::pool::{Lane, Next, Phase, PoolShared, WorkerPool};
use crate::config::PoolBounds;
use crate::error::{Component, Result};
use crate::observability::RuntimeMetrics;
use crate::tracing_compat::{debug, info, warn};
use crate::types::{Address, ContextName, GlobalTicket};
use std::collections::{BTreeSet, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Moves contexts between nodes.
pub trait Relocator<A: Address>: Send + Sync + 'static {
    /// Returns the node hosting `context`.
    fn host_of(&self, context: &ContextName) -> Option<A>;

    /// Starts moving `contexts` to `destination`.
    fn relocate(&self, contexts: Vec<ContextName>, destination: A) -> Result<GlobalTicket>;
}

/// A suggestion to colocate `sources` with `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticityRequest {
    /// Context to move next to.
    pub destination: ContextName,
    /// Contexts to move.
    pub sources: Vec<ContextName>,
}

impl ElasticityRequest {
    fn overlaps(&self, relocating: &BTreeSet<ContextName>) -> bool {
        relocating.contains(&self.destination) || self.sources.iter().any(|s| relocating.contains(s))
    }
}

/// Outcome of [`ElasticityChannel::request_colocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Queued for the worker.
    Submitted,
    /// Overlaps an in-flight relocation; discarded.
    Dropped,
}

pub(crate) struct ElasticityLane<A> {
    queue: VecDeque<ElasticityRequest>,
    relocating: BTreeSet<ContextName>,
    _addr: PhantomData<fn() -> A>,
}

pub(crate) struct ElasticityCtx<A: Address> {
    relocator: Arc<dyn Relocator<A>>,
    metrics: Arc<RuntimeMetrics>,
}

impl<A: Address> Lane for ElasticityLane<A> {
    type Job = ElasticityRequest;
    type Ctx = ElasticityCtx<A>;

    fn poll(&mut self, _: &ElasticityCtx<A>, phase: Phase) -> Next<ElasticityRequest> {
        match (phase, self.queue.pop_front()) {
            (Phase::Halted, _) | (Phase::Draining, None) => Next::Stop,
            (_, Some(request)) => Next::Run(request),
            (Phase::Running, None) => Next::Wait,
        }
    }

    fn run(pool: &PoolShared<Self>, request: ElasticityRequest) {
        let ctx = pool.ctx();
        let Some(host) = ctx.relocator.host_of(&request.destination) else {
            warn!(destination = %request.destination, "colocation destination has no known host");
            ctx.metrics.on_relocation_failed();
            release(pool, &request.sources);
            return;
        };

        for source in request.sources {
            if ctx.relocator.host_of(&source).as_ref() == Some(&host) {
                debug!(%source, ?host, "context already colocated");
                release(pool, std::slice::from_ref(&source));
                continue;
            }
            match ctx.relocator.relocate(vec![source.clone()], host.clone()) {
                Ok(ticket) => {
                    info!(%source, ?host, %ticket, "relocation submitted");
                }
                Err(err) => {
                    warn!(%source, ?host, %err, "relocation failed");
                    ctx.metrics.on_relocation_failed();
                    release(pool, std::slice::from_ref(&source));
                }
            }
        }
    }
}

fn release<A: Address>(pool: &PoolShared<ElasticityLane<A>>, contexts: &[ContextName]) {
    pool.with_lane(|lane| {
        for context in contexts {
            lane.relocating.remove(context);
        }
    });
}

/// Queue of colocation suggestions drained by a small worker pool.
pub struct ElasticityChannel<A: Address> {
    pool: WorkerPool<ElasticityLane<A>>,
}

impl<A: Address> std::fmt::Debug for ElasticityChannel<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticityChannel")
            .field("relocating", &self.relocating().len())
            .finish_non_exhaustive()
    }
}

impl<A: Address> ElasticityChannel<A> {
    /// Starts the channel workers.
    pub fn start(
        relocator: Arc<dyn Relocator<A>>,
        metrics: Arc<RuntimeMetrics>,
        bounds: PoolBounds,
        keep_alive: Duration,
    ) -> Result<Self> {
        let pool = WorkerPool::start(
            "elasticity",
            Component::Elasticity,
            bounds,
            keep_alive,
            ElasticityLane {
                queue: VecDeque::new(),
                relocating: BTreeSet::new(),
                _addr: PhantomData,
            },
            ElasticityCtx { relocator, metrics },
        )?;
        Ok(Self { pool })
    }

    /// Suggests moving `sources` next to `destination`.
    pub fn request_colocation(
        &self,
        destination: impl Into<ContextName>,
        sources: Vec<ContextName>,
    ) -> Result<Submission> {
        let request = ElasticityRequest {
            destination: destination.into(),
            sources,
        };
        let submission = self.pool.submit(|lane| {
            if request.overlaps(&lane.relocating) {
                return Submission::Dropped;
            }
            lane.relocating.extend(request.sources.iter().cloned());
            lane.queue.push_back(request);
            Submission::Submitted
        })?;
        let metrics = &self.pool.shared().ctx().metrics;
        match submission {
            Submission::Submitted => metrics.on_elasticity_accepted(),
            Submission::Dropped => {
                debug!("colocation request overlaps an in-flight relocation; dropped");
                metrics.on_elasticity_dropped();
            }
        }
        Ok(submission)
    }

    /// Releases a context from the relocating set.
    pub fn relocation_finished(&self, context: &ContextName) {
        release(self.pool.shared(), std::slice::from_ref(context));
    }

    /// Returns the contexts currently being relocated.
    #[must_use]
    pub fn relocating(&self) -> Vec<ContextName> {
        self.pool
            .shared()
            .with_lane(|lane| lane.relocating.iter().cloned().collect())
    }

    /// Runs queued requests, then joins the workers.
    pub fn halt_and_wait(&self) {
        self.pool.drain_and_join();
    }

    /// Abandons queued requests and joins the workers.
    pub fn halt_and_no_wait(&self) {
        self.pool.halt_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_utils::init_test_logging;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::time::Instant;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[derive(Default)]
    struct FakeRelocator {
        hosts: Mutex<BTreeMap<ContextName, u16>>,
        moves: Mutex<Vec<(ContextName, u16)>>,
        refuse: bool,
    }

    impl Relocator<u16> for FakeRelocator {
        fn host_of(&self, context: &ContextName) -> Option<u16> {
            self.hosts.lock().get(context).copied()
        }

        fn relocate(&self, contexts: Vec<ContextName>, destination: u16) -> Result<GlobalTicket> {
            if self.refuse {
                return Err(Error::Halted(Component::GlobalChannel));
            }
            let mut moves = self.moves.lock();
            for c in contexts {
                moves.push((c, destination));
            }
            Ok(GlobalTicket::new(moves.len() as u64))
        }
    }

    fn fake(refuse: bool) -> Arc<FakeRelocator> {
        let relocator = FakeRelocator {
            refuse,
            ..FakeRelocator::default()
        };
        {
            let mut hosts = relocator.hosts.lock();
            hosts.insert("dest".into(), 7);
            hosts.insert("near".into(), 7);
            hosts.insert("far".into(), 2);
        }
        Arc::new(relocator)
    }

    fn channel(relocator: &Arc<FakeRelocator>) -> ElasticityChannel<u16> {
        ElasticityChannel::start(
            Arc::clone(relocator) as Arc<dyn Relocator<u16>>,
            Arc::new(RuntimeMetrics::default()),
            PoolBounds::fixed(1),
            Duration::from_secs(1),
        )
        .expect("start")
    }

    fn wait_until(mut f: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn overlapping_request_is_dropped() {
        init_test("overlapping_request_is_dropped");
        let relocator = fake(false);
        let channel = channel(&relocator);
        let first = channel
            .request_colocation("dest", vec!["far".into()])
            .expect("submit");
        let second = channel
            .request_colocation("dest", vec!["far".into(), "other".into()])
            .expect("submit");
        crate::assert_with_log!(
            second == Submission::Dropped,
            "overlapping submission",
            Submission::Dropped,
            second
        );
        assert_eq!(first, Submission::Submitted);
        wait_until(|| relocator.moves.lock().len() == 1);
        assert_eq!(*relocator.moves.lock(), vec![(ContextName::new("far"), 7)]);
        assert_eq!(channel.relocating(), vec![ContextName::new("far")]);

        channel.relocation_finished(&"far".into());
        let third = channel
            .request_colocation("dest", vec!["far".into()])
            .expect("submit");
        assert_eq!(third, Submission::Submitted);
        channel.halt_and_wait();
        crate::test_complete!("overlapping_request_is_dropped");
    }

    #[test]
    fn colocated_and_failed_sources_are_released() {
        init_test("colocated_and_failed_sources_are_released");
        let relocator = fake(true);
        let channel = channel(&relocator);
        channel
            .request_colocation("dest", vec!["near".into(), "far".into()])
            .expect("submit");
        wait_until(|| channel.relocating().is_empty());
        assert!(relocator.moves.lock().is_empty());
        channel.halt_and_wait();
        crate::test_complete!("colocated_and_failed_sources_are_released");
    }

    #[test]
    fn unknown_destination_releases_sources() {
        init_test("unknown_destination_releases_sources");
        let relocator = fake(false);
        let channel = channel(&relocator);
        channel
            .request_colocation("nowhere", vec!["far".into()])
            .expect("submit");
        wait_until(|| channel.relocating().is_empty());
        assert!(relocator.moves.lock().is_empty());
        channel.halt_and_wait();
        crate::test_complete!("unknown_destination_releases_sources");
    }

    #[test]
    fn request_after_halt_is_refused() {
        init_test("request_after_halt_is_refused");
        let relocator = fake(false);
        let channel = channel(&relocator);
        channel.halt_and_no_wait();
        let refused = channel.request_colocation("dest", vec!["far".into()]);
        assert!(matches!(refused, Err(Error::Halted(Component::Elasticity))));
        crate::test_complete!("request_after_halt_is_refused");
    }
}
