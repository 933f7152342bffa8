#![allow(missing_docs)]

//! Property tests for ticket ordering under arbitrary arrival orders.

#[macro_use]
mod common;

use common::{init_test_logging, wait_until};
use ordo::{
    ContextTable, DomainId, Event, EventHandler, FailurePolicy, HeadDispatcher, LockMode, OrderId,
    Payload, PoolBounds, RuntimeMetrics, TicketAuthority,
};
use ordo::runtime::CommitPipeline;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Records execution and commit order, and checks the counter invariant
/// from inside both phases.
struct Recorder {
    authority: Arc<TicketAuthority>,
    executed: Arc<Mutex<Vec<(u8, u64)>>>,
    committed: Arc<Mutex<Vec<u64>>>,
    violations: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn check_counters(&self, phase: &str) {
        let snap = self.authority.snapshot();
        if snap.now_committing > snap.now_serving {
            self.violations.lock().push(format!(
                "{phase}: now_committing {} > now_serving {}",
                snap.now_committing, snap.now_serving
            ));
        }
    }
}

impl EventHandler for Recorder {
    fn execute(&self, id: OrderId, payload: &Payload) {
        self.check_counters("execute");
        let ctx = payload.as_bytes()[0];
        self.executed.lock().push((ctx, id.ticket()));
    }

    fn commit(&self, id: OrderId, _: &Payload) {
        self.check_counters("commit");
        self.committed.lock().push(id.ticket());
    }
}

/// An arrival order over `1..=n` tickets plus a context and mode per ticket.
fn arb_workload() -> impl Strategy<Value = Vec<(usize, u8, bool)>> {
    (1usize..24)
        .prop_flat_map(|n| {
            (
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
                prop::collection::vec((0u8..3, any::<bool>()), n),
            )
        })
        .prop_map(|(order, attrs)| {
            order
                .into_iter()
                .map(|i| (i, attrs[i].0, attrs[i].1))
                .collect()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn execution_and_commit_follow_ticket_order(workload in arb_workload(), workers in 1usize..4) {
        init_test_logging();
        test_phase!("execution_and_commit_follow_ticket_order");
        let authority = Arc::new(TicketAuthority::with_policy(DomainId::HEAD, FailurePolicy::Panic));
        let contexts = Arc::new(ContextTable::new());
        for c in 0..3 {
            contexts.create(format!("Ctx[{c}]"));
        }
        let metrics = Arc::new(RuntimeMetrics::default());
        let pipeline = Arc::new(
            CommitPipeline::start(Arc::clone(&authority), Arc::clone(&metrics)).expect("pipeline"),
        );
        let dispatcher = HeadDispatcher::start(
            Arc::clone(&authority),
            Arc::clone(&contexts),
            Arc::clone(&pipeline),
            metrics,
            PoolBounds::new(1, workers),
            Duration::from_millis(20),
        )
        .expect("dispatcher");

        let recorder = Arc::new(Recorder {
            authority: Arc::clone(&authority),
            executed: Arc::default(),
            committed: Arc::default(),
            violations: Arc::default(),
        });
        let tickets = authority.issue_many(workload.len());
        for &(i, ctx, write) in &workload {
            let mode = if write { LockMode::Write } else { LockMode::Read };
            let event = Event::with_handler(
                tickets[i],
                format!("Ctx[{ctx}]"),
                Arc::clone(&recorder) as Arc<dyn EventHandler>,
                Payload::from(vec![ctx]),
            )
            .mode(mode);
            dispatcher.enqueue(event).expect("enqueue");
            if i % 5 == 0 {
                thread::yield_now();
            }
        }

        let n = workload.len() as u64;
        wait_until(|| authority.now_committing() == n + 1);
        dispatcher.halt_and_wait();
        pipeline.halt_and_wait_commit();

        // Readers of different contexts may overlap, so execution order is
        // only total per context. Commit order is total.
        let executed = recorder.executed.lock().clone();
        let mut seen: Vec<u64> = executed.iter().map(|&(_, t)| t).collect();
        seen.sort_unstable();
        let expected: Vec<u64> = (1..=n).collect();
        prop_assert_eq!(seen, expected.clone());
        for c in 0..3u8 {
            let per_ctx: Vec<u64> = executed.iter().filter(|&&(x, _)| x == c).map(|&(_, t)| t).collect();
            prop_assert!(per_ctx.windows(2).all(|w| w[0] < w[1]), "context {} ran {:?}", c, per_ctx);
        }
        prop_assert_eq!(recorder.committed.lock().clone(), expected);
        prop_assert!(recorder.violations.lock().is_empty(), "{:?}", recorder.violations.lock());
        test_complete!("execution_and_commit_follow_ticket_order");
    }

    #[test]
    fn admission_is_strictly_increasing_across_threads(count in 2usize..32, threads in 2usize..6) {
        init_test_logging();
        let authority = Arc::new(TicketAuthority::with_policy(DomainId::new(7), FailurePolicy::Panic));
        let tickets = authority.issue_many(count);
        let admitted = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..threads)
            .map(|worker| {
                let mine: Vec<OrderId> = tickets
                    .iter()
                    .copied()
                    .filter(|t| t.ticket() as usize % threads == worker)
                    .collect();
                let authority = Arc::clone(&authority);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for t in mine {
                        let guard = authority.admit(t, LockMode::Write);
                        admitted.lock().push(t.ticket());
                        drop(guard);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }

        let order = admitted.lock().clone();
        prop_assert!(order.windows(2).all(|w| w[0] < w[1]), "admission order {:?}", order);
        prop_assert_eq!(order.len(), count);
        let snap = authority.snapshot();
        prop_assert_eq!(snap.now_serving, count as u64 + 1);
        prop_assert_eq!(snap.now_committing, count as u64 + 1);
        prop_assert_eq!(snap.writer, None);
    }
}
