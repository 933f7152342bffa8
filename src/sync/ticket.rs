//! Per-domain ticket authority.
//!
//! A [`TicketAuthority`] hands out tickets for one coordination domain and
//! enforces three rules over them:
//!
//! 1. **Admission order.** `acquire` returns only when the ticket equals
//!    `now_serving`. Ticket `k + 1` is never admitted while ticket `k` is
//!    still waiting, even if `k + 1` could otherwise proceed.
//! 2. **Single writer.** A `Write` admission additionally waits until no other
//!    ticket holds exclusivity. A `Read` admission never waits for a writer,
//!    so `Write` excludes other writers only, not readers.
//! 3. **Commit order.** Commits happen strictly at `now_committing`, which
//!    never overtakes `now_serving`.
//!
//! Waiters park on one condition variable per rule and re-check their
//! predicate on every wakeup. Components that schedule work against the
//! counters (the dispatcher, the commit pipeline) subscribe through
//! [`TicketAuthority::on_advance`]; listeners run after the authority lock is
//! released, so they may take their own component lock.
//!
//! Any broken rule is a [`Violation`] and goes through [`fail_fast`].

use super::LockMode;
use crate::error::{FailurePolicy, Violation, fail_fast};
use crate::tracing_compat::{debug, trace};
use crate::types::{DomainId, FIRST_TICKET, OrderId};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A counter movement reported to advance listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// `now_serving` moved to the contained value.
    Served(u64),
    /// `now_committing` moved to the contained value.
    Committed(u64),
}

type Listener = Arc<dyn Fn(Advance) + Send + Sync>;

/// Read-only view of an authority's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TicketSnapshot {
    /// Domain the authority serves.
    pub domain: DomainId,
    /// Next ticket `issue` will return.
    pub next_ticket: u64,
    /// Next ticket eligible for admission.
    pub now_serving: u64,
    /// Next ticket eligible for commit.
    pub now_committing: u64,
    /// Ticket holding write exclusivity, if any.
    pub writer: Option<u64>,
    /// Callers parked in `acquire`.
    pub waiting: usize,
    /// Admitted tickets not yet committed.
    pub outstanding: usize,
}

#[derive(Debug)]
struct State {
    next_ticket: u64,
    now_serving: u64,
    now_committing: u64,
    writer: Option<u64>,
    held: HashMap<u64, LockMode>,
    waiters: BinaryHeap<Reverse<u64>>,
}

impl State {
    fn new() -> Self {
        Self {
            next_ticket: FIRST_TICKET,
            now_serving: FIRST_TICKET,
            now_committing: FIRST_TICKET,
            writer: None,
            held: HashMap::new(),
            waiters: BinaryHeap::new(),
        }
    }

    fn admissible(&self, seq: u64, mode: LockMode) -> bool {
        seq == self.now_serving && (mode != LockMode::Write || self.writer.is_none())
    }

    fn head_waiter_is_next(&self) -> bool {
        self.waiters
            .peek()
            .is_some_and(|Reverse(seq)| *seq == self.now_serving)
    }

    fn remove_waiter(&mut self, seq: u64) {
        if self.waiters.peek() == Some(&Reverse(seq)) {
            self.waiters.pop();
        } else {
            self.waiters.retain(|Reverse(s)| *s != seq);
        }
    }
}

/// Strict-order admission, single-writer exclusion and ordered commit for
/// one coordination domain.
pub struct TicketAuthority {
    domain: DomainId,
    policy: FailurePolicy,
    state: Mutex<State>,
    admitted: Condvar,
    committed: Condvar,
    listeners: Mutex<Vec<Listener>>,
}

impl fmt::Debug for TicketAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketAuthority")
            .field("domain", &self.domain)
            .field("policy", &self.policy)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl TicketAuthority {
    /// Creates an authority that aborts on violations.
    #[must_use]
    pub fn new(domain: DomainId) -> Self {
        Self::with_policy(domain, FailurePolicy::Abort)
    }

    /// Creates an authority with an explicit failure policy.
    #[must_use]
    pub fn with_policy(domain: DomainId, policy: FailurePolicy) -> Self {
        Self {
            domain,
            policy,
            state: Mutex::new(State::new()),
            admitted: Condvar::new(),
            committed: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Returns the domain this authority serves.
    #[must_use]
    pub const fn domain(&self) -> DomainId {
        self.domain
    }

    /// Returns the configured failure policy.
    #[must_use]
    pub const fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Issues the next ticket of the domain.
    pub fn issue(&self) -> OrderId {
        let mut state = self.state.lock();
        let seq = state.next_ticket;
        state.next_ticket += 1;
        OrderId::new(self.domain, seq)
    }

    /// Issues `count` consecutive tickets.
    pub fn issue_many(&self, count: usize) -> SmallVec<[OrderId; 8]> {
        let mut state = self.state.lock();
        let first = state.next_ticket;
        state.next_ticket += count as u64;
        drop(state);
        (first..first + count as u64)
            .map(|seq| OrderId::new(self.domain, seq))
            .collect()
    }

    /// Returns the next ticket eligible for admission.
    #[must_use]
    pub fn now_serving(&self) -> u64 {
        self.state.lock().now_serving
    }

    /// Returns the next ticket eligible for commit.
    #[must_use]
    pub fn now_committing(&self) -> u64 {
        self.state.lock().now_committing
    }

    /// Returns a consistent snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> TicketSnapshot {
        let state = self.state.lock();
        TicketSnapshot {
            domain: self.domain,
            next_ticket: state.next_ticket,
            now_serving: state.now_serving,
            now_committing: state.now_committing,
            writer: state.writer,
            waiting: state.waiters.len(),
            outstanding: state.held.len(),
        }
    }

    /// Registers a listener for counter movements.
    ///
    /// Listeners run on the thread that moved the counter, after the
    /// authority lock has been released.
    pub fn on_advance<F>(&self, listener: F)
    where
        F: Fn(Advance) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Blocks until `ticket` is next and, for `Write`, no writer holds
    /// exclusivity; then admits it.
    pub fn acquire(&self, ticket: OrderId, mode: LockMode) {
        let seq = self.check_domain(ticket);
        let mut state = self.state.lock();
        if seq >= state.next_ticket {
            self.violate(Violation::TicketNotIssued {
                ticket,
                next_ticket: state.next_ticket,
            });
        }
        if mode == LockMode::Write && state.held.get(&seq) == Some(&LockMode::Write) {
            self.violate(Violation::ReentrantWrite(ticket));
        }
        if seq < state.now_serving {
            self.violate(Violation::TicketAlreadyServed {
                ticket,
                now_serving: state.now_serving,
            });
        }

        state.waiters.push(Reverse(seq));
        while !state.admissible(seq, mode) {
            trace!(%ticket, now_serving = state.now_serving, writer = ?state.writer, "waiting for admission");
            self.admitted.wait(&mut state);
            if seq < state.now_serving {
                state.remove_waiter(seq);
                let now_serving = state.now_serving;
                drop(state);
                self.violate(Violation::TicketAlreadyServed {
                    ticket,
                    now_serving,
                });
            }
        }
        state.remove_waiter(seq);

        state.now_serving += 1;
        if mode == LockMode::Write {
            state.writer = Some(seq);
        }
        state.held.insert(seq, mode);
        let now_serving = state.now_serving;
        let wake = state.head_waiter_is_next();
        drop(state);

        debug!(%ticket, ?mode, now_serving, "ticket admitted");
        if wake {
            self.admitted.notify_all();
        }
        self.emit(Advance::Served(now_serving));
    }

    /// Admits `ticket` and returns a guard that releases it on drop.
    pub fn admit(&self, ticket: OrderId, mode: LockMode) -> Admission<'_> {
        self.acquire(ticket, mode);
        Admission {
            authority: self,
            ticket,
            mode,
            released: false,
        }
    }

    /// Weakens the mode held by an admitted ticket.
    ///
    /// Leaving `Write` releases exclusivity and wakes the next waiter.
    /// Downgrading to `None` additionally blocks until `now_committing`
    /// reaches this ticket, then commits it.
    pub fn downgrade(&self, ticket: OrderId, mode: LockMode) {
        let seq = self.check_domain(ticket);
        let mut state = self.state.lock();
        let held = match state.held.get(&seq).copied() {
            Some(held) => held,
            None => {
                let violation = Self::not_held(&state, ticket);
                drop(state);
                self.violate(violation);
            }
        };
        if mode > held {
            self.violate(Violation::InvalidDowngrade {
                ticket,
                held,
                requested: mode,
            });
        }

        state.held.insert(seq, mode);
        if held == LockMode::Write && mode != LockMode::Write && state.writer == Some(seq) {
            state.writer = None;
            trace!(%ticket, "write exclusivity released");
            self.admitted.notify_all();
        }
        if mode != LockMode::None {
            return;
        }

        while state.now_committing < seq {
            self.committed.wait(&mut state);
        }
        self.commit_locked(state, ticket);
    }

    /// Commits an admitted ticket without blocking.
    ///
    /// The ticket must equal `now_committing` and must have been admitted.
    pub fn commit(&self, ticket: OrderId) {
        self.check_domain(ticket);
        let state = self.state.lock();
        self.commit_locked(state, ticket);
    }

    /// Blocks until `ticket` has committed.
    pub fn wait_after_commit(&self, ticket: OrderId) {
        let seq = self.check_domain(ticket);
        let mut state = self.state.lock();
        self.check_issued(&state, ticket);
        while state.now_committing <= seq {
            self.committed.wait(&mut state);
        }
    }

    /// Like [`wait_after_commit`](Self::wait_after_commit) with a deadline.
    ///
    /// Returns `true` if the ticket committed in time.
    pub fn wait_after_commit_timeout(&self, ticket: OrderId, timeout: Duration) -> bool {
        let seq = self.check_domain(ticket);
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        self.check_issued(&state, ticket);
        while state.now_committing <= seq {
            if self.committed.wait_until(&mut state, deadline).timed_out() {
                return state.now_committing > seq;
            }
        }
        true
    }

    fn commit_locked(&self, mut state: MutexGuard<'_, State>, ticket: OrderId) {
        let seq = ticket.ticket();
        if seq < state.now_committing {
            let now_committing = state.now_committing;
            drop(state);
            self.violate(Violation::DuplicateCommit {
                ticket,
                now_committing,
            });
        }
        if seq != state.now_committing || seq >= state.now_serving || !state.held.contains_key(&seq)
        {
            let violation = Violation::CommitOutOfOrder {
                ticket,
                now_committing: state.now_committing,
                now_serving: state.now_serving,
            };
            drop(state);
            self.violate(violation);
        }

        state.held.remove(&seq);
        let released = state.writer == Some(seq);
        if released {
            state.writer = None;
        }
        state.now_committing += 1;
        let now_committing = state.now_committing;
        drop(state);

        debug!(%ticket, now_committing, "ticket committed");
        self.committed.notify_all();
        if released {
            self.admitted.notify_all();
        }
        self.emit(Advance::Committed(now_committing));
    }

    fn not_held(state: &State, ticket: OrderId) -> Violation {
        if ticket.ticket() < state.now_committing {
            Violation::DuplicateCommit {
                ticket,
                now_committing: state.now_committing,
            }
        } else {
            Violation::CommitOutOfOrder {
                ticket,
                now_committing: state.now_committing,
                now_serving: state.now_serving,
            }
        }
    }

    fn check_domain(&self, ticket: OrderId) -> u64 {
        if ticket.domain() != self.domain {
            self.violate(Violation::ForeignTicket { ticket });
        }
        ticket.ticket()
    }

    fn check_issued(&self, state: &State, ticket: OrderId) {
        if ticket.ticket() >= state.next_ticket {
            self.violate(Violation::TicketNotIssued {
                ticket,
                next_ticket: state.next_ticket,
            });
        }
    }

    fn emit(&self, advance: Advance) {
        let listeners: SmallVec<[Listener; 4]> = self.listeners.lock().iter().cloned().collect();
        for listener in listeners {
            listener(advance);
        }
    }

    #[cold]
    fn violate(&self, violation: Violation) -> ! {
        fail_fast(self.policy, violation)
    }
}

/// An admitted ticket.
///
/// Dropping the guard downgrades to `None`, which blocks until the ticket's
/// turn to commit. A guard dropped during a panic leaves the ticket
/// outstanding.
#[must_use = "dropping an admission immediately commits it"]
pub struct Admission<'a> {
    authority: &'a TicketAuthority,
    ticket: OrderId,
    mode: LockMode,
    released: bool,
}

impl Admission<'_> {
    /// Returns the admitted ticket.
    #[must_use]
    pub const fn ticket(&self) -> OrderId {
        self.ticket
    }

    /// Returns the mode currently held.
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    /// Weakens the held mode. Downgrading to `None` commits the ticket.
    pub fn downgrade(&mut self, mode: LockMode) {
        if self.released {
            return;
        }
        self.authority.downgrade(self.ticket, mode);
        self.mode = mode;
        self.released = mode == LockMode::None;
    }

    /// Downgrades to `None`, committing the ticket.
    pub fn release(mut self) {
        self.downgrade(LockMode::None);
    }
}

impl fmt::Debug for Admission<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("ticket", &self.ticket)
            .field("mode", &self.mode)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.released && !std::thread::panicking() {
            self.authority.downgrade(self.ticket, LockMode::None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn authority() -> Arc<TicketAuthority> {
        Arc::new(TicketAuthority::with_policy(
            DomainId::new(7),
            FailurePolicy::Panic,
        ))
    }

    fn expect_violation(f: impl FnOnce()) -> Violation {
        let err = catch_unwind(AssertUnwindSafe(f)).expect_err("expected a violation");
        *err.downcast::<Violation>().expect("violation payload")
    }

    #[test]
    fn tickets_start_at_one_and_are_unique() {
        init_test("tickets_start_at_one_and_are_unique");
        let auth = authority();
        let first = auth.issue();
        let batch = auth.issue_many(3);
        crate::assert_with_log!(first.ticket() == 1, "first ticket", 1, first.ticket());
        let seqs: Vec<u64> = batch.iter().map(|t| t.ticket()).collect();
        crate::assert_with_log!(seqs == [2, 3, 4], "batch", "[2, 3, 4]", seqs);
        assert_eq!(auth.snapshot().next_ticket, 5);
        crate::test_complete!("tickets_start_at_one_and_are_unique");
    }

    #[test]
    fn admission_follows_ticket_order() {
        init_test("admission_follows_ticket_order");
        let auth = authority();
        let tickets = auth.issue_many(8);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = tickets
            .iter()
            .rev()
            .map(|&ticket| {
                let auth = Arc::clone(&auth);
                let order = Arc::clone(&order);
                thread::spawn(move || {
                    // Write keeps the successor out until this ticket records.
                    auth.acquire(ticket, LockMode::Write);
                    order.lock().push(ticket.ticket());
                    auth.downgrade(ticket, LockMode::None);
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker");
        }

        let order = order.lock().clone();
        crate::assert_with_log!(
            order == (1..=8).collect::<Vec<_>>(),
            "admission order",
            "1..=8",
            order
        );
        let snap = auth.snapshot();
        assert_eq!(snap.now_serving, 9);
        assert_eq!(snap.now_committing, 9);
        assert_eq!(snap.outstanding, 0);
        crate::test_complete!("admission_follows_ticket_order");
    }

    #[test]
    fn second_writer_blocks_until_first_downgrades_to_none() {
        init_test("second_writer_blocks_until_first_downgrades_to_none");
        let auth = authority();
        let t1 = auth.issue();
        let t2 = auth.issue();
        let _t3 = auth.issue();

        auth.acquire(t1, LockMode::Write);
        let admitted = Arc::new(AtomicBool::new(false));
        let waiter = {
            let auth = Arc::clone(&auth);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                auth.acquire(t2, LockMode::Write);
                admitted.store(true, Ordering::SeqCst);
                auth.downgrade(t2, LockMode::None);
            })
        };

        thread::sleep(Duration::from_millis(50));
        let early = admitted.load(Ordering::SeqCst);
        crate::assert_with_log!(!early, "t2 still blocked", false, early);
        assert_eq!(auth.snapshot().writer, Some(1));

        auth.downgrade(t1, LockMode::None);
        waiter.join().expect("waiter");
        assert!(admitted.load(Ordering::SeqCst));
        assert_eq!(auth.now_committing(), 3);
        crate::test_complete!("second_writer_blocks_until_first_downgrades_to_none");
    }

    #[test]
    fn at_most_one_writer_under_contention() {
        init_test("at_most_one_writer_under_contention");
        let auth = authority();
        let tickets = auth.issue_many(16);
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = tickets
            .into_iter()
            .map(|ticket| {
                let auth = Arc::clone(&auth);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    auth.acquire(ticket, LockMode::Write);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    auth.downgrade(ticket, LockMode::Read);
                    auth.downgrade(ticket, LockMode::None);
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker");
        }
        let max = max_inside.load(Ordering::SeqCst);
        crate::assert_with_log!(max == 1, "max concurrent writers", 1, max);
        crate::test_complete!("at_most_one_writer_under_contention");
    }

    #[test]
    fn downgrade_to_none_waits_for_commit_turn() {
        init_test("downgrade_to_none_waits_for_commit_turn");
        let auth = authority();
        let t1 = auth.issue();
        let t2 = auth.issue();
        auth.acquire(t1, LockMode::Read);
        auth.acquire(t2, LockMode::Read);

        let committed = Arc::new(AtomicBool::new(false));
        let second = {
            let auth = Arc::clone(&auth);
            let committed = Arc::clone(&committed);
            thread::spawn(move || {
                auth.downgrade(t2, LockMode::None);
                committed.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!committed.load(Ordering::SeqCst));
        assert_eq!(auth.now_committing(), 1);

        auth.commit(t1);
        second.join().expect("second");
        assert!(committed.load(Ordering::SeqCst));
        assert_eq!(auth.now_committing(), 3);
        crate::test_complete!("downgrade_to_none_waits_for_commit_turn");
    }

    #[test]
    fn wait_after_commit_observes_commit() {
        init_test("wait_after_commit_observes_commit");
        let auth = authority();
        let t1 = auth.issue();
        assert!(!auth.wait_after_commit_timeout(t1, Duration::from_millis(10)));

        let waiter = {
            let auth = Arc::clone(&auth);
            thread::spawn(move || auth.wait_after_commit(t1))
        };
        auth.admit(t1, LockMode::None).release();
        waiter.join().expect("waiter");
        assert!(auth.wait_after_commit_timeout(t1, Duration::ZERO));
        crate::test_complete!("wait_after_commit_observes_commit");
    }

    #[test]
    fn admission_guard_commits_on_drop() {
        init_test("admission_guard_commits_on_drop");
        let auth = authority();
        let t1 = auth.issue();
        {
            let mut admission = auth.admit(t1, LockMode::Write);
            assert_eq!(admission.mode(), LockMode::Write);
            admission.downgrade(LockMode::Read);
            assert_eq!(auth.snapshot().writer, None);
        }
        let snap = auth.snapshot();
        assert_eq!((snap.now_serving, snap.now_committing), (2, 2));
        crate::test_complete!("admission_guard_commits_on_drop");
    }

    #[test]
    fn advance_listeners_see_both_counters() {
        init_test("advance_listeners_see_both_counters");
        let auth = authority();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            auth.on_advance(move |a| seen.lock().push(a));
        }
        let t1 = auth.issue();
        auth.acquire(t1, LockMode::None);
        auth.commit(t1);
        let seen = seen.lock().clone();
        assert_eq!(seen, vec![Advance::Served(2), Advance::Committed(2)]);
        crate::test_complete!("advance_listeners_see_both_counters");
    }

    #[test]
    fn served_ticket_is_rejected() {
        init_test("served_ticket_is_rejected");
        let auth = authority();
        let t1 = auth.issue();
        auth.acquire(t1, LockMode::Read);
        let v = expect_violation(|| auth.acquire(t1, LockMode::Read));
        assert!(matches!(v, Violation::TicketAlreadyServed { now_serving: 2, .. }));
        crate::test_complete!("served_ticket_is_rejected");
    }

    #[test]
    fn reentrant_write_is_rejected() {
        init_test("reentrant_write_is_rejected");
        let auth = authority();
        let t1 = auth.issue();
        auth.acquire(t1, LockMode::Write);
        let v = expect_violation(|| auth.acquire(t1, LockMode::Write));
        assert_eq!(v, Violation::ReentrantWrite(t1));
        crate::test_complete!("reentrant_write_is_rejected");
    }

    #[test]
    fn duplicate_commit_is_rejected() {
        init_test("duplicate_commit_is_rejected");
        let auth = authority();
        let t1 = auth.issue();
        auth.acquire(t1, LockMode::None);
        auth.commit(t1);
        let v = expect_violation(|| auth.commit(t1));
        assert!(matches!(v, Violation::DuplicateCommit { now_committing: 2, .. }));
        crate::test_complete!("duplicate_commit_is_rejected");
    }

    #[test]
    fn commit_before_admission_is_rejected() {
        init_test("commit_before_admission_is_rejected");
        let auth = authority();
        let t1 = auth.issue();
        let v = expect_violation(|| auth.commit(t1));
        assert!(matches!(v, Violation::CommitOutOfOrder { now_serving: 1, .. }));
        crate::test_complete!("commit_before_admission_is_rejected");
    }

    #[test]
    fn foreign_and_unissued_tickets_are_rejected() {
        init_test("foreign_and_unissued_tickets_are_rejected");
        let auth = authority();
        let foreign = OrderId::new(DomainId::new(1), 1);
        let v = expect_violation(|| auth.acquire(foreign, LockMode::None));
        assert_eq!(v, Violation::ForeignTicket { ticket: foreign });

        let unissued = OrderId::new(auth.domain(), 1);
        let v = expect_violation(|| auth.acquire(unissued, LockMode::None));
        assert!(matches!(v, Violation::TicketNotIssued { next_ticket: 1, .. }));
        crate::test_complete!("foreign_and_unissued_tickets_are_rejected");
    }

    #[test]
    fn upgrade_is_rejected() {
        init_test("upgrade_is_rejected");
        let auth = authority();
        let t1 = auth.issue();
        auth.acquire(t1, LockMode::Read);
        let v = expect_violation(|| auth.downgrade(t1, LockMode::Write));
        assert!(matches!(v, Violation::InvalidDowngrade { .. }));
        crate::test_complete!("upgrade_is_rejected");
    }
}
