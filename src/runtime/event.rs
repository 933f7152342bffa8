//! Dispatchable events.

use crate::sync::LockMode;
use crate::types::{ContextName, OrderId, Payload};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Receiver of an event: the code run at execution and at commit.
///
/// Closures taking `(OrderId, &Payload)` implement this trait with a no-op
/// commit step.
pub trait EventHandler: Send + Sync + 'static {
    /// Runs the event body. Called with no runtime lock held.
    fn execute(&self, id: OrderId, payload: &Payload);

    /// Applies commit side-effects. Called on the commit thread in ticket
    /// order.
    fn commit(&self, id: OrderId, payload: &Payload) {
        let _ = (id, payload);
    }
}

impl<F> EventHandler for F
where
    F: Fn(OrderId, &Payload) + Send + Sync + 'static,
{
    fn execute(&self, id: OrderId, payload: &Payload) {
        self(id, payload);
    }
}

/// Whether committing an event ends the commit pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventKind {
    /// Ordinary event.
    #[default]
    Normal,
    /// Committing this event halts the commit pipeline.
    Terminal,
}

/// An event bound to a ticket and a target context.
#[derive(Clone)]
pub struct Event {
    pub(crate) id: OrderId,
    pub(crate) context: ContextName,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) payload: Payload,
    pub(crate) mode: LockMode,
    pub(crate) kind: EventKind,
    pub(crate) created_at: Instant,
    pub(crate) failed: bool,
}

impl Event {
    /// Creates a normal event that takes write access to its context.
    pub fn new(
        id: OrderId,
        context: impl Into<ContextName>,
        handler: impl EventHandler,
        payload: Payload,
    ) -> Self {
        Self::with_handler(id, context, Arc::new(handler), payload)
    }

    /// Creates an event around a shared handler.
    pub fn with_handler(
        id: OrderId,
        context: impl Into<ContextName>,
        handler: Arc<dyn EventHandler>,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            context: context.into(),
            handler,
            payload,
            mode: LockMode::Write,
            kind: EventKind::Normal,
            created_at: Instant::now(),
            failed: false,
        }
    }

    /// Sets the admission mode.
    #[must_use]
    pub fn mode(mut self, mode: LockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Marks the event as terminal.
    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.kind = EventKind::Terminal;
        self
    }

    /// Returns the event ticket.
    #[must_use]
    pub const fn id(&self) -> OrderId {
        self.id
    }

    /// Returns the target context.
    #[must_use]
    pub const fn context(&self) -> &ContextName {
        &self.context
    }

    /// Returns the admission mode.
    #[must_use]
    pub const fn lock_mode(&self) -> LockMode {
        self.mode
    }

    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("mode", &self.mode)
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// Queue entry ordered by ticket only.
pub(crate) struct ByTicket(pub(crate) Event);

impl PartialEq for ByTicket {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for ByTicket {}

impl PartialOrd for ByTicket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByTicket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}
