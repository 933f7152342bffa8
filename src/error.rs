//! Error types and fail-fast handling.
//!
//! Two families of failure exist:
//!
//! - [`Error`]: recoverable conditions returned to callers (thread spawn
//!   failure, submission to a halted component, bad configuration).
//! - [`Violation`]: broken ordering invariants. These indicate a programming
//!   error in the caller or in the runtime and are never returned; they are
//!   routed through [`fail_fast`], which applies the configured
//!   [`FailurePolicy`].
//!
//! Transient unreadiness (a ticket that is not yet next, an exclusive holder
//! still running) is never an error: callers block until it resolves.

use crate::config::ConfigError;
use crate::tracing_compat::error;
use crate::types::{ContextName, GlobalTicket, OrderId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result alias for recoverable operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which runtime component an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// The ticket-ordered head dispatcher.
    Dispatcher,
    /// The single-threaded commit pipeline.
    CommitPipeline,
    /// The global lifecycle-event channel.
    GlobalChannel,
    /// The best-effort elasticity channel.
    Elasticity,
    /// The unordered async callback pool.
    AsyncPool,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dispatcher => "head dispatcher",
            Self::CommitPipeline => "commit pipeline",
            Self::GlobalChannel => "global event channel",
            Self::Elasticity => "elasticity channel",
            Self::AsyncPool => "async pool",
        };
        f.write_str(name)
    }
}

/// Recoverable runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread for {component}: {source}")]
    Spawn {
        /// Component whose pool failed to grow.
        component: Component,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Work was submitted after the component began halting.
    #[error("{0} is halted")]
    Halted(Component),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A broken ordering invariant.
///
/// Carried as the panic payload under [`FailurePolicy::Panic`], so tests can
/// downcast and inspect it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// A ticket was presented for admission after it had already been served.
    #[error("ticket {ticket} is below now_serving {now_serving}")]
    TicketAlreadyServed {
        /// Offending ticket.
        ticket: OrderId,
        /// Sequence number currently being served.
        now_serving: u64,
    },
    /// A ticket was presented that the authority never issued.
    #[error("ticket {ticket} was never issued (next ticket {next_ticket})")]
    TicketNotIssued {
        /// Offending ticket.
        ticket: OrderId,
        /// Next ticket the authority would hand out.
        next_ticket: u64,
    },
    /// The same ticket asked for exclusive access while already holding it.
    #[error("re-entrant exclusive acquisition by ticket {0}")]
    ReentrantWrite(OrderId),
    /// A ticket released a mode it does not hold.
    #[error("ticket {ticket} cannot downgrade from {held:?} to {requested:?}")]
    InvalidDowngrade {
        /// Offending ticket.
        ticket: OrderId,
        /// Mode currently held.
        held: crate::sync::LockMode,
        /// Mode requested.
        requested: crate::sync::LockMode,
    },
    /// A ticket committed twice.
    #[error("duplicate commit of ticket {ticket} (now_committing {now_committing})")]
    DuplicateCommit {
        /// Offending ticket.
        ticket: OrderId,
        /// Sequence number currently committing.
        now_committing: u64,
    },
    /// A ticket committed before its predecessors, or before admission.
    #[error("out-of-order commit of ticket {ticket} (now_committing {now_committing}, now_serving {now_serving})")]
    CommitOutOfOrder {
        /// Offending ticket.
        ticket: OrderId,
        /// Sequence number currently committing.
        now_committing: u64,
        /// Sequence number currently being served.
        now_serving: u64,
    },
    /// An event was routed to an authority of another domain.
    #[error("ticket {ticket} does not belong to this authority")]
    ForeignTicket {
        /// Offending ticket.
        ticket: OrderId,
    },
    /// A global commit did not match `now_serving_ticket`.
    #[error("global commit of {ticket} while serving {now_serving}")]
    GlobalTicketMismatch {
        /// Ticket the caller tried to commit.
        ticket: GlobalTicket,
        /// Ticket currently being served.
        now_serving: GlobalTicket,
    },
    /// The global FIFO contains a ticket older than the one being served.
    #[error("global queue holds {front} behind now_serving {now_serving}")]
    GlobalQueueOrder {
        /// Ticket at the front of the queue.
        front: GlobalTicket,
        /// Ticket currently being served.
        now_serving: GlobalTicket,
    },
    /// A commit was deferred twice while the same migration was in flight.
    #[error("global commit of {0} deferred twice")]
    DuplicateDeferredCommit(GlobalTicket),
    /// An event named a context this node does not host.
    #[error("unknown context {0}")]
    UnknownContext(ContextName),
    /// A migration signal named a ticket that is not the in-flight migration.
    #[error("migration signal for {signalled} but {in_flight:?} is in flight")]
    MigrationSignalMismatch {
        /// Ticket named by the signal.
        signalled: GlobalTicket,
        /// In-flight migration, if any.
        in_flight: Option<GlobalTicket>,
    },
}

/// What to do when a [`Violation`] is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log and abort the process.
    #[default]
    Abort,
    /// Log and panic with the violation as the payload.
    Panic,
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "panic" => Ok(Self::Panic),
            other => Err(ConfigError::InvalidValue {
                key: "failure_policy".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Reports a violated invariant and never returns.
#[cold]
#[track_caller]
pub fn fail_fast(policy: FailurePolicy, violation: Violation) -> ! {
    error!(%violation, ?policy, "ordering invariant violated");
    match policy {
        FailurePolicy::Abort => std::process::abort(),
        FailurePolicy::Panic => std::panic::panic_any(violation),
    }
}
