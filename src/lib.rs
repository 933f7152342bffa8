//! Ordo: ticket-ordered event dispatch and commit for context-partitioned
//! runtimes.
//!
//! # Overview
//!
//! Every operation in a coordination domain is stamped with a ticket. Ordo
//! executes events in ticket order on a worker pool, applies their commit
//! effects in ticket order on a single thread, and runs context lifecycle
//! operations (creation, migration, ownership changes) through a separate,
//! equally ordered channel whose steps may complete on other nodes.
//!
//! # Core Guarantees
//!
//! - **Ordered admission**: a ticket is admitted only when every earlier
//!   ticket of its domain was admitted
//! - **Single writer**: at most one ticket holds write access per domain
//! - **Ordered commit**: commit effects apply in ticket order, even when
//!   execution finishes out of order
//! - **Fail fast**: a broken ordering invariant is reported through
//!   [`error::fail_fast`], never silently tolerated
//!
//! # Module Structure
//!
//! - [`types`]: tickets, domains, context names, payloads, addresses
//! - [`sync`]: the [`TicketAuthority`] sequencer
//! - [`runtime`]: dispatcher, commit pipeline, global and elasticity
//!   channels, async pool, and the [`HeadRuntime`] that wires them
//! - [`config`]: [`RuntimeConfig`] and its layered loader
//! - [`error`](mod@error): recoverable errors and invariant violations
//! - [`observability`]: counters and latency statistics
//! - [`tracing_compat`]: optional tracing integration (requires
//!   `tracing-integration` feature)
//!
//! # Example
//!
//! ```
//! use ordo::{Event, HeadMessage, HeadRuntime, OrderId, Payload};
//! use std::sync::Arc;
//!
//! let runtime = HeadRuntime::builder(0u16, Arc::new(|_: &u16, _: HeadMessage<u16>| {}))
//!     .start()
//!     .unwrap();
//! runtime.contexts().create("Room[1]");
//! let id = runtime.issue();
//! runtime
//!     .submit(Event::new(id, "Room[1]", |_: OrderId, _: &Payload| {}, Payload::empty()))
//!     .unwrap();
//! runtime.authority().wait_after_commit(id);
//! runtime.halt_and_wait();
//! runtime.halt_and_wait_commit();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod error;
pub mod observability;
pub mod runtime;
pub mod sync;
pub mod tracing_compat;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use config::{ConfigError, ConfigLoader, PoolBounds, RuntimeConfig};
pub use error::{Component, Error, FailurePolicy, Result, Violation};
pub use observability::{MetricsSnapshot, RuntimeMetrics};
pub use runtime::{
    AsyncPool, CommitPipeline, ContextTable, ElasticityChannel, Event, EventHandler, EventKind,
    GlobalCommit, GlobalEvent, GlobalEventChannel, GlobalEventKind, GlobalEventTag, HeadDispatcher,
    HeadMessage, HeadRuntime, Messenger, OwnershipDelta, OwnershipTable, PlacementRule, Submission,
};
pub use sync::{Admission, LockMode, TicketAuthority};
pub use types::{Address, ContextName, DomainId, GlobalTicket, OrderId, Payload};
