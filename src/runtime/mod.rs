//! Dispatch, commit and lifecycle channels.
//!
//! Every channel is a [`pool::WorkerPool`] driving a channel-specific lane:
//!
//! - [`head`]: ticket-ordered event execution
//! - [`commit`]: single-threaded, ticket-ordered commit
//! - [`global`]: context creation, migration and ownership changes
//! - [`elasticity`]: best-effort colocation suggestions
//! - [`async_pool`]: unordered callbacks
//! - [`head_runtime`]: all of the above wired for one node

pub mod async_pool;
pub mod commit;
pub mod context;
pub mod elasticity;
pub mod event;
pub mod global;
pub mod head;
pub mod head_runtime;
pub mod ownership;
pub(crate) mod pool;

pub use async_pool::AsyncPool;
pub use commit::CommitPipeline;
pub use context::{ContextTable, ExecGuard, ExecLock};
pub use elasticity::{ElasticityChannel, ElasticityRequest, Relocator, Submission};
pub use event::{Event, EventHandler, EventKind};
pub use global::{
    CommittedGlobal, GlobalChannelBuilder, GlobalCommit, GlobalEvent, GlobalEventChannel,
    GlobalEventKind, GlobalEventTag, HeadMessage, Messenger,
};
pub use head::HeadDispatcher;
pub use head_runtime::{HeadRuntime, HeadRuntimeBuilder};
pub use ownership::{
    DeltaOp, OwnershipDelta, OwnershipTable, ParentAffinity, PlaceLocally, PlacementRule,
};
