//! Core types shared by every channel.
//!
//! - [`id`]: tickets, domains, global tickets and context names
//! - [`payload`]: opaque event payloads
//! - [`address`]: the opaque node address bound

pub mod address;
pub mod id;
pub mod payload;

pub use address::Address;
pub use id::{ContextName, DomainId, FIRST_TICKET, GlobalTicket, OrderId};
pub use payload::Payload;
