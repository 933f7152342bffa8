//! Ordering primitives.
//!
//! - [`TicketAuthority`]: per-domain ticket sequencer with admission,
//!   single-writer exclusion and ordered commit
//! - [`Admission`]: RAII handle for an admitted ticket

mod ticket;

pub use ticket::{Admission, Advance, TicketAuthority, TicketSnapshot};

use serde::{Deserialize, Serialize};

/// Access mode requested at admission.
///
/// Ordered by strength: `None < Read < Write`. A holder may only downgrade
/// to a weaker mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LockMode {
    /// Ordering only; no access held.
    #[default]
    None,
    /// Shared access.
    Read,
    /// Exclusive access; at most one holder per authority.
    Write,
}
