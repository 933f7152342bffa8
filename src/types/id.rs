//! Identifier types for ordered runtime entities.
//!
//! These types provide type-safe identifiers for coordination domains, event
//! tickets, global lifecycle tickets and contexts. Per-domain tickets and
//! global tickets live in disjoint numbering spaces and are deliberately
//! distinct types so one can never be passed where the other is expected.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The first sequence number handed out by any ticket source.
pub const FIRST_TICKET: u64 = 1;

/// A coordination domain (for example one context, or the head node itself).
///
/// Ordering guarantees hold within one domain and are never implied across
/// domains.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DomainId(u32);

impl DomainId {
    /// The head domain, used for events created directly at the head node.
    pub const HEAD: Self = Self(0);

    /// Creates a domain identifier.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw domain number.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainId({})", self.0)
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// The admission ticket of an event: `(domain, sequence)`.
///
/// Ordered lexicographically, so within one domain the order is the numeric
/// ticket order. A ticket is unique within its domain and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId {
    domain: DomainId,
    ticket: u64,
}

impl OrderId {
    /// Creates an order identifier.
    #[inline]
    #[must_use]
    pub const fn new(domain: DomainId, ticket: u64) -> Self {
        Self { domain, ticket }
    }

    /// Returns the domain this ticket belongs to.
    #[inline]
    #[must_use]
    pub const fn domain(self) -> DomainId {
        self.domain
    }

    /// Returns the sequence number within the domain.
    #[inline]
    #[must_use]
    pub const fn ticket(self) -> u64 {
        self.ticket
    }

    /// Returns the ticket immediately following this one in the same domain.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            domain: self.domain,
            ticket: self.ticket + 1,
        }
    }
}

impl fmt::Debug for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderId({}:{})", self.domain.0, self.ticket)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.domain, self.ticket)
    }
}

/// A ticket in the global lifecycle-event numbering space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalTicket(u64);

impl GlobalTicket {
    /// The first global ticket.
    pub const FIRST: Self = Self(FIRST_TICKET);

    /// Creates a global ticket from its raw number.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw ticket number.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the following ticket.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for GlobalTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalTicket({})", self.0)
    }
}

impl fmt::Display for GlobalTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

/// The name of a logical, migratable context.
///
/// Cheap to clone; the string is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextName(Arc<str>);

impl ContextName {
    /// The name of the root (global) context.
    pub const GLOBAL: &'static str = "globalContext";

    /// Creates a context name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the context type: the part of the name before the first `[`.
    ///
    /// `Room[3]` has type `Room`; a name without brackets is its own type.
    #[must_use]
    pub fn context_type(&self) -> &str {
        self.0.split('[').next().unwrap_or(&self.0)
    }
}

impl fmt::Debug for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextName({:?})", &*self.0)
    }
}

impl fmt::Display for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContextName {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Serialize for ContextName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContextName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw))
    }
}
