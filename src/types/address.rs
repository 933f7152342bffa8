//! Opaque node addresses.

use core::fmt::Debug;
use core::hash::Hash;

/// A node address supplied by the embedding application.
///
/// The core only stores, compares and forwards addresses. Any type that is
/// cheaply cloneable, totally ordered and thread-safe qualifies through the
/// blanket implementation.
pub trait Address: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

impl<T> Address for T where T: Clone + Ord + Hash + Debug + Send + Sync + 'static {}
