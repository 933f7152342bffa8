//! Registry of locally hosted contexts.
//!
//! Each context owns an execution mutex. The dispatcher holds it while an
//! event runs against the context, so events on one context never overlap
//! while events on different contexts run in parallel. Entries live in a
//! slab and are looked up by name.

use crate::types::ContextName;
use parking_lot::{Mutex, RwLock};
use slab::Slab;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Shared execution lock of one context.
pub type ExecLock = Arc<Mutex<()>>;

/// Owned guard over a context's execution lock.
pub type ExecGuard = parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, ()>;

#[derive(Debug)]
struct Entry {
    name: ContextName,
    exec: ExecLock,
    created_at: Instant,
}

#[derive(Debug, Default)]
struct Registry {
    slots: Slab<Entry>,
    by_name: HashMap<ContextName, usize>,
}

/// Locally hosted contexts, keyed by name.
#[derive(Debug, Default)]
pub struct ContextTable {
    inner: RwLock<Registry>,
}

impl ContextTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context. Returns `false` if it already exists.
    pub fn create(&self, name: impl Into<ContextName>) -> bool {
        let name = name.into();
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&name) {
            return false;
        }
        let key = inner.slots.insert(Entry {
            name: name.clone(),
            exec: Arc::new(Mutex::new(())),
            created_at: Instant::now(),
        });
        inner.by_name.insert(name, key);
        true
    }

    /// Removes a context. Returns `false` if it was not hosted here.
    pub fn remove(&self, name: &ContextName) -> bool {
        let mut inner = self.inner.write();
        match inner.by_name.remove(name) {
            Some(key) => {
                inner.slots.remove(key);
                true
            }
            None => false,
        }
    }

    /// Returns true if the context is hosted here.
    #[must_use]
    pub fn contains(&self, name: &ContextName) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    /// Returns the execution lock of a hosted context.
    #[must_use]
    pub fn exec_lock(&self, name: &ContextName) -> Option<ExecLock> {
        let inner = self.inner.read();
        let key = *inner.by_name.get(name)?;
        Some(Arc::clone(&inner.slots[key].exec))
    }

    /// Returns how long a hosted context has existed.
    #[must_use]
    pub fn age(&self, name: &ContextName) -> Option<std::time::Duration> {
        let inner = self.inner.read();
        let key = *inner.by_name.get(name)?;
        Some(inner.slots[key].created_at.elapsed())
    }

    /// Returns the number of hosted contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    /// Returns true if no context is hosted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the hosted context names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<ContextName> {
        let mut names: Vec<_> = self
            .inner
            .read()
            .slots
            .iter()
            .map(|(_, e)| e.name.clone())
            .collect();
        names.sort();
        names
    }
}
