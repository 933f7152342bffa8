//! Context placement and parent/child ownership.
//!
//! The table answers two questions for the global channel: which node hosts
//! a context, and which contexts own which. Every mutation bumps a version
//! counter so observers can detect change cheaply.

use crate::types::{Address, ContextName};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Direction of an ownership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaOp {
    /// `parent` gains `child`.
    Add,
    /// `parent` loses `child`.
    Remove,
}

/// One parent/child ownership change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnershipDelta {
    /// Owning context.
    pub parent: ContextName,
    /// Owned context.
    pub child: ContextName,
    /// Add or remove the edge.
    pub op: DeltaOp,
}

impl OwnershipDelta {
    /// An edge insertion.
    pub fn add(parent: impl Into<ContextName>, child: impl Into<ContextName>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            op: DeltaOp::Add,
        }
    }

    /// An edge removal.
    pub fn remove(parent: impl Into<ContextName>, child: impl Into<ContextName>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            op: DeltaOp::Remove,
        }
    }
}

#[derive(Debug)]
struct Tables<A> {
    hosts: BTreeMap<ContextName, A>,
    children: BTreeMap<ContextName, BTreeSet<ContextName>>,
    version: u64,
}

/// Context-to-node placement plus the parent/child ownership graph.
#[derive(Debug)]
pub struct OwnershipTable<A> {
    inner: RwLock<Tables<A>>,
}

impl<A: Address> Default for OwnershipTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Address> OwnershipTable<A> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tables {
                hosts: BTreeMap::new(),
                children: BTreeMap::new(),
                version: 0,
            }),
        }
    }

    /// Records where a context lives, and optionally its parent.
    pub fn record(&self, context: ContextName, host: A, parent: Option<ContextName>) {
        let mut t = self.inner.write();
        if let Some(parent) = parent {
            t.children.entry(parent).or_default().insert(context.clone());
        }
        t.hosts.insert(context, host);
        t.version += 1;
    }

    /// Moves a context to another node.
    pub fn set_host(&self, context: &ContextName, host: A) {
        let mut t = self.inner.write();
        t.hosts.insert(context.clone(), host);
        t.version += 1;
    }

    /// Returns the node hosting a context.
    #[must_use]
    pub fn host_of(&self, context: &ContextName) -> Option<A> {
        self.inner.read().hosts.get(context).cloned()
    }

    /// Returns the parents that own a context.
    #[must_use]
    pub fn parents_of(&self, context: &ContextName) -> Vec<ContextName> {
        self.inner
            .read()
            .children
            .iter()
            .filter(|(_, kids)| kids.contains(context))
            .map(|(parent, _)| parent.clone())
            .collect()
    }

    /// Returns the contexts owned by `parent`.
    #[must_use]
    pub fn children_of(&self, parent: &ContextName) -> Vec<ContextName> {
        self.inner
            .read()
            .children
            .get(parent)
            .map(|kids| kids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Applies ownership deltas and returns every node hosting a context the
    /// deltas touched.
    pub fn apply(&self, deltas: &[OwnershipDelta]) -> BTreeSet<A> {
        let mut t = self.inner.write();
        let mut affected = BTreeSet::new();
        for delta in deltas {
            match delta.op {
                DeltaOp::Add => {
                    t.children
                        .entry(delta.parent.clone())
                        .or_default()
                        .insert(delta.child.clone());
                }
                DeltaOp::Remove => {
                    if let Some(kids) = t.children.get_mut(&delta.parent) {
                        kids.remove(&delta.child);
                        if kids.is_empty() {
                            t.children.remove(&delta.parent);
                        }
                    }
                }
            }
            for context in [&delta.parent, &delta.child] {
                if let Some(host) = t.hosts.get(context) {
                    affected.insert(host.clone());
                }
            }
        }
        t.version += 1;
        affected
    }

    /// Returns the mutation counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Returns the number of placed contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().hosts.len()
    }

    /// Returns true if no context is placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Chooses the node that hosts a new context.
pub trait PlacementRule<A: Address>: Send + Sync + 'static {
    /// Returns the host for `context`, created under `parent`.
    fn place(
        &self,
        context: &ContextName,
        parent: Option<&ContextName>,
        ownership: &OwnershipTable<A>,
        local: &A,
    ) -> A;
}

/// Places every context on the local node.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceLocally;

impl<A: Address> PlacementRule<A> for PlaceLocally {
    fn place(&self, _: &ContextName, _: Option<&ContextName>, _: &OwnershipTable<A>, local: &A) -> A {
        local.clone()
    }
}

/// Places a context next to its parent, or locally when the parent is
/// unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParentAffinity;

impl<A: Address> PlacementRule<A> for ParentAffinity {
    fn place(
        &self,
        _: &ContextName,
        parent: Option<&ContextName>,
        ownership: &OwnershipTable<A>,
        local: &A,
    ) -> A {
        parent
            .and_then(|p| ownership.host_of(p))
            .unwrap_or_else(|| local.clone())
    }
}
