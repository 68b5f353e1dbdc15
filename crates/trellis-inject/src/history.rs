//! Decoration history
//!
//! Tracks which constructor a decorated constructor was derived from, so any
//! wrapper can be resolved back to the root constructor it was registered
//! under.

use std::cell::RefCell;

use rustc_hash::FxHashMap;

use crate::constructor::{Constructor, ConstructorId};

/// Decorated constructor -> base constructor links
#[derive(Debug, Default)]
pub struct DecorationHistory {
    parents: RefCell<FxHashMap<ConstructorId, ConstructorId>>,
}

impl DecorationHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `decorated` wraps `base`.
    ///
    /// Returns false if the link would close a cycle; the link is dropped in
    /// that case so root lookups always terminate.
    pub fn add(&self, base: &Constructor, decorated: &Constructor) -> bool {
        if self.chain_contains(base.id(), decorated.id()) {
            tracing::warn!(
                base = base.name(),
                decorated = decorated.name(),
                "ignoring decoration that would form a cycle"
            );
            return false;
        }

        self.parents.borrow_mut().insert(decorated.id(), base.id());
        true
    }

    /// Check if `target` is `start` or one of its bases
    fn chain_contains(&self, start: ConstructorId, target: ConstructorId) -> bool {
        let parents = self.parents.borrow();
        let mut current = start;
        loop {
            if current == target {
                return true;
            }
            match parents.get(&current) {
                Some(parent) => current = *parent,
                None => return false,
            }
        }
    }

    /// Root constructor identity of a (possibly decorated) constructor
    pub fn get_root_of(&self, constructor: &Constructor) -> ConstructorId {
        self.get_root_of_id(constructor.id())
    }

    /// Root identity for a constructor id
    pub fn get_root_of_id(&self, id: ConstructorId) -> ConstructorId {
        let parents = self.parents.borrow();
        let mut current = id;
        while let Some(parent) = parents.get(&current) {
            current = *parent;
        }
        current
    }

    /// Direct base of a decorated constructor
    pub fn parent_of(&self, id: ConstructorId) -> Option<ConstructorId> {
        self.parents.borrow().get(&id).copied()
    }
}
