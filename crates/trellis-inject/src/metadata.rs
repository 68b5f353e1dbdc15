//! Metadata storage for constructors
//!
//! Provides the reflection data the register reads: the declared constructor
//! parameter types. Arbitrary keyed metadata can be attached as well (the
//! component registry stores element selectors here).
//!
//! Entries are keyed by constructor identity. Missing parameter type lists
//! are reported as empty, never as an error.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::constructor::{Constructor, ConstructorId};

/// A key for metadata - can be any string
pub type MetadataKey = String;

/// Metadata stored for a single constructor
#[derive(Default)]
struct ConstructorMetadata {
    /// Declared parameter types, in declaration order
    parameter_types: Option<Vec<Constructor>>,
    /// Keyed metadata values
    values: FxHashMap<MetadataKey, Rc<dyn Any>>,
}

/// Constructor metadata store
#[derive(Default)]
pub struct Metadata {
    entries: RefCell<FxHashMap<ConstructorId, ConstructorMetadata>>,
}

impl Metadata {
    /// Create a new empty metadata store
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Parameter types
    // ========================================================================

    /// Declare the constructor parameter types of `id`
    pub fn set_parameter_types(&self, id: ConstructorId, parameter_types: Vec<Constructor>) {
        self.entries
            .borrow_mut()
            .entry(id)
            .or_default()
            .parameter_types = Some(parameter_types);
    }

    /// Declared parameter types, empty when nothing was declared
    pub fn parameter_types(&self, id: ConstructorId) -> Vec<Constructor> {
        self.entries
            .borrow()
            .get(&id)
            .and_then(|entry| entry.parameter_types.clone())
            .unwrap_or_default()
    }

    /// Check if parameter types were declared for `id`
    pub fn has_parameter_types(&self, id: ConstructorId) -> bool {
        self.entries
            .borrow()
            .get(&id)
            .is_some_and(|entry| entry.parameter_types.is_some())
    }

    // ========================================================================
    // Keyed metadata
    // ========================================================================

    /// Define metadata on a constructor
    pub fn define_metadata(&self, id: ConstructorId, key: impl Into<MetadataKey>, value: Rc<dyn Any>) {
        self.entries
            .borrow_mut()
            .entry(id)
            .or_default()
            .values
            .insert(key.into(), value);
    }

    /// Get metadata from a constructor, if present and of type `T`
    pub fn get_metadata<T: Any>(&self, id: ConstructorId, key: &str) -> Option<Rc<T>> {
        let value = self.entries.borrow().get(&id)?.values.get(key)?.clone();
        value.downcast::<T>().ok()
    }

    /// Check if a constructor has metadata under `key`
    pub fn has_metadata(&self, id: ConstructorId, key: &str) -> bool {
        self.entries
            .borrow()
            .get(&id)
            .is_some_and(|entry| entry.values.contains_key(key))
    }

    /// All metadata keys of a constructor
    pub fn metadata_keys(&self, id: ConstructorId) -> Vec<MetadataKey> {
        self.entries
            .borrow()
            .get(&id)
            .map(|entry| entry.values.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Delete metadata from a constructor.
    /// Returns true if the metadata existed and was deleted
    pub fn delete_metadata(&self, id: ConstructorId, key: &str) -> bool {
        self.entries
            .borrow_mut()
            .get_mut(&id)
            .is_some_and(|entry| entry.values.remove(key).is_some())
    }

    /// Number of constructors with metadata
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructor::Instance;

    fn ctor(name: &str) -> Constructor {
        Constructor::from_fn(name, |_| Ok(Rc::new(()) as Instance))
    }

    #[test]
    fn test_missing_parameter_types_are_empty() {
        let store = Metadata::new();
        let target = ctor("Target");

        assert!(store.parameter_types(target.id()).is_empty());
        assert!(!store.has_parameter_types(target.id()));
    }

    #[test]
    fn test_parameter_types_keep_order() {
        let store = Metadata::new();
        let target = ctor("Target");
        let first = ctor("First");
        let second = ctor("Second");

        store.set_parameter_types(target.id(), vec![first.clone(), second.clone()]);

        assert_eq!(store.parameter_types(target.id()), vec![first, second]);
        assert!(store.has_parameter_types(target.id()));
    }

    #[test]
    fn test_define_and_get_metadata() {
        let store = Metadata::new();
        let target = ctor("Target");

        store.define_metadata(target.id(), "selector", Rc::new("app-root".to_string()));

        assert_eq!(
            store.get_metadata::<String>(target.id(), "selector").as_deref(),
            Some(&"app-root".to_string())
        );
        assert!(store.get_metadata::<u32>(target.id(), "selector").is_none());
        assert!(store.get_metadata::<String>(target.id(), "other").is_none());
    }

    #[test]
    fn test_metadata_keys_and_delete() {
        let store = Metadata::new();
        let target = ctor("Target");

        store.define_metadata(target.id(), "key1", Rc::new(1u8));
        store.define_metadata(target.id(), "key2", Rc::new(2u8));

        let keys = store.metadata_keys(target.id());
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"key1".to_string()));

        assert!(store.delete_metadata(target.id(), "key1"));
        assert!(!store.has_metadata(target.id(), "key1"));
        assert!(!store.delete_metadata(target.id(), "key1"));
    }

    #[test]
    fn test_separate_targets() {
        let store = Metadata::new();
        let first = ctor("First");
        let second = ctor("Second");

        store.define_metadata(first.id(), "key", Rc::new(1u8));
        store.define_metadata(second.id(), "key", Rc::new(2u8));

        assert_eq!(store.get_metadata::<u8>(first.id(), "key").map(|v| *v), Some(1));
        assert_eq!(store.get_metadata::<u8>(second.id(), "key").map(|v| *v), Some(2));
        assert_eq!(store.len(), 2);
    }
}
