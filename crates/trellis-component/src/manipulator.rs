//! Results of manipulator modules
//!
//! A manipulator module turns one template into any number of elements, each
//! pairing a template with the values layer it renders against. A template or
//! values layer may only back one element.

use std::fmt;
use std::rc::Rc;

use crate::error::{ComponentError, ComponentResult};

/// One element produced by a manipulator module
pub struct ManipulatorElement<T, V> {
    /// Template of the element
    pub template: Rc<T>,
    /// Values layer of the element
    pub values: Rc<V>,
}

impl<T, V> Clone for ManipulatorElement<T, V> {
    fn clone(&self) -> Self {
        Self {
            template: Rc::clone(&self.template),
            values: Rc::clone(&self.values),
        }
    }
}

impl<T: fmt::Debug, V: fmt::Debug> fmt::Debug for ManipulatorElement<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManipulatorElement")
            .field("template", &self.template)
            .field("values", &self.values)
            .finish()
    }
}

/// Elements produced by one manipulator run
pub struct ModuleManipulatorResult<T, V> {
    elements: Vec<ManipulatorElement<T, V>>,
}

impl<T, V> ModuleManipulatorResult<T, V> {
    /// Create an empty result
    pub fn new() -> Self {
        Self { elements: Vec::new() }
    }

    /// Add an element.
    ///
    /// Fails if `template` or `values` already backs another element.
    pub fn add_element(&mut self, template: Rc<T>, values: Rc<V>) -> ComponentResult<()> {
        let claimed = self.elements.iter().any(|element| {
            Rc::ptr_eq(&element.template, &template) || Rc::ptr_eq(&element.values, &values)
        });
        if claimed {
            return Err(ComponentError::DuplicateManipulatorTarget);
        }

        self.elements.push(ManipulatorElement { template, values });
        Ok(())
    }

    /// Copy of the element list
    pub fn element_list(&self) -> Vec<ManipulatorElement<T, V>> {
        self.elements.clone()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if no element was added
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<T, V> Default for ModuleManipulatorResult<T, V> {
    fn default() -> Self {
        Self::new()
    }
}
