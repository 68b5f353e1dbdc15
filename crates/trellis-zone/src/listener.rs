//! Ordered listener lists
//!
//! Listeners are kept in registration order and identified by a
//! [`ListenerId`]. Dispatch works on a snapshot, so a listener may add or
//! remove listeners while it runs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle of a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Numeric id value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Ordered list of shared listeners
pub struct ListenerList<L: ?Sized> {
    entries: RefCell<Vec<(ListenerId, Rc<L>)>>,
    next_id: Cell<u64>,
}

impl<L: ?Sized> ListenerList<L> {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    /// Append a listener
    pub fn add(&self, listener: Rc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries.borrow_mut().push((id, listener));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Listeners in registration order
    pub fn snapshot(&self) -> Vec<Rc<L>> {
        self.entries
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect()
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Check if there are no listeners
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl<L: ?Sized> Default for ListenerList<L> {
    fn default() -> Self {
        Self::new()
    }
}
