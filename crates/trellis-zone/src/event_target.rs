//! Zone-aware event targets
//!
//! Listeners remember the zone that was current when they were added and
//! run inside it on dispatch.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::listener::{ListenerId, ListenerList};
use crate::zone::{ExecutionZone, InteractionSource};

/// A dispatched event
#[derive(Clone)]
pub struct Event {
    kind: String,
    detail: Option<Rc<dyn Any>>,
}

impl Event {
    /// Event without payload
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: None,
        }
    }

    /// Event carrying `detail`
    pub fn with_detail<T: Any>(kind: impl Into<String>, detail: T) -> Self {
        Self {
            kind: kind.into(),
            detail: Some(Rc::new(detail)),
        }
    }

    /// Event kind, e.g. `"click"`
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Payload, if it has type `T`
    pub fn detail<T: Any>(&self) -> Option<&T> {
        self.detail.as_deref().and_then(|detail| detail.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("has_detail", &self.detail.is_some())
            .finish()
    }
}

struct ZoneListener {
    zone: ExecutionZone,
    source: InteractionSource,
    callback: Box<dyn Fn(&Event)>,
}

/// Target that events can be dispatched to
///
/// Clones share the same listener table.
#[derive(Clone, Default)]
pub struct EventTarget {
    listeners: Rc<RefCell<FxHashMap<String, Rc<ListenerList<ZoneListener>>>>>,
}

impl EventTarget {
    /// Create a target without listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for events of `kind`
    pub fn add_event_listener<F>(&self, kind: &str, callback: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        let listener = ZoneListener {
            zone: ExecutionZone::current(),
            source: InteractionSource::of(&callback),
            callback: Box::new(callback),
        };

        let list = Rc::clone(
            self.listeners
                .borrow_mut()
                .entry(kind.to_string())
                .or_default(),
        );
        list.add(Rc::new(listener))
    }

    /// Stop listening. Unknown ids are ignored.
    pub fn remove_event_listener(&self, kind: &str, id: ListenerId) -> bool {
        let list = self.listeners.borrow().get(kind).cloned();
        list.is_some_and(|list| list.remove(id))
    }

    /// Dispatch `event` to every listener of its kind, in registration order.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch_event(&self, event: &Event) -> usize {
        let Some(list) = self.listeners.borrow().get(event.kind()).cloned() else {
            return 0;
        };

        let listeners = list.snapshot();
        trace!(kind = event.kind(), listeners = listeners.len(), "dispatch event");
        for listener in &listeners {
            listener
                .zone
                .execute_in_zone_as(listener.source, || (listener.callback)(event));
        }
        listeners.len()
    }

    /// Number of listeners for `kind`
    pub fn listener_count(&self, kind: &str) -> usize {
        self.listeners
            .borrow()
            .get(kind)
            .map_or(0, |list| list.len())
    }
}
