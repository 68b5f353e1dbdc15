//! Change detection
//!
//! A [`ChangeDetection`] owns one [`ExecutionZone`] and turns everything that
//! happens inside it into change events: interactions reported by the zone,
//! mutations of registered objects and manual dispatches. Listeners run in
//! registration order; afterwards the event bubbles to the parent detection
//! that was ambient when this one was created.
//!
//! A detection is found from its zone, so `ChangeDetection::current()` is
//! whatever detection owns `ExecutionZone::current()`.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::listener::{ListenerId, ListenerList};
use crate::zone::{ExecutionZone, InteractionSource, ZoneId};

type ChangeListener = dyn Fn(&ChangeReason);

thread_local! {
    /// Zone id to owning detection
    static DETECTIONS: RefCell<FxHashMap<ZoneId, Weak<DetectionInner>>> =
        RefCell::new(FxHashMap::default());
}

// ============================================================================
// Change reasons
// ============================================================================

/// What kind of change was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A zone-executed function returned
    Interaction,
    /// A property of a registered object was written
    PropertySet,
    /// A property of a registered object was removed
    PropertyDelete,
    /// A method of a registered object was called
    FunctionCall,
    /// Explicit update request
    Manual,
}

/// Description of a change, passed to every listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReason {
    /// Kind of change
    pub kind: ChangeKind,
    /// Function that caused the change, when known
    pub source: Option<InteractionSource>,
    /// Property or method name, when known
    pub property: Option<String>,
    /// Stack trace captured where the change happened
    pub stacktrace: String,
}

impl ChangeReason {
    /// Reason of `kind`, capturing the current stack trace
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            kind,
            source: None,
            property: None,
            stacktrace: Backtrace::capture().to_string(),
        }
    }

    /// Explicit update request
    pub fn manual() -> Self {
        Self::new(ChangeKind::Manual)
    }

    /// Reason for a zone interaction
    pub fn interaction(source: InteractionSource, stacktrace: &str) -> Self {
        Self {
            kind: ChangeKind::Interaction,
            source: Some(source),
            property: None,
            stacktrace: stacktrace.to_string(),
        }
    }

    /// Reason for a change to `property`
    pub fn property(kind: ChangeKind, property: impl Into<String>) -> Self {
        Self {
            property: Some(property.into()),
            ..Self::new(kind)
        }
    }

    /// Attach the function that caused the change
    pub fn with_source(mut self, source: InteractionSource) -> Self {
        self.source = Some(source);
        self
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(property) = &self.property {
            write!(f, " \"{}\"", property)?;
        }
        if let Some(source) = &self.source {
            write!(f, " by {}", source)?;
        }
        Ok(())
    }
}

// ============================================================================
// Change detection
// ============================================================================

/// Change detection context
///
/// Clones share listeners and zone.
#[derive(Clone)]
pub struct ChangeDetection {
    inner: Rc<DetectionInner>,
}

struct DetectionInner {
    zone: ExecutionZone,
    parent: Option<Weak<DetectionInner>>,
    silent: bool,
    listeners: ListenerList<ChangeListener>,
    /// Lazily created silent child used by `silent_execution`
    silent_child: RefCell<Option<ChangeDetection>>,
}

impl Drop for DetectionInner {
    fn drop(&mut self) {
        let id = self.zone.id();
        let _ = DETECTIONS.try_with(|detections| {
            if let Ok(mut detections) = detections.try_borrow_mut() {
                detections.remove(&id);
            }
        });
    }
}

impl ChangeDetection {
    /// Create a detection that bubbles its changes to the ambient detection.
    ///
    /// Silent detections are skipped when looking for the parent.
    pub fn new(name: &str) -> Self {
        let parent = Self::current_none_silent();
        Self::build(name, parent.as_ref(), false)
    }

    /// Create a detection without a parent
    pub fn isolated(name: &str) -> Self {
        Self::build(name, None, false)
    }

    fn build(name: &str, parent: Option<&ChangeDetection>, silent: bool) -> Self {
        let inner = Rc::new(DetectionInner {
            zone: ExecutionZone::new(name),
            parent: parent.map(|parent| Rc::downgrade(&parent.inner)),
            silent,
            listeners: ListenerList::new(),
            silent_child: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        let on_interaction = move |_zone: &str, source: InteractionSource, stacktrace: &str| {
            if let Some(inner) = weak.upgrade() {
                let detection = ChangeDetection { inner };
                detection.dispatch_change_event(&ChangeReason::interaction(source, stacktrace));
            }
        };
        inner.zone.set_on_interaction(Some(Rc::new(on_interaction)));

        DETECTIONS.with(|detections| {
            detections
                .borrow_mut()
                .insert(inner.zone.id(), Rc::downgrade(&inner));
        });

        debug!(
            name,
            silent,
            has_parent = parent.is_some(),
            "created change detection"
        );
        Self { inner }
    }

    /// Detection owning the current zone, if any
    pub fn current() -> Option<ChangeDetection> {
        let id = ExecutionZone::current().id();
        DETECTIONS
            .with(|detections| detections.borrow().get(&id).and_then(Weak::upgrade))
            .map(|inner| ChangeDetection { inner })
    }

    /// Nearest non-silent detection, starting at the current one
    pub fn current_none_silent() -> Option<ChangeDetection> {
        let mut detection = Self::current()?;
        while detection.is_silent() {
            detection = detection.parent()?;
        }
        Some(detection)
    }

    /// Detection name, shared with its zone
    pub fn name(&self) -> &str {
        self.inner.zone.name()
    }

    /// Owned zone
    pub fn zone(&self) -> &ExecutionZone {
        &self.inner.zone
    }

    /// Parent detection, if it is still alive
    pub fn parent(&self) -> Option<ChangeDetection> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| ChangeDetection { inner })
    }

    /// Check if this detection suppresses dispatch
    pub fn is_silent(&self) -> bool {
        self.inner.silent
    }

    /// Listen for changes
    pub fn add_change_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeReason) + 'static,
    {
        self.inner.listeners.add(Rc::new(listener))
    }

    /// Stop listening. Unknown ids are ignored.
    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Call every listener in registration order, then bubble to the parent.
    ///
    /// Does nothing for a silent detection.
    pub fn dispatch_change_event(&self, reason: &ChangeReason) {
        if self.is_silent() {
            return;
        }

        trace!(detection = self.name(), %reason, "dispatch change event");
        for listener in self.inner.listeners.snapshot() {
            listener(reason);
        }

        if let Some(parent) = self.parent() {
            parent.dispatch_change_event(reason);
        }
    }

    /// Execute `function` inside the owned zone.
    ///
    /// The execution itself is reported as an interaction.
    pub fn execute<F, R>(&self, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.inner.zone.execute_in_zone(function)
    }

    /// Execute `function` inside the owned zone without reporting the
    /// execution as an interaction.
    ///
    /// Registered objects mutated inside `function` still dispatch.
    pub fn execute_untracked<F, R>(&self, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.inner.zone.execute_in_zone_silent(function)
    }

    /// Execute `function` inside a silent child detection.
    ///
    /// Nothing executed or scheduled from there dispatches a change.
    pub fn silent_execution<F, R>(&self, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        let silent = self.silent_child();
        silent.inner.zone.execute_in_zone_silent(function)
    }

    fn silent_child(&self) -> ChangeDetection {
        if self.is_silent() {
            return self.clone();
        }

        self.inner
            .silent_child
            .borrow_mut()
            .get_or_insert_with(|| Self::build(self.name(), Some(self), true))
            .clone()
    }

    pub(crate) fn downgrade(&self) -> WeakChangeDetection {
        WeakChangeDetection(Rc::downgrade(&self.inner))
    }
}

impl PartialEq for ChangeDetection {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ChangeDetection {}

impl fmt::Debug for ChangeDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeDetection")
            .field("name", &self.name())
            .field("silent", &self.inner.silent)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Non-owning reference to a detection
#[derive(Clone)]
pub(crate) struct WeakChangeDetection(Weak<DetectionInner>);

impl WeakChangeDetection {
    pub(crate) fn upgrade(&self) -> Option<ChangeDetection> {
        self.0.upgrade().map(|inner| ChangeDetection { inner })
    }
}
