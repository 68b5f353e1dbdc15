//! Observed objects
//!
//! [`Observed`] is the mutation boundary of a registered object. Every write
//! goes through it and dispatches a change event on the owning detection
//! synchronously after the write, so listeners already see the new value.
//! While the ambient detection is silent, writes dispatch nothing.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::change_detection::{ChangeDetection, ChangeKind, ChangeReason, WeakChangeDetection};
use crate::zone::InteractionSource;

/// Object whose mutations are reported to a change detection
///
/// Clones share the value and the detection. Closures passed to the
/// mutating methods must not access the same object again.
pub struct Observed<T> {
    inner: Rc<ObservedInner<T>>,
}

struct ObservedInner<T> {
    value: RefCell<T>,
    detection: WeakChangeDetection,
}

impl ChangeDetection {
    /// Wrap `value` so its mutations dispatch on this detection
    pub fn register_object<T>(&self, value: T) -> Observed<T> {
        Observed {
            inner: Rc::new(ObservedInner {
                value: RefCell::new(value),
                detection: self.downgrade(),
            }),
        }
    }
}

impl<T> Observed<T> {
    /// Borrow the current value
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.value.borrow()
    }

    /// Copy of the current value
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Replace the value, reporting a write of `property`
    pub fn set(&self, property: &str, value: T) {
        self.mutate(ChangeKind::PropertySet, property, None, |slot| *slot = value);
    }

    /// Modify the value in place, reporting a write of `property`
    pub fn update<F, R>(&self, property: &str, function: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let source = InteractionSource::of(&function);
        self.mutate(ChangeKind::PropertySet, property, Some(source), function)
    }

    /// Remove `property` through `function`, reporting a delete
    pub fn delete<F, R>(&self, property: &str, function: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let source = InteractionSource::of(&function);
        self.mutate(ChangeKind::PropertyDelete, property, Some(source), function)
    }

    /// Call `method` on the value inside the owning zone, reporting the call
    pub fn call<F, R>(&self, method: &str, function: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let source = InteractionSource::of(&function);
        let run = || {
            let mut value = self.inner.value.borrow_mut();
            function(&mut *value)
        };

        let result = match self.inner.detection.upgrade() {
            Some(detection) => detection.execute_untracked(run),
            None => run(),
        };

        self.notify(ChangeReason::property(ChangeKind::FunctionCall, method).with_source(source));
        result
    }

    /// Detection the object reports to, if it is still alive
    pub fn detection(&self) -> Option<ChangeDetection> {
        self.inner.detection.upgrade()
    }

    /// Check if both handles share one value
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn mutate<F, R>(
        &self,
        kind: ChangeKind,
        property: &str,
        source: Option<InteractionSource>,
        function: F,
    ) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let result = {
            let mut value = self.inner.value.borrow_mut();
            function(&mut *value)
        };

        let mut reason = ChangeReason::property(kind, property);
        reason.source = source;
        self.notify(reason);
        result
    }

    fn notify(&self, reason: ChangeReason) {
        if ChangeDetection::current().is_some_and(|current| current.is_silent()) {
            return;
        }
        if let Some(detection) = self.inner.detection.upgrade() {
            detection.dispatch_change_event(&reason);
        }
    }
}

impl<T> Clone for Observed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.value.try_borrow() {
            Ok(value) => f.debug_tuple("Observed").field(&*value).finish(),
            Err(_) => f.write_str("Observed(<borrowed>)"),
        }
    }
}
