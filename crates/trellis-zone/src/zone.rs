//! Execution zones
//!
//! A zone is a named synchronous execution context. Exactly one zone is
//! current at any instant; entering a zone saves the previous one and an
//! RAII guard restores it on every exit path, including `?` returns and
//! unwinding panics. When nothing else is active the current zone is the
//! zone named `"Default"`.

use std::any::type_name;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Name of the zone that is current when no other zone is active
pub const DEFAULT_ZONE_NAME: &str = "Default";

/// Callback fired when a zone-executed function returns.
///
/// Arguments: zone name, executed function, captured stack trace.
pub type InteractionCallback = Rc<dyn Fn(&str, InteractionSource, &str)>;

static NEXT_ZONE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static DEFAULT_ZONE: ExecutionZone = ExecutionZone::new(DEFAULT_ZONE_NAME);
    static CURRENT_ZONE: RefCell<Option<ExecutionZone>> = const { RefCell::new(None) };
}

/// Identity of a zone instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneId(u64);

/// The function a zone executed, identified by its type name.
///
/// Every closure has a distinct type, so two sources compare equal exactly
/// when they come from the same closure or function item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InteractionSource(&'static str);

impl InteractionSource {
    /// Source for a function value
    pub fn of<F>(_function: &F) -> Self {
        InteractionSource(type_name::<F>())
    }

    /// Source with an explicit label
    pub fn named(label: &'static str) -> Self {
        InteractionSource(label)
    }

    /// Type name or label of the source
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for InteractionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Named execution context
#[derive(Clone)]
pub struct ExecutionZone {
    inner: Rc<ZoneInner>,
}

struct ZoneInner {
    id: ZoneId,
    name: String,
    on_interaction: RefCell<Option<InteractionCallback>>,
    /// Active silent executions of this zone
    silent_depth: Cell<usize>,
}

impl ExecutionZone {
    /// Create a new zone
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(ZoneInner {
                id: ZoneId(NEXT_ZONE_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.into(),
                on_interaction: RefCell::new(None),
                silent_depth: Cell::new(0),
            }),
        }
    }

    /// The zone presently executing
    pub fn current() -> ExecutionZone {
        CURRENT_ZONE
            .with(|current| current.borrow().clone())
            .unwrap_or_else(|| DEFAULT_ZONE.with(ExecutionZone::clone))
    }

    /// Zone name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Zone identity
    pub fn id(&self) -> ZoneId {
        self.inner.id
    }

    /// Interaction callback, if set
    pub fn on_interaction(&self) -> Option<InteractionCallback> {
        self.inner.on_interaction.borrow().clone()
    }

    /// Set or clear the interaction callback
    pub fn set_on_interaction(&self, callback: Option<InteractionCallback>) {
        *self.inner.on_interaction.borrow_mut() = callback;
    }

    /// Check if a silent execution of this zone is running
    pub fn is_silent(&self) -> bool {
        self.inner.silent_depth.get() > 0
    }

    /// Execute `function` with this zone current.
    ///
    /// The interaction callback fires once after `function` returns,
    /// unless a silent execution of this zone is in progress.
    pub fn execute_in_zone<F, R>(&self, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        let source = InteractionSource::of(&function);
        self.execute_in_zone_as(source, function)
    }

    /// Execute `function` with this zone current, reporting `source` as the
    /// executed function.
    pub fn execute_in_zone_as<F, R>(&self, source: InteractionSource, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ZoneGuard::enter(self);
        let result = function();
        self.dispatch_interaction(source);
        result
    }

    /// Execute `function` with this zone current without firing the
    /// interaction callback, including for nested executions of this zone.
    pub fn execute_in_zone_silent<F, R>(&self, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ZoneGuard::enter(self);
        let _silent = SilentGuard::enter(&self.inner.silent_depth);
        function()
    }

    fn dispatch_interaction(&self, source: InteractionSource) {
        if self.is_silent() {
            return;
        }

        // Release the borrow before calling out.
        let callback = self.inner.on_interaction.borrow().clone();
        if let Some(callback) = callback {
            let stacktrace = Backtrace::capture().to_string();
            callback(self.name(), source, &stacktrace);
        }
    }
}

impl PartialEq for ExecutionZone {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ExecutionZone {}

impl fmt::Debug for ExecutionZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionZone")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("silent", &self.is_silent())
            .finish()
    }
}

/// RAII guard that makes a zone current
///
/// Restores the previous zone on drop.
struct ZoneGuard {
    previous: Option<ExecutionZone>,
}

impl ZoneGuard {
    fn enter(zone: &ExecutionZone) -> Self {
        let previous = CURRENT_ZONE.with(|current| current.borrow_mut().replace(zone.clone()));
        Self { previous }
    }
}

impl Drop for ZoneGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // The slot may already be gone during thread teardown.
        let _ = CURRENT_ZONE.try_with(|current| *current.borrow_mut() = previous);
    }
}

/// RAII guard for the silent execution counter
struct SilentGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> SilentGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for SilentGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_current_defaults_to_default_zone() {
        assert_eq!(ExecutionZone::current().name(), "Default");
    }

    #[test]
    fn test_name() {
        let zone = ExecutionZone::new("ZoneName");
        assert_eq!(zone.name(), "ZoneName");
    }

    #[test]
    fn test_on_interaction_set_and_empty() {
        let zone = ExecutionZone::new("Name");
        assert!(zone.on_interaction().is_none());

        let callback: InteractionCallback = Rc::new(|_: &str, _: InteractionSource, _: &str| {});
        zone.set_on_interaction(Some(callback.clone()));

        let stored = zone.on_interaction().unwrap();
        assert!(Rc::ptr_eq(&stored, &callback));
    }

    #[test]
    fn test_execute_in_zone_sets_current() {
        let zone = ExecutionZone::new("ZoneName");
        let name = zone.execute_in_zone(|| ExecutionZone::current().name().to_string());

        assert_eq!(name, "ZoneName");
        assert_eq!(ExecutionZone::current().name(), "Default");
    }

    #[test]
    fn test_execute_in_zone_returns_value() {
        let zone = ExecutionZone::new("Name");
        let parameter = "ExecutionResult";
        assert_eq!(zone.execute_in_zone(|| parameter), "ExecutionResult");
    }

    #[test]
    fn test_error_restores_zone() {
        let zone = ExecutionZone::new("ZoneName");
        let mut inside = String::new();

        let result: Result<(), &str> = zone.execute_in_zone(|| {
            inside = ExecutionZone::current().name().to_string();
            Err("ErrorName")
        });

        assert_eq!(inside, "ZoneName");
        assert_eq!(result, Err("ErrorName"));
        assert_eq!(ExecutionZone::current().name(), "Default");
    }

    #[test]
    fn test_panic_restores_zone() {
        let zone = ExecutionZone::new("ZoneName");

        let result = catch_unwind(AssertUnwindSafe(|| {
            zone.execute_in_zone(|| panic!("inside zone"));
        }));

        assert!(result.is_err());
        assert_eq!(ExecutionZone::current().name(), "Default");
    }

    #[test]
    fn test_nested_zones_restore_lifo() {
        let outer = ExecutionZone::new("Outer");
        let inner = ExecutionZone::new("Inner");

        let names = outer.execute_in_zone(|| {
            let nested = inner.execute_in_zone(|| ExecutionZone::current().name().to_string());
            (nested, ExecutionZone::current().name().to_string())
        });

        assert_eq!(names, ("Inner".to_string(), "Outer".to_string()));
        assert_eq!(ExecutionZone::current().name(), "Default");
    }

    #[test]
    fn test_interaction_callback() {
        let zone = ExecutionZone::new("ZoneName");
        let calls: Rc<RefCell<Vec<(String, InteractionSource)>>> = Rc::default();

        let recorded = calls.clone();
        zone.set_on_interaction(Some(Rc::new(move |name: &str, source: InteractionSource, _stack: &str| {
            recorded.borrow_mut().push((name.to_string(), source));
        })));

        let function = || {};
        let expected = InteractionSource::of(&function);
        zone.execute_in_zone(function);

        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "ZoneName");
        assert_eq!(calls[0].1, expected);
    }

    #[test]
    fn test_silent_execution_skips_interaction() {
        let zone = ExecutionZone::new("ZoneName");
        let called = Rc::new(Cell::new(false));

        let flag = called.clone();
        zone.set_on_interaction(Some(Rc::new(move |_: &str, _: InteractionSource, _: &str| flag.set(true))));

        let name = zone.execute_in_zone_silent(|| {
            // Nested executions of the same zone stay silent.
            zone.execute_in_zone(|| {});
            ExecutionZone::current().name().to_string()
        });

        assert_eq!(name, "ZoneName");
        assert!(!called.get());
        assert!(!zone.is_silent());
        assert_eq!(ExecutionZone::current().name(), "Default");
    }
}
