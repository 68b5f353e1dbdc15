//! Update handler
//!
//! Turns change events of a [`ChangeDetection`] into coalesced, asynchronous
//! update cycles:
//!
//! ```text
//! Idle --(change, enabled)--> Scheduled --(next frame)--> dispatch --> Idle
//! ```
//!
//! The handler leaves `Scheduled` before its listeners run, so a listener
//! that causes another change starts a fresh cycle. Waiters are released once
//! a cycle ends without a follow-up, or immediately on failure.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::channel::oneshot;
use tracing::{debug, error, warn};
use trellis_inject::{Arguments, Injectable, InjectionError, InjectionResult};
use trellis_zone::{ChangeDetection, ChangeReason, ListenerId, ListenerList, Observed};

use crate::config::UpdateConfig;
use crate::error::UpdateError;
use crate::loop_detection::LoopDetectionHandler;

/// Name of detections created for capsuled or detached components
pub const DEFAULT_COMPONENT_ZONE_NAME: &str = "DefaultComponentZone";

/// Name of detections created for manual components
pub const MANUAL_ZONE_NAME: &str = "Manual Zone";

type UpdateListener = dyn Fn(&ChangeReason) -> anyhow::Result<()>;
type Waiter = oneshot::Sender<Result<bool, UpdateError>>;

/// Which change detection a handler listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateScope {
    /// Share the ambient detection
    #[default]
    Default,
    /// Own detection that still reports to the ambient one
    Capsuled,
    /// Isolated detection; updates only happen on request
    Manual,
}

/// Update cycle driver of one component
///
/// Clones share state.
#[derive(Clone)]
pub struct UpdateHandler {
    inner: Rc<HandlerInner>,
}

struct HandlerInner {
    scope: UpdateScope,
    detection: ChangeDetection,
    detection_listener: Cell<Option<ListenerId>>,
    enabled: Cell<bool>,
    scheduled: Cell<bool>,
    listeners: ListenerList<UpdateListener>,
    waiters: RefCell<Vec<Waiter>>,
    loop_detection: LoopDetectionHandler,
}

impl UpdateHandler {
    /// Create a disabled handler with the default configuration
    pub fn new(scope: UpdateScope) -> Self {
        Self::with_config(scope, &UpdateConfig::default())
    }

    /// Create a disabled handler.
    ///
    /// Capsuled scopes and handlers created outside any detection get their
    /// own detection. Manual scopes get an isolated one and never update on
    /// their own.
    pub fn with_config(scope: UpdateScope, config: &UpdateConfig) -> Self {
        let ambient = ChangeDetection::current_none_silent();
        let detection = match (scope, ambient) {
            (UpdateScope::Capsuled, _) | (_, None) => ChangeDetection::new(DEFAULT_COMPONENT_ZONE_NAME),
            (UpdateScope::Manual, Some(_)) => ChangeDetection::isolated(MANUAL_ZONE_NAME),
            (UpdateScope::Default, Some(ambient)) => ambient,
        };

        let handler = Self {
            inner: Rc::new(HandlerInner {
                scope,
                detection,
                detection_listener: Cell::new(None),
                enabled: Cell::new(false),
                scheduled: Cell::new(false),
                listeners: ListenerList::new(),
                waiters: RefCell::new(Vec::new()),
                loop_detection: LoopDetectionHandler::new(config.loop_limit),
            }),
        };

        if scope != UpdateScope::Manual {
            let weak = handler.downgrade();
            let id = handler.inner.detection.add_change_listener(move |reason| {
                if let Some(handler) = upgrade(&weak) {
                    handler.schedule_update(reason);
                }
            });
            handler.inner.detection_listener.set(Some(id));
        }

        let weak = handler.downgrade();
        handler.inner.loop_detection.set_on_error(move |failure| {
            if let Some(handler) = upgrade(&weak) {
                handler.inner.scheduled.set(false);
                handler.release_waiters(Err(failure.clone()));
            }
        });

        debug!(
            ?scope,
            detection = handler.inner.detection.name(),
            loop_limit = config.loop_limit,
            "created update handler"
        );
        handler
    }

    /// Scope the handler was created with
    pub fn scope(&self) -> UpdateScope {
        self.inner.scope
    }

    /// Detection the handler listens to
    pub fn detection(&self) -> &ChangeDetection {
        &self.inner.detection
    }

    /// Check if changes start update cycles
    pub fn enabled(&self) -> bool {
        self.inner.enabled.get()
    }

    /// Enable or disable update cycles.
    ///
    /// Disabling releases every waiter with "no update".
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.set(enabled);
        if !enabled {
            self.release_waiters(Ok(false));
        }
    }

    /// Check if an update cycle is pending
    pub fn is_update_scheduled(&self) -> bool {
        self.inner.scheduled.get()
    }

    /// Listen for update cycles. Listeners run in registration order.
    pub fn add_update_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeReason) -> anyhow::Result<()> + 'static,
    {
        self.inner.listeners.add(Rc::new(listener))
    }

    /// Stop listening for update cycles
    pub fn remove_update_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Execute `function` inside the detection, reported as an interaction
    pub fn execute<F, R>(&self, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.inner.detection.execute(function)
    }

    /// Execute `function` inside the detection without reporting it
    pub fn execute_untracked<F, R>(&self, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.inner.detection.execute_untracked(function)
    }

    /// Wrap `value` so its mutations are reported to the detection
    pub fn register_object<T>(&self, value: T) -> Observed<T> {
        self.inner.detection.register_object(value)
    }

    /// Dispatch a change event on the detection.
    ///
    /// Every handler listening to the detection, or to one of its parents,
    /// schedules an update. A manual handler does not listen to itself.
    pub fn request_update(&self, reason: &ChangeReason) {
        self.inner.detection.dispatch_change_event(reason);
    }

    /// Schedule an update of this handler, then request updates of all
    /// other observers
    pub fn force_update(&self, reason: ChangeReason) {
        self.schedule_update(&reason);
        self.request_update(&reason);
    }

    /// Wait for the pending update cycle.
    ///
    /// Resolves to `Ok(false)` right away while idle, to `Ok(true)` after a
    /// successful cycle and to the error of a failed one. Disabling the
    /// handler before the cycle runs resolves to `Ok(false)`.
    pub fn wait_for_update(&self) -> impl Future<Output = Result<bool, UpdateError>> + 'static {
        let receiver = if self.inner.scheduled.get() {
            let (sender, receiver) = oneshot::channel();
            self.inner.waiters.borrow_mut().push(sender);
            Some(receiver)
        } else {
            None
        };

        async move {
            match receiver {
                // A dropped handler never runs its cycle.
                Some(receiver) => receiver.await.unwrap_or(Ok(false)),
                None => Ok(false),
            }
        }
    }

    /// Detach from the detection, drop all update listeners and disable
    pub fn deconstruct(&self) {
        if let Some(id) = self.inner.detection_listener.take() {
            self.inner.detection.remove_change_listener(id);
        }
        self.inner.listeners.clear();
        self.set_enabled(false);
        debug!(scope = ?self.inner.scope, "deconstructed update handler");
    }

    fn schedule_update(&self, reason: &ChangeReason) {
        if !self.enabled() {
            self.release_waiters(Ok(false));
            return;
        }

        self.inner.scheduled.set(true);

        let weak = self.downgrade();
        let dispatched = reason.clone();
        self.inner.loop_detection.call_asynchron(
            move || {
                if let Some(handler) = upgrade(&weak) {
                    handler.dispatch(&dispatched);
                }
            },
            reason.clone(),
        );
    }

    fn dispatch(&self, reason: &ChangeReason) {
        self.inner.scheduled.set(false);

        if !self.enabled() {
            self.release_waiters(Ok(false));
            return;
        }

        debug!(detection = self.inner.detection.name(), %reason, "dispatch update");
        let listeners = self.inner.listeners.snapshot();
        let outcome = self.inner.detection.execute_untracked(|| {
            listeners.iter().try_for_each(|listener| listener(reason))
        });

        match outcome {
            Err(failure) => {
                error!(detection = self.inner.detection.name(), "update listener failed: {:#}", failure);
                self.release_waiters(Err(UpdateError::Listener(Rc::new(failure))));
            }
            // Chained cycles release once they settle.
            Ok(()) if !self.inner.scheduled.get() => self.release_waiters(Ok(true)),
            Ok(()) => {}
        }
    }

    fn release_waiters(&self, result: Result<bool, UpdateError>) {
        let waiters = std::mem::take(&mut *self.inner.waiters.borrow_mut());
        if waiters.is_empty() {
            return;
        }

        if matches!(result, Ok(false)) {
            warn!(count = waiters.len(), "releasing update waiters without update");
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn downgrade(&self) -> Weak<HandlerInner> {
        Rc::downgrade(&self.inner)
    }
}

fn upgrade(weak: &Weak<HandlerInner>) -> Option<UpdateHandler> {
    weak.upgrade().map(|inner| UpdateHandler { inner })
}

impl std::fmt::Debug for UpdateHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateHandler")
            .field("scope", &self.inner.scope)
            .field("detection", &self.inner.detection.name())
            .field("enabled", &self.enabled())
            .field("scheduled", &self.is_update_scheduled())
            .finish()
    }
}

// ============================================================================
// Local injection handle
// ============================================================================

/// Update handler of the component being built
///
/// Only available as a local injection while a component or module is
/// constructed; declare it as a parameter to receive it.
#[derive(Debug, Clone)]
pub struct ComponentUpdater(pub UpdateHandler);

/// Update handler handed to modules
pub type ModuleUpdater = ComponentUpdater;

impl ComponentUpdater {
    /// Wrap `handler`
    pub fn new(handler: UpdateHandler) -> Self {
        Self(handler)
    }

    /// Wrapped handler
    pub fn handler(&self) -> &UpdateHandler {
        &self.0
    }
}

impl Injectable for ComponentUpdater {
    fn construct(args: &mut Arguments) -> InjectionResult<Self> {
        Err(InjectionError::construction(
            args.constructor(),
            "only available as a local injection",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_zone::{ChangeKind, EventLoop};

    fn enabled(scope: UpdateScope) -> UpdateHandler {
        let handler = UpdateHandler::new(scope);
        handler.set_enabled(true);
        handler
    }

    fn count_updates(handler: &UpdateHandler) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        handler.add_update_listener(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        count
    }

    #[test]
    fn test_wait_while_idle_resolves_false() {
        let handler = enabled(UpdateScope::Default);
        assert!(!handler.is_update_scheduled());
        assert!(!EventLoop::block_on(handler.wait_for_update()).unwrap().unwrap());
    }

    #[test]
    fn test_changes_in_one_turn_coalesce() {
        let handler = enabled(UpdateScope::Capsuled);
        let updates = count_updates(&handler);

        for _ in 0..5 {
            handler.request_update(&ChangeReason::manual());
        }
        assert!(handler.is_update_scheduled());

        let result = EventLoop::block_on(handler.wait_for_update()).unwrap();
        assert!(result.unwrap());
        assert_eq!(updates.get(), 1);
        assert!(!handler.is_update_scheduled());
    }

    #[test]
    fn test_change_after_loop_reset_releases_waiters() {
        let handler = enabled(UpdateScope::Capsuled);
        let updates = count_updates(&handler);

        handler.request_update(&ChangeReason::manual());
        EventLoop::reset();
        assert!(handler.is_update_scheduled());

        let waiter = handler.wait_for_update();
        handler.request_update(&ChangeReason::manual());

        assert!(EventLoop::block_on(waiter).unwrap().unwrap());
        assert_eq!(updates.get(), 1);
        assert!(!handler.is_update_scheduled());
    }

    #[test]
    fn test_observed_mutation_schedules_update() {
        let handler = enabled(UpdateScope::Default);
        let updates = count_updates(&handler);
        let state = handler.register_object(0u32);

        state.set("value", 3);
        EventLoop::run_until_idle();

        assert_eq!(updates.get(), 1);
    }

    #[test]
    fn test_listener_error_rejects_all_waiters() {
        let handler = enabled(UpdateScope::Default);
        handler.add_update_listener(|_| Err(anyhow::anyhow!("render failed")));

        handler.force_update(ChangeReason::manual());
        let first = handler.wait_for_update();
        let second = handler.wait_for_update();

        let results = EventLoop::block_on(futures::future::join(first, second)).unwrap();
        for result in [results.0, results.1] {
            match result {
                Err(UpdateError::Listener(error)) => assert_eq!(error.to_string(), "render failed"),
                other => panic!("Expected listener error, got {:?}", other),
            }
        }
        assert!(EventLoop::take_uncaught_errors().is_empty());
    }

    #[test]
    fn test_listener_error_stops_later_listeners() {
        let handler = enabled(UpdateScope::Default);
        handler.add_update_listener(|_| anyhow::bail!("first"));
        let later = count_updates(&handler);

        handler.force_update(ChangeReason::manual());
        EventLoop::run_until_idle();

        assert_eq!(later.get(), 0);
    }

    #[test]
    fn test_self_triggering_listener_hits_loop_limit() {
        let handler = enabled(UpdateScope::Default);
        let state = handler.register_object(0u32);
        let runs = Rc::new(Cell::new(0));

        let writer = state.clone();
        let counter = runs.clone();
        handler.add_update_listener(move |_| {
            counter.set(counter.get() + 1);
            writer.update("value", |value| *value += 1);
            Ok(())
        });

        handler.force_update(ChangeReason::manual());
        let result = EventLoop::block_on(handler.wait_for_update()).unwrap();

        match result {
            Err(UpdateError::LoopDetected { limit, .. }) => assert_eq!(limit, 10),
            other => panic!("Expected LoopDetected, got {:?}", other),
        }
        assert_eq!(runs.get(), 10);
        assert!(!handler.is_update_scheduled());
        assert_eq!(EventLoop::take_uncaught_errors().len(), 1);
    }

    #[test]
    fn test_configured_loop_limit() {
        let config = UpdateConfig {
            loop_limit: 3,
            ..UpdateConfig::default()
        };
        let handler = UpdateHandler::with_config(UpdateScope::Capsuled, &config);
        handler.set_enabled(true);

        let again = handler.clone();
        handler.add_update_listener(move |reason| {
            again.force_update(reason.clone());
            Ok(())
        });

        handler.force_update(ChangeReason::manual());
        let result = EventLoop::block_on(handler.wait_for_update()).unwrap();
        assert!(matches!(result, Err(UpdateError::LoopDetected { limit: 3, .. })));
        let _ = EventLoop::take_uncaught_errors();
    }

    #[test]
    fn test_disable_mid_flight_resolves_false() {
        let handler = enabled(UpdateScope::Default);
        let updates = count_updates(&handler);

        handler.force_update(ChangeReason::manual());
        let waiter = handler.wait_for_update();
        handler.set_enabled(false);

        assert!(!EventLoop::block_on(waiter).unwrap().unwrap());
        EventLoop::run_until_idle();
        assert_eq!(updates.get(), 0);
    }

    #[test]
    fn test_disabled_handler_ignores_changes() {
        let handler = UpdateHandler::new(UpdateScope::Default);
        let updates = count_updates(&handler);

        handler.request_update(&ChangeReason::manual());
        EventLoop::run_until_idle();

        assert!(!handler.enabled());
        assert!(!handler.is_update_scheduled());
        assert_eq!(updates.get(), 0);
    }

    #[test]
    fn test_scope_selection() {
        let outside = UpdateHandler::new(UpdateScope::Default);
        assert_eq!(outside.detection().name(), DEFAULT_COMPONENT_ZONE_NAME);

        let ambient = ChangeDetection::new("Ambient");
        let (default, capsuled, manual) = ambient.execute_untracked(|| {
            (
                UpdateHandler::new(UpdateScope::Default),
                UpdateHandler::new(UpdateScope::Capsuled),
                UpdateHandler::new(UpdateScope::Manual),
            )
        });

        assert_eq!(default.detection(), &ambient);
        assert_eq!(capsuled.detection().name(), DEFAULT_COMPONENT_ZONE_NAME);
        assert_eq!(capsuled.detection().parent(), Some(ambient.clone()));
        assert_eq!(manual.detection().name(), MANUAL_ZONE_NAME);
        assert!(manual.detection().parent().is_none());
    }

    #[test]
    fn test_default_scope_skips_silent_detection() {
        let ambient = ChangeDetection::new("Ambient");
        let handler = ambient.silent_execution(|| UpdateHandler::new(UpdateScope::Default));
        assert_eq!(handler.detection(), &ambient);
    }

    #[test]
    fn test_capsuled_changes_reach_parent_handler() {
        let ambient = ChangeDetection::new("Ambient");
        let (parent, child) = ambient.execute_untracked(|| {
            (enabled(UpdateScope::Default), enabled(UpdateScope::Capsuled))
        });
        let parent_updates = count_updates(&parent);
        let child_updates = count_updates(&child);

        child.request_update(&ChangeReason::new(ChangeKind::PropertySet));
        EventLoop::run_until_idle();

        assert_eq!(child_updates.get(), 1);
        assert_eq!(parent_updates.get(), 1);
    }

    #[test]
    fn test_capsuled_created_silently_reaches_parent_handler() {
        let ambient = ChangeDetection::new("Ambient");
        let parent = ambient.execute_untracked(|| enabled(UpdateScope::Default));
        let child = ambient.silent_execution(|| enabled(UpdateScope::Capsuled));
        let parent_updates = count_updates(&parent);

        assert_eq!(child.detection().parent(), Some(ambient.clone()));
        child.request_update(&ChangeReason::manual());
        EventLoop::run_until_idle();

        assert_eq!(parent_updates.get(), 1);
    }

    #[test]
    fn test_manual_scope_updates_only_on_force() {
        let ambient = ChangeDetection::new("Ambient");
        let manual = ambient.execute_untracked(|| enabled(UpdateScope::Manual));
        let updates = count_updates(&manual);

        ambient.dispatch_change_event(&ChangeReason::manual());
        manual.request_update(&ChangeReason::manual());
        manual.register_object(1u8).set("value", 2);
        EventLoop::run_until_idle();
        assert_eq!(updates.get(), 0);

        manual.force_update(ChangeReason::manual());
        EventLoop::run_until_idle();
        assert_eq!(updates.get(), 1);
    }

    #[test]
    fn test_listener_mutation_does_not_retrigger_through_interaction() {
        let handler = enabled(UpdateScope::Capsuled);
        let updates = count_updates(&handler);

        handler.force_update(ChangeReason::manual());
        EventLoop::run_until_idle();
        EventLoop::run_until_idle();

        assert_eq!(updates.get(), 1);
    }

    #[test]
    fn test_deconstruct_detaches() {
        let handler = enabled(UpdateScope::Capsuled);
        let updates = count_updates(&handler);
        let listeners = handler.detection().listener_count();

        handler.deconstruct();
        handler.request_update(&ChangeReason::manual());
        EventLoop::run_until_idle();

        assert_eq!(handler.detection().listener_count(), listeners - 1);
        assert!(!handler.enabled());
        assert_eq!(updates.get(), 0);
    }

    #[test]
    fn test_component_updater_is_local_only() {
        let register = trellis_inject::InjectionRegister::new();
        let constructor = register.register_type::<ComponentUpdater>(trellis_inject::InjectMode::Instanced);
        assert!(register.create_object(&constructor).is_err());
    }
}
