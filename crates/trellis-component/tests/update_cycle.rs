//! Integration tests for loop detection and configured update cycles

use std::cell::Cell;
use std::rc::Rc;

use trellis_component::{
    Component, ComponentLifecycle, ComponentRegistry, ComponentSettings, ComponentUpdater, UpdateConfig,
    UpdateError, UpdateHandler, UpdateScope,
};
use trellis_inject::{Arguments, Constructor, Injectable, InjectionRegister, InjectionResult};
use trellis_zone::{ChangeKind, ChangeReason, EventLoop, Observed};

/// Writes its own state on every render
struct Runaway {
    state: Observed<u64>,
    renders: Cell<usize>,
}

impl Injectable for Runaway {
    fn parameter_types() -> Vec<Constructor> {
        vec![Constructor::of::<ComponentUpdater>()]
    }

    fn construct(args: &mut Arguments) -> InjectionResult<Self> {
        let updater: Rc<ComponentUpdater> = args.take()?;
        Ok(Runaway {
            state: updater.handler().register_object(0),
            renders: Cell::new(0),
        })
    }
}

impl ComponentLifecycle for Runaway {
    fn on_update(&self) -> anyhow::Result<()> {
        self.renders.set(self.renders.get() + 1);
        self.state.update("ticks", |ticks| *ticks += 1);
        Ok(())
    }
}

/// Writes its state until it reaches a target
struct Converging {
    state: Observed<u64>,
}

impl Injectable for Converging {
    fn parameter_types() -> Vec<Constructor> {
        vec![Constructor::of::<ComponentUpdater>()]
    }

    fn construct(args: &mut Arguments) -> InjectionResult<Self> {
        let updater: Rc<ComponentUpdater> = args.take()?;
        Ok(Converging {
            state: updater.handler().register_object(0),
        })
    }
}

impl ComponentLifecycle for Converging {
    fn on_update(&self) -> anyhow::Result<()> {
        if self.state.get() < 4 {
            self.state.update("value", |value| *value += 1);
        }
        Ok(())
    }
}

fn registry(config: UpdateConfig) -> ComponentRegistry {
    let mut registry = ComponentRegistry::with_config(Rc::new(InjectionRegister::new()), config);
    registry
        .define::<Runaway>(ComponentSettings::new("app-runaway"))
        .unwrap();
    registry
        .define::<Converging>(ComponentSettings::new("app-converging").with_update_scope(UpdateScope::Capsuled))
        .unwrap();
    registry
}

#[test]
fn test_runaway_component_fails_after_limit() {
    let registry = registry(UpdateConfig::default());
    let component = Component::create(&registry, "app-runaway").unwrap();

    component.connected();
    let result = EventLoop::block_on(component.wait_for_update()).unwrap();

    match result {
        Err(UpdateError::LoopDetected { limit, chain }) => {
            assert_eq!(limit, 10);
            assert_eq!(chain.len(), 11);
            assert_eq!(chain[0], "Manual");
            assert!(chain[1].starts_with("PropertySet \"ticks\""));
        }
        other => panic!("Expected LoopDetected, got {:?}", other),
    }

    let runaway = component.instance::<Runaway>().unwrap();
    assert_eq!(runaway.renders.get(), 10);
    assert!(!EventLoop::has_pending_tasks());
    assert_eq!(EventLoop::take_uncaught_errors().len(), 1);
}

#[test]
fn test_converging_component_settles() {
    let registry = registry(UpdateConfig::default());
    let component = Component::create(&registry, "app-converging").unwrap();

    component.connected();
    let result = EventLoop::block_on(component.wait_for_update()).unwrap();

    assert!(result.unwrap());
    assert_eq!(component.instance::<Converging>().unwrap().state.get(), 4);
    assert!(EventLoop::take_uncaught_errors().is_empty());
}

#[test]
fn test_loop_limit_from_toml() {
    let config = UpdateConfig::from_toml_str(
        r#"
        [update]
        loop_limit = 2
        frame_interval_ms = 10
        "#,
    )
    .unwrap();
    let registry = registry(config);
    let component = Component::create(&registry, "app-converging").unwrap();

    component.connected();
    let result = EventLoop::block_on(component.wait_for_update()).unwrap();

    assert!(matches!(result, Err(UpdateError::LoopDetected { limit: 2, .. })));
    assert_eq!(component.instance::<Converging>().unwrap().state.get(), 2);
    assert_eq!(EventLoop::frame_interval(), 10);
    let _ = EventLoop::take_uncaught_errors();
}

#[test]
fn test_handler_recovers_after_loop_error() {
    let handler = UpdateHandler::new(UpdateScope::Capsuled);
    handler.set_enabled(true);
    let state = handler.register_object(0u32);
    let renders = Rc::new(Cell::new(0));

    let writer = state.clone();
    let counter = renders.clone();
    handler.add_update_listener(move |_| {
        counter.set(counter.get() + 1);
        if writer.get() < 50 {
            writer.update("value", |value| *value += 1);
        }
        Ok(())
    });

    handler.force_update(ChangeReason::manual());
    let first = EventLoop::block_on(handler.wait_for_update()).unwrap();
    assert!(first.unwrap_err().is_loop_detected());
    let _ = EventLoop::take_uncaught_errors();

    // Next change starts a fresh chain.
    state.set("value", 45);
    let second = EventLoop::block_on(handler.wait_for_update()).unwrap();
    assert!(second.unwrap());
    assert_eq!(state.get(), 50);
    assert_eq!(renders.get(), 10 + 6);
}

#[test]
fn test_waiters_registered_during_chain_see_final_result() {
    let handler = UpdateHandler::new(UpdateScope::Capsuled);
    handler.set_enabled(true);
    let state = handler.register_object(0u32);
    let late_waiter = Rc::new(Cell::new(None));

    let writer = state.clone();
    let scheduler = handler.clone();
    let slot = late_waiter.clone();
    handler.add_update_listener(move |reason| {
        if reason.kind == ChangeKind::Manual {
            writer.set("value", 1);
            // Rescheduled by the write, so the waiter waits for the next cycle.
            slot.set(Some(scheduler.is_update_scheduled()));
        }
        Ok(())
    });

    handler.force_update(ChangeReason::manual());
    let result = EventLoop::block_on(handler.wait_for_update()).unwrap();

    assert!(result.unwrap());
    assert_eq!(late_waiter.get(), Some(true));
    assert!(!handler.is_update_scheduled());
}
