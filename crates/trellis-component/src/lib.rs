//! Trellis update handling and component registries
//!
//! Builds on the change detection of `trellis-zone`:
//!
//! - **Update handler**: coalesces change events into asynchronous update
//!   cycles, with waiters and loop detection
//! - **Components**: user types registered under a selector and built through
//!   the injection register of `trellis-inject`
//! - **Modules**: attribute-selected helpers and the results of manipulator
//!   modules
//!
//! # Example
//!
//! ```ignore
//! use std::rc::Rc;
//! use trellis_component::{Component, ComponentLifecycle, ComponentRegistry, ComponentSettings};
//! use trellis_inject::{Arguments, Injectable, InjectionRegister, InjectionResult};
//! use trellis_zone::EventLoop;
//!
//! struct Counter;
//!
//! impl Injectable for Counter {
//!     fn construct(_args: &mut Arguments) -> InjectionResult<Self> {
//!         Ok(Counter)
//!     }
//! }
//!
//! impl ComponentLifecycle for Counter {
//!     fn on_update(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = ComponentRegistry::new(Rc::new(InjectionRegister::new()));
//! registry.define::<Counter>(ComponentSettings::new("app-counter"))?;
//!
//! let component = Component::create(&registry, "app-counter")?;
//! component.connected();
//! let updated = EventLoop::block_on(component.wait_for_update())??;
//! ```

#![warn(missing_docs)]

mod component;
mod config;
mod error;
mod loop_detection;
mod manipulator;
mod module;
mod update_handler;

pub use component::{Component, ComponentLifecycle, ComponentRegistry, ComponentSettings, SELECTOR_METADATA_KEY};
pub use config::{UpdateConfig, DEFAULT_LOOP_LIMIT};
pub use error::{ComponentError, ComponentResult, UpdateError};
pub use loop_detection::LoopDetectionHandler;
pub use manipulator::{ManipulatorElement, ModuleManipulatorResult};
pub use module::{
    ModuleAccess, ModuleAttribute, ModuleContext, ModuleDefinition, ModuleKind, ModuleRegistry, RegisteredModule,
};
pub use update_handler::{
    ComponentUpdater, ModuleUpdater, UpdateHandler, UpdateScope, DEFAULT_COMPONENT_ZONE_NAME, MANUAL_ZONE_NAME,
};
