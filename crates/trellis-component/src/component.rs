//! Component registry and component handles
//!
//! Components are user types registered under a custom element selector.
//! [`Component::create`] builds one inside its own update handler and wires
//! the [`ComponentLifecycle`] hooks to its update cycles.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::debug;
use trellis_inject::{Constructor, InjectMode, Injectable, InjectionError, InjectionRegister, Instance, LocalInjections};
use trellis_zone::ChangeReason;

use crate::config::UpdateConfig;
use crate::error::{ComponentError, ComponentResult, UpdateError};
use crate::update_handler::{ComponentUpdater, UpdateHandler, UpdateScope};

/// Metadata key of the component selector
pub const SELECTOR_METADATA_KEY: &str = "trellis:selector";

/// Lower-case, starts with a letter, contains a hyphen
static SELECTOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9._]*-[a-z0-9._-]*$").expect("valid selector pattern"));

/// Hyphenated names reserved by SVG and MathML
const RESERVED_SELECTORS: &[&str] = &[
    "annotation-xml",
    "color-profile",
    "font-face",
    "font-face-src",
    "font-face-uri",
    "font-face-format",
    "font-face-name",
    "missing-glyph",
];

// ============================================================================
// Settings and lifecycle
// ============================================================================

/// Registration settings of a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSettings {
    /// Custom element name
    pub selector: String,
    /// Change detection scope of the update handler
    pub update_scope: UpdateScope,
    /// Scoped style sheet
    pub style: Option<String>,
}

impl ComponentSettings {
    /// Settings with the default update scope and no style
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            update_scope: UpdateScope::Default,
            style: None,
        }
    }

    /// Set the update scope
    pub fn with_update_scope(mut self, scope: UpdateScope) -> Self {
        self.update_scope = scope;
        self
    }

    /// Set the style sheet
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }
}

/// Hooks called by a component's update cycle
pub trait ComponentLifecycle: 'static {
    /// Called on every update cycle. An error fails the cycle.
    fn on_update(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after a successful `on_update`
    fn after_update(&self) {}

    /// Called once when the component is torn down
    fn on_deconstruct(&self) {}
}

type LifecycleCast = dyn Fn(Instance) -> Option<Rc<dyn ComponentLifecycle>>;

struct ComponentDefinition {
    constructor: Constructor,
    settings: ComponentSettings,
    lifecycle: Box<LifecycleCast>,
}

// ============================================================================
// Registry
// ============================================================================

/// Defined components by selector
pub struct ComponentRegistry {
    register: Rc<InjectionRegister>,
    config: UpdateConfig,
    components: FxHashMap<String, Rc<ComponentDefinition>>,
}

impl ComponentRegistry {
    /// Create a registry with the default update configuration
    pub fn new(register: Rc<InjectionRegister>) -> Self {
        Self::with_config(register, UpdateConfig::default())
    }

    /// Create a registry and install `config` on this thread's event loop
    pub fn with_config(register: Rc<InjectionRegister>, config: UpdateConfig) -> Self {
        config.install();
        Self {
            register,
            config,
            components: FxHashMap::default(),
        }
    }

    /// Update configuration of created components
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Injection register components are built with
    pub fn register(&self) -> &Rc<InjectionRegister> {
        &self.register
    }

    /// Define component type `T`.
    ///
    /// Registers `T` as an instanced injectable and records its selector in
    /// the constructor metadata.
    pub fn define<T>(&mut self, settings: ComponentSettings) -> ComponentResult<Constructor>
    where
        T: Injectable + ComponentLifecycle,
    {
        validate_selector(&settings.selector)?;
        if self.components.contains_key(&settings.selector) {
            return Err(ComponentError::DuplicateSelector(settings.selector));
        }

        let constructor = self.register.register_type::<T>(InjectMode::Instanced);
        self.register.metadata().define_metadata(
            constructor.id(),
            SELECTOR_METADATA_KEY,
            Rc::new(settings.selector.clone()),
        );

        debug!(
            selector = settings.selector.as_str(),
            component = constructor.name(),
            scope = ?settings.update_scope,
            "defined component"
        );

        let definition = ComponentDefinition {
            constructor: constructor.clone(),
            settings,
            lifecycle: Box::new(|instance: Instance| {
                instance
                    .downcast::<T>()
                    .ok()
                    .map(|typed| typed as Rc<dyn ComponentLifecycle>)
            }),
        };
        self.components
            .insert(definition.settings.selector.clone(), Rc::new(definition));
        Ok(constructor)
    }

    /// Check if `selector` is defined
    pub fn is_defined(&self, selector: &str) -> bool {
        self.components.contains_key(selector)
    }

    /// Selector stored for a component constructor
    pub fn selector_of(&self, constructor: &Constructor) -> Option<String> {
        self.register
            .metadata()
            .get_metadata::<String>(constructor.id(), SELECTOR_METADATA_KEY)
            .map(|selector| selector.as_ref().clone())
    }

    /// Number of defined components
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Check if no component is defined
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

fn validate_selector(selector: &str) -> ComponentResult<()> {
    let invalid = |reason| ComponentError::InvalidSelector {
        selector: selector.to_string(),
        reason,
    };

    if RESERVED_SELECTORS.contains(&selector) {
        return Err(invalid("name is reserved"));
    }
    if !selector.contains('-') {
        return Err(invalid("name must contain a hyphen"));
    }
    if !SELECTOR_PATTERN.is_match(selector) {
        return Err(invalid("name must be lower case and start with a letter"));
    }
    Ok(())
}

// ============================================================================
// Component
// ============================================================================

/// Live component instance
///
/// Clones share the instance.
#[derive(Clone)]
pub struct Component {
    inner: Rc<ComponentInner>,
}

struct ComponentInner {
    selector: String,
    style: Option<String>,
    handler: UpdateHandler,
    instance: Instance,
    lifecycle: Rc<dyn ComponentLifecycle>,
    connected: Cell<bool>,
    deconstructed: Cell<bool>,
}

impl Component {
    /// Build the component defined for `selector`.
    ///
    /// The object is constructed inside the component's change detection
    /// with its [`ComponentUpdater`] as local injection. Updates stay
    /// disabled until [`connected`](Component::connected).
    pub fn create(registry: &ComponentRegistry, selector: &str) -> ComponentResult<Component> {
        let definition = registry
            .components
            .get(selector)
            .cloned()
            .ok_or_else(|| ComponentError::UnknownSelector(selector.to_string()))?;

        let handler = UpdateHandler::with_config(definition.settings.update_scope, &registry.config);
        let locals = LocalInjections::new().with(Rc::new(ComponentUpdater::new(handler.clone())));

        let instance = handler.execute(|| {
            registry
                .register
                .create_object_with(&definition.constructor, &locals)
        })?;
        let lifecycle = (definition.lifecycle)(instance.clone()).ok_or_else(|| {
            let built_by = registry
                .register
                .replacement_of(&definition.constructor)
                .unwrap_or_else(|| definition.constructor.clone());
            InjectionError::TypeMismatch {
                constructor: built_by.name().to_string(),
                expected: definition.constructor.name().to_string(),
            }
        })?;

        let hooks = Rc::downgrade(&lifecycle);
        handler.add_update_listener(move |_| {
            if let Some(lifecycle) = hooks.upgrade() {
                lifecycle.on_update()?;
                lifecycle.after_update();
            }
            Ok(())
        });

        debug!(selector, detection = handler.detection().name(), "created component");
        Ok(Component {
            inner: Rc::new(ComponentInner {
                selector: selector.to_string(),
                style: definition.settings.style.clone(),
                handler,
                instance,
                lifecycle,
                connected: Cell::new(false),
                deconstructed: Cell::new(false),
            }),
        })
    }

    /// Enable updates and start the first update cycle
    pub fn connected(&self) {
        self.inner.connected.set(true);
        self.inner.handler.set_enabled(true);
        self.inner.handler.force_update(ChangeReason::manual());
    }

    /// Disable updates
    pub fn disconnected(&self) {
        self.inner.connected.set(false);
        self.inner.handler.set_enabled(false);
    }

    /// Force an update cycle
    pub fn update(&self) {
        self.inner.handler.force_update(ChangeReason::manual());
    }

    /// Tear the component down. Calls `on_deconstruct` once.
    pub fn deconstruct(&self) {
        if self.inner.deconstructed.replace(true) {
            return;
        }
        self.inner.lifecycle.on_deconstruct();
        self.inner.handler.deconstruct();
        self.inner.connected.set(false);
        debug!(selector = self.inner.selector.as_str(), "deconstructed component");
    }

    /// Wait for the pending update cycle
    pub fn wait_for_update(&self) -> impl Future<Output = Result<bool, UpdateError>> + 'static {
        self.inner.handler.wait_for_update()
    }

    /// Selector the component was created for
    pub fn selector(&self) -> &str {
        &self.inner.selector
    }

    /// Style sheet of the component
    pub fn style(&self) -> Option<&str> {
        self.inner.style.as_deref()
    }

    /// Update handler of the component
    pub fn update_handler(&self) -> &UpdateHandler {
        &self.inner.handler
    }

    /// Check if the component is connected
    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    /// User object, if it is a `T`
    pub fn instance<T: 'static>(&self) -> Option<Rc<T>> {
        self.inner.instance.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("selector", &self.inner.selector)
            .field("connected", &self.is_connected())
            .field("handler", &self.inner.handler)
            .finish()
    }
}
