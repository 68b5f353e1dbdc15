//! Injection register
//!
//! Constructor-keyed registry mapping a root constructor to its injection
//! mode, an optional replacement and its cached singleton. `create_object`
//! resolves a constructor's parameter graph recursively.
//!
//! All state lives behind `RefCell`s whose borrows are released before any
//! user constructor runs, so constructors may themselves resolve objects
//! through the same register.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::constructor::{short_type_name, Constructor, ConstructorId, Injectable, Instance, LocalInjections};
use crate::error::{ConstructorRole, InjectionError, InjectionResult};
use crate::history::DecorationHistory;
use crate::metadata::Metadata;

/// How resolved objects are shared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectMode {
    /// One cached instance per root constructor
    Singleton,
    /// New instance on every resolution
    Instanced,
}

/// Constructor-keyed injection registry
pub struct InjectionRegister {
    history: Rc<DecorationHistory>,
    metadata: Rc<Metadata>,
    /// Root -> constructor that was used for registering
    injectable_constructor: RefCell<FxHashMap<ConstructorId, Constructor>>,
    inject_mode: RefCell<FxHashMap<ConstructorId, InjectMode>>,
    replacement: RefCell<FxHashMap<ConstructorId, Constructor>>,
    singletons: RefCell<FxHashMap<ConstructorId, Instance>>,
    /// Roots currently being built, outermost first
    resolving: RefCell<Vec<(ConstructorId, String)>>,
}

impl InjectionRegister {
    /// Create a register with its own decoration history and metadata store
    pub fn new() -> Self {
        Self::with_providers(Rc::new(DecorationHistory::new()), Rc::new(Metadata::new()))
    }

    /// Create a register on top of shared history and metadata providers
    pub fn with_providers(history: Rc<DecorationHistory>, metadata: Rc<Metadata>) -> Self {
        Self {
            history,
            metadata,
            injectable_constructor: RefCell::new(FxHashMap::default()),
            inject_mode: RefCell::new(FxHashMap::default()),
            replacement: RefCell::new(FxHashMap::default()),
            singletons: RefCell::new(FxHashMap::default()),
            resolving: RefCell::new(Vec::new()),
        }
    }

    /// Decoration history used for root lookups
    pub fn history(&self) -> &Rc<DecorationHistory> {
        &self.history
    }

    /// Metadata store used for parameter types
    pub fn metadata(&self) -> &Rc<Metadata> {
        &self.metadata
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a constructor for injection.
    ///
    /// The constructor is stored under its root identity. Registering the
    /// same root again overwrites the previous mode.
    pub fn register_injectable(&self, constructor: &Constructor, mode: InjectMode) {
        let root = self.history.get_root_of(constructor);

        self.injectable_constructor
            .borrow_mut()
            .insert(root, constructor.clone());
        self.inject_mode.borrow_mut().insert(root, mode);

        tracing::debug!(constructor = constructor.name(), ?mode, "registered injectable");
    }

    /// Declare the parameter types of `T` and register it.
    pub fn register_type<T: Injectable>(&self, mode: InjectMode) -> Constructor {
        let constructor = Constructor::of::<T>();
        self.metadata
            .set_parameter_types(constructor.id(), T::parameter_types());
        self.register_injectable(&constructor, mode);
        constructor
    }

    /// Replace a constructor so the replacement gets injected instead.
    ///
    /// Both constructors must be registered.
    pub fn replace_injectable(&self, original: &Constructor, replacement: &Constructor) -> InjectionResult<()> {
        let registered_original = self.history.get_root_of(original);
        if !self.is_registered_id(registered_original) {
            return Err(InjectionError::NotRegistered {
                role: ConstructorRole::Original,
                constructor: original.name().to_string(),
            });
        }

        let registered_replacement = self.history.get_root_of(replacement);
        if !self.is_registered_id(registered_replacement) {
            return Err(InjectionError::NotRegistered {
                role: ConstructorRole::Replacement,
                constructor: replacement.name().to_string(),
            });
        }

        self.replacement
            .borrow_mut()
            .insert(registered_original, replacement.clone());

        tracing::debug!(
            original = original.name(),
            replacement = replacement.name(),
            "registered injectable replacement"
        );
        Ok(())
    }

    /// Check if a constructor (or its root) is registered
    pub fn is_registered(&self, constructor: &Constructor) -> bool {
        self.is_registered_id(self.history.get_root_of(constructor))
    }

    fn is_registered_id(&self, root: ConstructorId) -> bool {
        self.injectable_constructor.borrow().contains_key(&root)
    }

    /// Injection mode of a constructor's root
    pub fn mode_of(&self, constructor: &Constructor) -> Option<InjectMode> {
        let root = self.history.get_root_of(constructor);
        self.inject_mode.borrow().get(&root).copied()
    }

    /// Global replacement of a constructor's root
    pub fn replacement_of(&self, constructor: &Constructor) -> Option<Constructor> {
        let root = self.history.get_root_of(constructor);
        self.replacement.borrow().get(&root).cloned()
    }

    /// Constructor that was used to register a root identity
    pub fn registered_constructor(&self, id: ConstructorId) -> Option<Constructor> {
        let root = self.history.get_root_of_id(id);
        self.injectable_constructor.borrow().get(&root).cloned()
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Create an object without overrides.
    pub fn create_object(&self, constructor: &Constructor) -> InjectionResult<Instance> {
        self.create_object_forced(constructor, false, &LocalInjections::new())
    }

    /// Create an object with local parameter overrides, not forced.
    pub fn create_object_with(
        &self,
        constructor: &Constructor,
        local_injections: &LocalInjections,
    ) -> InjectionResult<Instance> {
        self.create_object_forced(constructor, false, local_injections)
    }

    /// Create an object.
    ///
    /// A forced creation always builds a new object and never touches the
    /// singleton cache. Local injections replace parameters whose declared
    /// type matches exactly, but only when the mode is not singleton or the
    /// creation is forced. Forcing is not passed on to parameters; local
    /// injections are.
    pub fn create_object_forced(
        &self,
        constructor: &Constructor,
        force_create: bool,
        local_injections: &LocalInjections,
    ) -> InjectionResult<Instance> {
        // Only roots are registered.
        let mut registered = self.history.get_root_of(constructor);
        if !self.is_registered_id(registered) {
            return Err(InjectionError::NotRegistered {
                role: ConstructorRole::Constructor,
                constructor: constructor.name().to_string(),
            });
        }

        // Global replacement. Replacement roots are always registered.
        let replacement = self.replacement.borrow().get(&registered).cloned();
        let target = match replacement {
            Some(replacement) => {
                registered = self.history.get_root_of(&replacement);
                replacement
            }
            None => constructor.clone(),
        };

        let parameter_types = self.metadata.parameter_types(registered);
        let mode = self
            .inject_mode
            .borrow()
            .get(&registered)
            .copied()
            .unwrap_or(InjectMode::Instanced);

        if !force_create && mode == InjectMode::Singleton {
            if let Some(instance) = self.singletons.borrow().get(&registered) {
                return Ok(instance.clone());
            }
        }

        let _guard = ResolvingGuard::enter(&self.resolving, registered, target.name())?;

        let mut parameters = Vec::with_capacity(parameter_types.len());
        for parameter_type in &parameter_types {
            let local = if mode != InjectMode::Singleton || force_create {
                local_injections.get(parameter_type.id())
            } else {
                None
            };

            let value = match local {
                Some(value) => value,
                None => self
                    .create_object_with(parameter_type, local_injections)
                    .map_err(|error| InjectionError::ParameterNotInjectable {
                        parameter: parameter_type.name().to_string(),
                        constructor: target.name().to_string(),
                        source: Box::new(error),
                    })?,
            };
            parameters.push(value);
        }

        let created = target.instantiate(parameters)?;

        if !force_create && mode == InjectMode::Singleton {
            self.singletons
                .borrow_mut()
                .insert(registered, created.clone());
        }

        Ok(created)
    }

    /// Resolve the registered constructor of `T` and downcast the result.
    ///
    /// Fails with `TypeMismatch` when a replacement builds another type.
    pub fn create<T: Any>(&self) -> InjectionResult<Rc<T>> {
        self.create_typed(&LocalInjections::new())
    }

    /// Typed resolution with local injections
    pub fn create_typed<T: Any>(&self, local_injections: &LocalInjections) -> InjectionResult<Rc<T>> {
        let constructor = self
            .registered_constructor(ConstructorId::of::<T>())
            .ok_or_else(|| InjectionError::NotRegistered {
                role: ConstructorRole::Constructor,
                constructor: short_type_name::<T>().to_string(),
            })?;

        let built_by = self.replacement_of(&constructor).unwrap_or_else(|| constructor.clone());
        self.create_object_with(&constructor, local_injections)?
            .downcast::<T>()
            .map_err(|_| InjectionError::TypeMismatch {
                constructor: built_by.name().to_string(),
                expected: short_type_name::<T>().to_string(),
            })
    }

    /// Check if a singleton instance is cached for a constructor's root
    pub fn has_singleton(&self, constructor: &Constructor) -> bool {
        let root = self.history.get_root_of(constructor);
        self.singletons.borrow().contains_key(&root)
    }

    /// Number of registered root constructors
    pub fn len(&self) -> usize {
        self.injectable_constructor.borrow().len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.injectable_constructor.borrow().is_empty()
    }
}

impl Default for InjectionRegister {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that tracks roots under construction
///
/// Automatically pops the root on drop.
struct ResolvingGuard<'a> {
    stack: &'a RefCell<Vec<(ConstructorId, String)>>,
}

impl<'a> ResolvingGuard<'a> {
    fn enter(
        stack: &'a RefCell<Vec<(ConstructorId, String)>>,
        root: ConstructorId,
        name: &str,
    ) -> InjectionResult<Self> {
        let mut entries = stack.borrow_mut();
        if let Some(position) = entries.iter().position(|(id, _)| *id == root) {
            let mut chain: Vec<String> = entries[position..]
                .iter()
                .map(|(_, name)| name.clone())
                .collect();
            chain.push(name.to_string());
            return Err(InjectionError::CircularDependency { chain });
        }
        entries.push((root, name.to_string()));
        Ok(Self { stack })
    }
}

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}
