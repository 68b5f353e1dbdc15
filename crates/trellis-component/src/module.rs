//! Module registry
//!
//! Modules attach behavior to template attributes. Each module type is
//! registered with a [`ModuleDefinition`] whose selector is matched against
//! attribute names; definitions are searched in registration order.
//!
//! Module objects are built through the injection register. While a module
//! is built, its [`ModuleAttribute`] and [`ModuleUpdater`] are available as
//! local injections.

use std::fmt;
use std::rc::Rc;

use regex::Regex;
use tracing::debug;
use trellis_inject::{
    Arguments, Constructor, InjectMode, Injectable, InjectionError, InjectionRegister, InjectionResult, Instance,
    LocalInjections,
};

use crate::error::{ComponentError, ComponentResult};
use crate::update_handler::{ModuleUpdater, UpdateHandler};

/// How a module treats its element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Runs once per element attribute
    Static,
    /// Multiplies or removes its element
    Manipulator,
    /// Evaluates attribute values and text without a static module
    Expression,
}

/// What a module does with component values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleAccess {
    /// Reads values
    Read,
    /// Writes values
    Write,
    /// Reads and writes values
    ReadWrite,
}

/// Registration data of a module type
#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    /// Module kind
    pub kind: ModuleKind,
    /// Attribute names the module handles
    pub selector: Regex,
    /// Value access of the module
    pub access: ModuleAccess,
    /// Reject the module inside elements created by a manipulator
    pub forbidden_in_manipulator_scopes: bool,
}

impl ModuleDefinition {
    /// Definition of `kind` with read access, allowed everywhere
    pub fn new(kind: ModuleKind, selector: Regex) -> Self {
        Self {
            kind,
            selector,
            access: ModuleAccess::Read,
            forbidden_in_manipulator_scopes: false,
        }
    }

    /// Set the value access
    pub fn with_access(mut self, access: ModuleAccess) -> Self {
        self.access = access;
        self
    }

    /// Reject the module inside manipulator scopes
    pub fn forbidden_in_manipulator_scopes(mut self) -> Self {
        self.forbidden_in_manipulator_scopes = true;
        self
    }

    /// Check if the selector matches `attribute` as a whole
    pub fn matches(&self, attribute: &str) -> bool {
        self.selector
            .find(attribute)
            .is_some_and(|found| found.start() == 0 && found.end() == attribute.len())
    }
}

/// Template attribute a module is created for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleAttribute {
    /// Attribute name
    pub name: String,
    /// Attribute value
    pub value: String,
}

impl ModuleAttribute {
    /// Attribute `name="value"`
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Injectable for ModuleAttribute {
    fn construct(args: &mut Arguments) -> InjectionResult<Self> {
        Err(InjectionError::construction(
            args.constructor(),
            "only available as a local injection",
        ))
    }
}

/// Module constructor with its definition
#[derive(Clone)]
pub struct RegisteredModule {
    /// Constructor of the module object
    pub constructor: Constructor,
    /// Registration data
    pub definition: Rc<ModuleDefinition>,
}

impl fmt::Debug for RegisteredModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredModule")
            .field("constructor", &self.constructor.name())
            .field("kind", &self.definition.kind)
            .field("selector", &self.definition.selector.as_str())
            .finish()
    }
}

/// Values a module object is built with
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// Attribute that selected the module
    pub attribute: ModuleAttribute,
    /// Update handler of the owning component
    pub updater: UpdateHandler,
}

/// Registered module types in registration order
pub struct ModuleRegistry {
    register: Rc<InjectionRegister>,
    modules: Vec<RegisteredModule>,
}

impl ModuleRegistry {
    /// Create an empty registry building modules through `register`
    pub fn new(register: Rc<InjectionRegister>) -> Self {
        Self {
            register,
            modules: Vec::new(),
        }
    }

    /// Register a module constructor as an instanced injectable
    pub fn add(&mut self, constructor: &Constructor, definition: ModuleDefinition) -> RegisteredModule {
        self.register
            .register_injectable(constructor, InjectMode::Instanced);
        self.push(constructor.clone(), definition)
    }

    /// Register module type `T`
    pub fn add_type<T: Injectable>(&mut self, definition: ModuleDefinition) -> RegisteredModule {
        let constructor = self.register.register_type::<T>(InjectMode::Instanced);
        self.push(constructor, definition)
    }

    fn push(&mut self, constructor: Constructor, definition: ModuleDefinition) -> RegisteredModule {
        debug!(
            module = constructor.name(),
            kind = ?definition.kind,
            selector = definition.selector.as_str(),
            "registered module"
        );
        let module = RegisteredModule {
            constructor,
            definition: Rc::new(definition),
        };
        self.modules.push(module.clone());
        module
    }

    /// All registered modules
    pub fn definitions(&self) -> &[RegisteredModule] {
        &self.modules
    }

    /// Find the manipulator module of an element.
    ///
    /// Manipulator definitions are tried in registration order; the first
    /// one matching any attribute wins.
    pub fn manipulator_attribute<'a>(
        &self,
        attributes: &'a [ModuleAttribute],
    ) -> Option<(&'a ModuleAttribute, RegisteredModule)> {
        self.of_kind(ModuleKind::Manipulator).find_map(|module| {
            attributes
                .iter()
                .find(|attribute| module.definition.matches(&attribute.name))
                .map(|attribute| (attribute, module.clone()))
        })
    }

    /// First static module handling `attribute`
    pub fn static_definition(&self, attribute: &ModuleAttribute) -> Option<RegisteredModule> {
        self.of_kind(ModuleKind::Static)
            .find(|module| module.definition.matches(&attribute.name))
            .cloned()
    }

    /// Module handling attributes and text without a static module
    pub fn expression_definition(&self) -> Option<RegisteredModule> {
        self.of_kind(ModuleKind::Expression).next().cloned()
    }

    /// Resolve the module of every attribute of an element.
    ///
    /// Attributes without a static module fall back to the expression
    /// module. Inside a manipulator scope, modules forbidden there fail.
    pub fn element_static_modules(
        &self,
        attributes: &[ModuleAttribute],
        in_manipulator_scope: bool,
    ) -> ComponentResult<Vec<(ModuleAttribute, RegisteredModule)>> {
        let mut modules = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            let module = match self.static_definition(attribute) {
                Some(module) => module,
                None => self
                    .expression_definition()
                    .ok_or(ComponentError::MissingExpressionModule)?,
            };

            if in_manipulator_scope && module.definition.forbidden_in_manipulator_scopes {
                return Err(ComponentError::ForbiddenInManipulatorScope {
                    attribute: attribute.name.clone(),
                });
            }
            modules.push((attribute.clone(), module));
        }
        Ok(modules)
    }

    /// Build a module object for `context`
    pub fn create_module(&self, module: &RegisteredModule, context: &ModuleContext) -> ComponentResult<Instance> {
        let locals = LocalInjections::new()
            .with(Rc::new(context.attribute.clone()))
            .with(Rc::new(ModuleUpdater::new(context.updater.clone())));

        let instance = context
            .updater
            .execute_untracked(|| self.register.create_object_with(&module.constructor, &locals))?;
        Ok(instance)
    }

    fn of_kind(&self, kind: ModuleKind) -> impl Iterator<Item = &RegisteredModule> {
        self.modules
            .iter()
            .filter(move |module| module.definition.kind == kind)
    }
}
