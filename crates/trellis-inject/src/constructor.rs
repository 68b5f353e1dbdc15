//! Constructor handles
//!
//! A [`Constructor`] is the unit of identity for injection. Constructors of
//! Rust types are keyed by their `TypeId`; decorated wrappers get a synthetic
//! id and are linked back to their root through the decoration history.

use std::any::{type_name, Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::error::{InjectionError, InjectionResult};

/// A constructed object as handed out by the register
pub type Instance = Rc<dyn Any>;

type Factory = dyn Fn(&mut Arguments) -> InjectionResult<Instance>;

static NEXT_SYNTHETIC_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstructorId {
    /// Constructor of a Rust type
    Type(TypeId),
    /// Constructor created at runtime (decorations, ad-hoc factories)
    Synthetic(u64),
}

impl ConstructorId {
    /// Identity of the constructor for `T`
    pub fn of<T: Any>() -> Self {
        ConstructorId::Type(TypeId::of::<T>())
    }

    fn next_synthetic() -> Self {
        ConstructorId::Synthetic(NEXT_SYNTHETIC_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A type that the register can build.
///
/// `parameter_types` plays the part of emitted reflection metadata: it lists
/// the constructor parameters in declaration order. `construct` receives the
/// resolved values in that same order.
pub trait Injectable: Any + Sized {
    /// Declared constructor parameter types
    fn parameter_types() -> Vec<Constructor> {
        Vec::new()
    }

    /// Build the object from resolved arguments
    fn construct(args: &mut Arguments) -> InjectionResult<Self>;
}

/// Cheap-clone handle to a constructor
#[derive(Clone)]
pub struct Constructor {
    inner: Rc<ConstructorInner>,
}

struct ConstructorInner {
    id: ConstructorId,
    name: String,
    factory: Box<Factory>,
}

impl Constructor {
    /// Constructor of an injectable type
    pub fn of<T: Injectable>() -> Self {
        Self {
            inner: Rc::new(ConstructorInner {
                id: ConstructorId::of::<T>(),
                name: short_type_name::<T>().to_string(),
                factory: Box::new(|args| T::construct(args).map(|value| Rc::new(value) as Instance)),
            }),
        }
    }

    /// Constructor backed by an arbitrary factory, with a fresh identity
    pub fn from_fn<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&mut Arguments) -> InjectionResult<Instance> + 'static,
    {
        Self {
            inner: Rc::new(ConstructorInner {
                id: ConstructorId::next_synthetic(),
                name: name.into(),
                factory: Box::new(factory),
            }),
        }
    }

    /// Wrap this constructor in a derived one.
    ///
    /// The derived constructor has its own identity and builds through
    /// `wrap`, which receives the base constructor and the arguments.
    /// Record the link with [`DecorationHistory::add`](crate::DecorationHistory::add)
    /// so lookups can find the root again.
    pub fn decorate<F>(&self, name: impl Into<String>, wrap: F) -> Constructor
    where
        F: Fn(&Constructor, &mut Arguments) -> InjectionResult<Instance> + 'static,
    {
        let base = self.clone();
        Constructor::from_fn(name, move |args| wrap(&base, args))
    }

    /// Constructor identity
    pub fn id(&self) -> ConstructorId {
        self.inner.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run the factory with already resolved arguments
    pub fn instantiate(&self, values: Vec<Instance>) -> InjectionResult<Instance> {
        let mut args = Arguments::new(self.name(), values);
        self.build(&mut args)
    }

    /// Run the factory against an argument cursor (used by decorations)
    pub fn build(&self, args: &mut Arguments) -> InjectionResult<Instance> {
        (self.inner.factory)(args)
    }
}

impl PartialEq for Constructor {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Constructor {}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .finish()
    }
}

/// Resolved constructor arguments, consumed in declaration order
#[derive(Debug)]
pub struct Arguments {
    constructor: String,
    values: VecDeque<Instance>,
    index: usize,
    total: usize,
}

impl Arguments {
    /// Create an argument cursor for a constructor
    pub fn new(constructor: impl Into<String>, values: Vec<Instance>) -> Self {
        let total = values.len();
        Self {
            constructor: constructor.into(),
            values: values.into(),
            index: 0,
            total,
        }
    }

    /// Take the next argument as an untyped instance
    pub fn take_instance(&mut self) -> InjectionResult<Instance> {
        let value = self.values.pop_front().ok_or_else(|| InjectionError::MissingArgument {
            constructor: self.constructor.clone(),
            index: self.index,
            available: self.total,
        })?;
        self.index += 1;
        Ok(value)
    }

    /// Take the next argument as `Rc<T>`
    pub fn take<T: Any>(&mut self) -> InjectionResult<Rc<T>> {
        let index = self.index;
        self.take_instance()?
            .downcast::<T>()
            .map_err(|_| InjectionError::ArgumentMismatch {
                constructor: self.constructor.clone(),
                index,
                expected: short_type_name::<T>().to_string(),
            })
    }

    /// Number of arguments not yet taken
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    /// Name of the constructor these arguments belong to
    pub fn constructor(&self) -> &str {
        &self.constructor
    }
}

/// Caller supplied parameter overrides, keyed by exact parameter type
#[derive(Clone, Default)]
pub struct LocalInjections {
    values: FxHashMap<ConstructorId, Instance>,
}

impl LocalInjections {
    /// Create an empty override map
    pub fn new() -> Self {
        Self::default()
    }

    /// Override every parameter declared as `T`
    pub fn with<T: Any>(mut self, value: Rc<T>) -> Self {
        self.insert(ConstructorId::of::<T>(), value);
        self
    }

    /// Override parameters declared as `id`
    pub fn insert(&mut self, id: ConstructorId, value: Instance) {
        self.values.insert(id, value);
    }

    /// Override for an exact parameter type
    pub fn get(&self, id: ConstructorId) -> Option<Instance> {
        self.values.get(&id).cloned()
    }

    /// Check if an override exists
    pub fn contains(&self, id: ConstructorId) -> bool {
        self.values.contains_key(&id)
    }

    /// Number of overrides
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no overrides
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for LocalInjections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalInjections")
            .field("count", &self.values.len())
            .finish()
    }
}

/// Type name without its module path
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    if full.contains('<') {
        return full;
    }
    full.rsplit("::").next().unwrap_or(full)
}
