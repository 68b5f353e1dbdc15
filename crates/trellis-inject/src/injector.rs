//! Process-wide injector
//!
//! Explicit registration calls on the default register of the current
//! thread. Execution is single threaded, so the thread-local register is the
//! register of the whole application.
//!
//! ```ignore
//! Injector::injectable_singleton::<Database>();
//! Injector::injectable::<Repository>();
//! let repository = Injector::create::<Repository>()?;
//! ```

use std::any::Any;
use std::rc::Rc;

use crate::constructor::{Constructor, Injectable, Instance, LocalInjections};
use crate::error::InjectionResult;
use crate::register::{InjectMode, InjectionRegister};

thread_local! {
    static DEFAULT_REGISTER: Rc<InjectionRegister> = Rc::new(InjectionRegister::new());
}

/// Facade over the default injection register
pub struct Injector;

impl Injector {
    /// The default register
    pub fn register() -> Rc<InjectionRegister> {
        DEFAULT_REGISTER.with(Rc::clone)
    }

    /// Run `f` against the default register
    pub fn with_register<R>(f: impl FnOnce(&InjectionRegister) -> R) -> R {
        let register = Self::register();
        f(&register)
    }

    /// Register `T` as instanced injectable
    pub fn injectable<T: Injectable>() -> Constructor {
        Self::register().register_type::<T>(InjectMode::Instanced)
    }

    /// Register `T` as singleton injectable
    pub fn injectable_singleton<T: Injectable>() -> Constructor {
        Self::register().register_type::<T>(InjectMode::Singleton)
    }

    /// Inject `R` wherever `O` is requested. Both must be registered.
    pub fn replace<O: Injectable, R: Injectable>() -> InjectionResult<()> {
        Self::register().replace_injectable(&Constructor::of::<O>(), &Constructor::of::<R>())
    }

    /// Create a decorated constructor and record it in the decoration history
    pub fn decorate<F>(base: &Constructor, name: impl Into<String>, wrap: F) -> Constructor
    where
        F: Fn(&Constructor, &mut crate::Arguments) -> InjectionResult<Instance> + 'static,
    {
        let decorated = base.decorate(name, wrap);
        Self::register().history().add(base, &decorated);
        decorated
    }

    /// Typed creation of a registered type
    pub fn create<T: Any>() -> InjectionResult<Rc<T>> {
        Self::register().create::<T>()
    }

    /// Untyped creation with local injections
    pub fn create_object(constructor: &Constructor, local_injections: &LocalInjections) -> InjectionResult<Instance> {
        Self::register().create_object_with(constructor, local_injections)
    }

    /// Untyped creation, optionally forced
    pub fn create_object_forced(
        constructor: &Constructor,
        force_create: bool,
        local_injections: &LocalInjections,
    ) -> InjectionResult<Instance> {
        Self::register().create_object_forced(constructor, force_create, local_injections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Arguments;

    struct Settings {
        level: u8,
    }

    impl Injectable for Settings {
        fn construct(_args: &mut Arguments) -> InjectionResult<Self> {
            Ok(Settings { level: 3 })
        }
    }

    #[test]
    fn test_default_register_is_shared() {
        Injector::injectable_singleton::<Settings>();

        let first = Injector::create::<Settings>().unwrap();
        let second = Injector::with_register(|register| register.create::<Settings>()).unwrap();

        assert_eq!(first.level, 3);
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_decorated_constructor_resolves_root() {
        let base = Injector::injectable::<Settings>();
        let decorated = Injector::decorate(&base, "LoudSettings", |base, args| {
            let built = base.build(args)?;
            let settings = built
                .downcast::<Settings>()
                .map_err(|_| crate::InjectionError::construction("LoudSettings", "unexpected base"))?;
            Ok(Rc::new(Settings {
                level: settings.level * 2,
            }) as Instance)
        });

        let value = Injector::create_object(&decorated, &LocalInjections::new())
            .unwrap()
            .downcast::<Settings>()
            .unwrap();
        assert_eq!(value.level, 6);
    }
}
