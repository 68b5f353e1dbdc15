//! Trellis dependency injection
//!
//! A constructor-keyed register that resolves constructor parameter graphs
//! recursively, caches singletons and supports global constructor
//! replacement.
//!
//! # Example
//!
//! ```ignore
//! use trellis_inject::{Arguments, Constructor, Injectable, InjectionResult, Injector};
//!
//! struct Database;
//!
//! impl Injectable for Database {
//!     fn construct(_args: &mut Arguments) -> InjectionResult<Self> {
//!         Ok(Database)
//!     }
//! }
//!
//! struct Repository {
//!     database: Rc<Database>,
//! }
//!
//! impl Injectable for Repository {
//!     fn parameter_types() -> Vec<Constructor> {
//!         vec![Constructor::of::<Database>()]
//!     }
//!
//!     fn construct(args: &mut Arguments) -> InjectionResult<Self> {
//!         Ok(Repository { database: args.take()? })
//!     }
//! }
//!
//! Injector::injectable_singleton::<Database>();
//! Injector::injectable::<Repository>();
//! let repository = Injector::create::<Repository>()?;
//! ```

#![warn(missing_docs)]

mod constructor;
mod error;
mod history;
mod injector;
mod metadata;
mod register;

pub use constructor::{Arguments, Constructor, ConstructorId, Injectable, Instance, LocalInjections};
pub use error::{ConstructorRole, InjectionError, InjectionResult};
pub use history::DecorationHistory;
pub use injector::Injector;
pub use metadata::{Metadata, MetadataKey};
pub use register::{InjectMode, InjectionRegister};
