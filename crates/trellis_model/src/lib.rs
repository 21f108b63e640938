//! TRELLIS Model
//!
//! Schema-driven entity system: a validator registry keyed by field kind,
//! a write-once schema store loaded from a declarative template, an entity
//! builder that validates every assignment, and the resolver that turns
//! entities into references and polices macro placeholder syntax.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod decode;
pub mod entity;
pub mod kind;
pub mod macros;
pub mod reference;
pub mod schema;
pub mod validator;
pub mod value;

pub use builder::TypeBuilder;
pub use entity::{is_reserved, Entity, SerializeHook};
pub use kind::{ElementKind, PropertyKind, ScalarKind};
pub use macros::{substitute_macro, validate_macros};
pub use reference::{resolve_ref, Reference};
pub use schema::{PropertySpec, SchemaStore, TypeSchema, BUILTIN_TEMPLATE};
pub use validator::{Validator, ValidatorRegistry};
pub use value::Value;
