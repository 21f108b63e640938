//! Entity declaration builder.

use crate::entity::Entity;
use crate::schema::TypeSchema;
use crate::validator::ValidatorRegistry;
use crate::value::Value;
use std::sync::Arc;
use trellis_core::CompileResult;
use uuid::Uuid;

/// Builder for one entity declaration, seeded with the type's defaults.
///
/// Every `set` is validated on the spot, so a builder can never hold an
/// invalid attribute.
///
/// ```
/// # use trellis_model::{SchemaStore, Value};
/// let store = SchemaStore::builtin().unwrap();
/// let endpoint = store
///     .begin_type("endpoint").unwrap()
///     .set("name", "web").unwrap()
///     .set("port", 2222).unwrap()
///     .finish();
/// assert_eq!(endpoint.get("port"), Some(&Value::Int(2222)));
/// ```
#[derive(Debug)]
pub struct TypeBuilder {
    entity: Entity,
}

impl TypeBuilder {
    pub(crate) fn new(schema: Arc<TypeSchema>, registry: Arc<ValidatorRegistry>) -> Self {
        Self {
            entity: Entity::new(schema, registry),
        }
    }

    /// Assign an attribute
    ///
    /// # Errors
    ///
    /// Returns the entity's validation error for this assignment
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> CompileResult<Self> {
        self.entity.set(name, value)?;
        Ok(self)
    }

    /// Assign an attribute in place
    ///
    /// # Errors
    ///
    /// Returns the entity's validation error for this assignment
    pub fn set_mut(&mut self, name: &str, value: impl Into<Value>) -> CompileResult<&mut Self> {
        self.entity.set(name, value)?;
        Ok(self)
    }

    /// Attach a server identifier known from a prior round-trip
    #[must_use]
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.entity.set_uuid(uuid);
        self
    }

    /// Type being declared
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.entity.type_name()
    }

    /// Finish the declaration
    #[must_use]
    pub fn finish(self) -> Entity {
        self.entity
    }
}
