//! Validator registry keyed by property kind tag.
//!
//! The set of kinds is closed: scalar and list-of-scalar validators come
//! from a fixed table, and one entity validator pair is registered for
//! every type declared by the schema template.

use crate::kind::{ElementKind, PropertyKind, ScalarKind};
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;
use trellis_core::{CompileError, CompileResult};

/// Default + shape check for one property kind
pub trait Validator: Send + Sync {
    /// Kind tag this validator serves
    fn tag(&self) -> String;

    /// Value used when the schema declares no default
    fn default_value(&self) -> Value;

    /// Check a candidate value's shape
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason on rejection
    fn check(&self, value: &Value) -> Result<(), String>;
}

/// Validator for a scalar kind
pub struct ScalarValidator(pub ScalarKind);

impl Validator for ScalarValidator {
    fn tag(&self) -> String {
        self.0.tag().to_string()
    }

    fn default_value(&self) -> Value {
        self.0.default_value()
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        if self.0.accepts(value) {
            Ok(())
        } else {
            Err(format!("expected {}, got {}", self.0.tag(), value.describe()))
        }
    }
}

/// Validator for an entity-typed field.
///
/// Accepts a nested entity of the declared type, or a reference whose kind
/// is the type's reference kind.
pub struct EntityValidator {
    type_name: String,
    ref_kind: String,
}

impl EntityValidator {
    /// Create a validator for the given entity type
    #[must_use]
    pub fn new(type_name: impl Into<String>, ref_kind: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ref_kind: ref_kind.into(),
        }
    }
}

impl Validator for EntityValidator {
    fn tag(&self) -> String {
        PropertyKind::entity(self.type_name.clone()).tag()
    }

    fn default_value(&self) -> Value {
        Value::Null
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        match value {
            Value::Entity(e) if e.type_name() == self.type_name => Ok(()),
            Value::Entity(e) => Err(format!(
                "expected {} entity, got {} entity",
                self.type_name,
                e.type_name()
            )),
            Value::Ref(r) if r.kind == self.ref_kind => Ok(()),
            Value::Ref(r) => Err(format!(
                "expected reference of kind {}, got {}",
                self.ref_kind, r.kind
            )),
            other => Err(format!(
                "expected {} entity or reference, got {}",
                self.type_name,
                other.describe()
            )),
        }
    }
}

/// Validator for a list kind: checks every element with the inner validator
pub struct ListValidator {
    inner: Arc<dyn Validator>,
}

impl ListValidator {
    /// Wrap an element validator
    #[must_use]
    pub fn new(inner: Arc<dyn Validator>) -> Self {
        Self { inner }
    }
}

impl Validator for ListValidator {
    fn tag(&self) -> String {
        format!("list:{}", self.inner.tag())
    }

    fn default_value(&self) -> Value {
        Value::List(Vec::new())
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        let Value::List(items) = value else {
            return Err(format!("expected list, got {}", value.describe()));
        };
        for (index, item) in items.iter().enumerate() {
            self.inner
                .check(item)
                .map_err(|reason| format!("element {}: {}", index, reason))?;
        }
        Ok(())
    }
}

/// Registry mapping kind tags to validators
pub struct ValidatorRegistry {
    validators: IndexMap<String, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            validators: IndexMap::new(),
        }
    }

    /// Create a registry holding the scalar and list-of-scalar validators
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in ScalarKind::ALL {
            let scalar: Arc<dyn Validator> = Arc::new(ScalarValidator(kind));
            registry
                .validators
                .insert(kind.tag().to_string(), Arc::clone(&scalar));
            registry.validators.insert(
                PropertyKind::ListOf(ElementKind::Scalar(kind)).tag(),
                Arc::new(ListValidator::new(scalar)),
            );
        }
        registry
    }

    /// Register a validator against a kind tag
    ///
    /// # Errors
    ///
    /// Returns error if the tag already has a validator
    pub fn register(&mut self, tag: impl Into<String>, validator: Arc<dyn Validator>) -> CompileResult<()> {
        let tag = tag.into();
        if self.validators.contains_key(&tag) {
            return Err(CompileError::SchemaLoad {
                reason: format!("validator already registered for kind {}", tag),
            });
        }
        self.validators.insert(tag, validator);
        Ok(())
    }

    /// Register the single and list validators for an entity type
    ///
    /// # Errors
    ///
    /// Returns error if the type was already registered
    pub fn register_entity(&mut self, type_name: &str, ref_kind: &str) -> CompileResult<()> {
        let single: Arc<dyn Validator> = Arc::new(EntityValidator::new(type_name, ref_kind));
        self.register(PropertyKind::entity(type_name).tag(), Arc::clone(&single))?;
        self.register(
            PropertyKind::ListOf(ElementKind::Entity(type_name.to_string())).tag(),
            Arc::new(ListValidator::new(single)),
        )
    }

    /// Look up the validator for a kind tag
    ///
    /// # Errors
    ///
    /// Returns `UnknownKind` if nothing is registered for the tag
    pub fn lookup(&self, tag: &str) -> CompileResult<Arc<dyn Validator>> {
        self.validators
            .get(tag)
            .map(Arc::clone)
            .ok_or_else(|| CompileError::UnknownKind {
                kind: tag.to_string(),
            })
    }

    /// Check if a tag is registered
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.validators.contains_key(tag)
    }

    /// Registered tags, in registration order
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }

    /// Number of registered validators
    #[must_use]
    pub fn count(&self) -> usize {
        self.validators.len()
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;

    #[test]
    fn test_builtins() {
        let registry = ValidatorRegistry::with_builtins();
        assert_eq!(registry.count(), 8);
        for tag in ["string", "integer", "boolean", "dict", "list:string", "list:dict"] {
            assert!(registry.contains(tag), "missing {tag}");
        }
    }

    #[test]
    fn test_lookup_unknown_kind() {
        let registry = ValidatorRegistry::with_builtins();
        let err = registry.lookup("entity:service").err().unwrap();
        assert_eq!(
            err,
            CompileError::UnknownKind {
                kind: "entity:service".to_string()
            }
        );
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = ValidatorRegistry::with_builtins();
        let result = registry.register("string", Arc::new(ScalarValidator(ScalarKind::String)));
        assert!(result.is_err());
    }

    #[test]
    fn test_list_validator_checks_every_element() {
        let registry = ValidatorRegistry::with_builtins();
        let v = registry.lookup("list:integer").unwrap();
        assert!(v.check(&Value::from(vec![1, 2, 3])).is_ok());
        let err = v
            .check(&Value::List(vec![Value::Int(1), Value::from("2")]))
            .unwrap_err();
        assert!(err.starts_with("element 1"));
        assert_eq!(v.default_value(), Value::List(Vec::new()));
    }

    #[test]
    fn test_entity_validator_accepts_matching_reference() {
        let mut registry = ValidatorRegistry::with_builtins();
        registry.register_entity("endpoint", "app_endpoint").unwrap();
        let v = registry.lookup("entity:endpoint").unwrap();
        assert!(v.check(&Value::from(Reference::new("app_endpoint", "ep"))).is_ok());
        assert!(v.check(&Value::from(Reference::new("app_service", "ep"))).is_err());
        assert!(v.check(&Value::from("ep")).is_err());
        assert_eq!(v.default_value(), Value::Null);
        assert!(registry.contains("list:entity:endpoint"));
    }

    #[test]
    fn test_scalar_validator_reason() {
        let v = ScalarValidator(ScalarKind::Integer);
        assert_eq!(v.check(&Value::from("abc")).unwrap_err(), "expected integer, got string");
    }
}
