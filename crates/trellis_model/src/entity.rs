//! Schema-validated entities.
//!
//! An [`Entity`] owns the attributes assigned to it, overlaid on its type's
//! defaults. Every assignment, during declaration or afterwards, goes
//! through [`Entity::set`], so an entity holding an invalid value cannot
//! exist.

use crate::macros::validate_macros;
use crate::reference::{resolve_ref, Reference};
use crate::schema::TypeSchema;
use crate::validator::ValidatorRegistry;
use crate::value::Value;
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use trellis_core::{CompileError, CompileResult};
use uuid::Uuid;

/// Internal book-keeping names (`__name__`) skip validation
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Serialization hook: ancestor references, the entity, its object
pub type SerializeHook<'a> = dyn FnMut(&[Reference], &Entity, &mut Map<String, JsonValue>) + 'a;

/// An instance of a declared entity type
#[derive(Clone)]
pub struct Entity {
    schema: Arc<TypeSchema>,
    registry: Arc<ValidatorRegistry>,
    /// User-supplied values, canonical name -> value, insertion order
    values: IndexMap<String, Value>,
    /// Spelling used for each assigned property
    spellings: IndexMap<String, String>,
    internals: IndexMap<String, Value>,
    uuid: Option<Uuid>,
}

impl Entity {
    pub(crate) fn new(schema: Arc<TypeSchema>, registry: Arc<ValidatorRegistry>) -> Self {
        Self {
            schema,
            registry,
            values: IndexMap::new(),
            spellings: IndexMap::new(),
            internals: IndexMap::new(),
            uuid: None,
        }
    }

    /// Assign an attribute.
    ///
    /// The name may be a property, one of its aliases, or a reserved
    /// `__name__` which is stored unvalidated and never serialized.
    ///
    /// # Errors
    ///
    /// - `UnknownAttribute` if the name is neither a property nor an alias
    /// - `AliasCollision` if the property was already set through another spelling
    /// - `UnknownKind` if the property's kind has no validator
    /// - `InvalidValue` if the validator rejects the value
    /// - `MalformedMacro` if a string in the value has broken placeholders
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> CompileResult<()> {
        let value = value.into();
        if is_reserved(name) {
            self.internals.insert(name.to_string(), value);
            return Ok(());
        }

        let canonical = self
            .schema
            .canonical(name)
            .ok_or_else(|| CompileError::UnknownAttribute {
                type_name: self.schema.name.clone(),
                field: name.to_string(),
            })?
            .to_string();

        match self.spellings.get(&canonical) {
            Some(previous) if previous != name => {
                return Err(CompileError::AliasCollision {
                    type_name: self.schema.name.clone(),
                    field: canonical,
                    alias: name.to_string(),
                });
            }
            Some(_) => {
                tracing::debug!(type_name = %self.schema.name, field = %canonical, "Overwriting attribute");
            }
            None => {}
        }

        let spec = self
            .schema
            .property(&canonical)
            .ok_or_else(|| CompileError::UnknownAttribute {
                type_name: self.schema.name.clone(),
                field: canonical.clone(),
            })?;
        let validator = self.registry.lookup(&spec.kind.tag())?;
        validator
            .check(&value)
            .map_err(|reason| CompileError::InvalidValue {
                type_name: self.schema.name.clone(),
                field: canonical.clone(),
                reason,
            })?;
        check_strings(&format!("{}.{}", self.schema.name, canonical), &value)?;

        self.spellings.insert(canonical.clone(), name.to_string());
        self.values.insert(canonical, value);
        Ok(())
    }

    /// Current value of a property: the assigned value, else the default
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        if is_reserved(name) {
            return self.internals.get(name);
        }
        let canonical = self.schema.canonical(name)?;
        self.values
            .get(canonical)
            .or_else(|| self.schema.property(canonical).map(|p| &p.default))
    }

    /// Whether a property was assigned explicitly
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.schema
            .canonical(name)
            .is_some_and(|c| self.values.contains_key(c))
    }

    /// Entity name, empty when the type has no `name` or it is unset
    #[must_use]
    pub fn name(&self) -> &str {
        self.get("name").and_then(Value::as_str).unwrap_or("")
    }

    /// Declared type name
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.schema.name
    }

    /// Reference kind of the declared type
    #[must_use]
    pub fn ref_kind(&self) -> &str {
        &self.schema.ref_kind
    }

    /// Schema of the declared type
    #[must_use]
    pub fn schema(&self) -> &TypeSchema {
        &self.schema
    }

    /// Server identifier, if known
    #[must_use]
    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    /// Record a server identifier
    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.uuid = Some(uuid);
    }

    /// Reference to this entity
    #[must_use]
    pub fn reference(&self) -> Reference {
        resolve_ref(self)
    }

    /// Serialize: schema order, defaults overlaid by assigned values
    #[must_use]
    pub fn serialize(&self) -> JsonValue {
        self.serialize_with(&mut |_, _, _| {})
    }

    /// Serialize, letting `hook` amend the object of this entity and of
    /// every nested entity after its properties are written. The hook also
    /// receives the references of the entity's ancestors, outermost first.
    pub fn serialize_with(&self, hook: &mut SerializeHook<'_>) -> JsonValue {
        self.serialize_at(&mut Vec::new(), hook)
    }

    pub(crate) fn serialize_at(&self, path: &mut Vec<Reference>, hook: &mut SerializeHook<'_>) -> JsonValue {
        let mut object = Map::new();
        if let Some(uuid) = self.uuid {
            object.insert("uuid".to_string(), JsonValue::String(uuid.to_string()));
        }
        path.push(self.reference());
        for spec in self.schema.properties.values() {
            let value = self.values.get(&spec.name).unwrap_or(&spec.default);
            object.insert(spec.name.clone(), value.to_json_at(path, hook));
        }
        path.pop();
        hook(path.as_slice(), self, &mut object);
        JsonValue::Object(object)
    }

    /// Visit this entity and every nested entity, depth first
    pub fn walk(&self, visit: &mut dyn FnMut(&Entity)) {
        self.walk_paths(&mut |_, entity| visit(entity));
    }

    /// Visit this entity and every nested entity, depth first, along with
    /// the references of its ancestors, outermost first
    pub fn walk_paths(&self, visit: &mut dyn FnMut(&[Reference], &Entity)) {
        self.walk_at(&mut Vec::new(), visit);
    }

    fn walk_at(&self, path: &mut Vec<Reference>, visit: &mut dyn FnMut(&[Reference], &Entity)) {
        visit(path.as_slice(), self);
        path.push(self.reference());
        for spec in self.schema.properties.values() {
            if let Some(value) = self.values.get(&spec.name) {
                walk_value(value, path, visit);
            }
        }
        path.pop();
    }

    /// Every reference held anywhere in this entity tree, with the
    /// `type:name.field` location that holds it
    #[must_use]
    pub fn references(&self) -> Vec<(String, Reference)> {
        let mut found = Vec::new();
        self.walk(&mut |entity| {
            for (field, value) in &entity.values {
                let referrer = format!("{}:{}.{}", entity.type_name(), entity.name(), field);
                collect_refs(&referrer, value, &mut found);
            }
        });
        found
    }
}

fn walk_value(value: &Value, path: &mut Vec<Reference>, visit: &mut dyn FnMut(&[Reference], &Entity)) {
    match value {
        Value::Entity(e) => e.walk_at(path, visit),
        Value::List(items) => items.iter().for_each(|v| walk_value(v, path, visit)),
        Value::Map(map) => map.values().for_each(|v| walk_value(v, path, visit)),
        _ => {}
    }
}

// Nested entities are skipped here; `walk` reaches them on its own
fn collect_refs(referrer: &str, value: &Value, out: &mut Vec<(String, Reference)>) {
    match value {
        Value::Ref(r) => out.push((referrer.to_string(), r.clone())),
        Value::List(items) => items.iter().for_each(|v| collect_refs(referrer, v, out)),
        Value::Map(map) => map.values().for_each(|v| collect_refs(referrer, v, out)),
        _ => {}
    }
}

fn check_strings(field: &str, value: &Value) -> CompileResult<()> {
    match value {
        Value::Str(s) => validate_macros(field, s),
        Value::List(items) => items.iter().try_for_each(|v| check_strings(field, v)),
        Value::Map(map) => map.values().try_for_each(|v| check_strings(field, v)),
        _ => Ok(()),
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name == other.schema.name
            && self.uuid == other.uuid
            && self.values == other.values
            && self.internals == other.internals
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.schema.name)
            .field("values", &self.values)
            .field("uuid", &self.uuid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaStore;
    use proptest::prelude::*;
    use serde_json::json;

    fn service_store() -> SchemaStore {
        SchemaStore::load(&json!({
            "types": {
                "service": {
                    "kind": "app_service",
                    "properties": {
                        "name": {"type": "string", "default": ""},
                        "port": {"type": "integer", "default": 0}
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_service_port_rejects_string() {
        let store = service_store();
        let mut service = store.begin_type("service").unwrap().finish();
        let err = service.set("port", "abc").unwrap_err();
        assert!(matches!(
            err,
            CompileError::InvalidValue { ref type_name, ref field, .. }
                if type_name == "service" && field == "port"
        ));
        // Rejected assignment leaves the default in place
        assert_eq!(service.get("port"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_service_port_serializes() {
        let store = service_store();
        let mut service = store.begin_type("service").unwrap().finish();
        service.set("port", 8080).unwrap();
        let text = serde_json::to_string(&service.serialize()).unwrap();
        assert_eq!(text, r#"{"name":"","port":8080}"#);
    }

    #[test]
    fn test_unknown_attribute() {
        let store = service_store();
        let mut service = store.begin_type("service").unwrap().finish();
        assert_eq!(
            service.set("host", "db").unwrap_err(),
            CompileError::UnknownAttribute {
                type_name: "service".to_string(),
                field: "host".to_string()
            }
        );
    }

    #[test]
    fn test_reserved_bypasses_validation() {
        let store = service_store();
        let mut service = store.begin_type("service").unwrap().finish();
        service.set("__parent__", vec![1, 2]).unwrap();
        assert_eq!(service.get("__parent__"), Some(&Value::from(vec![1, 2])));
        assert_eq!(service.serialize(), json!({"name": "", "port": 0}));
    }

    #[test]
    fn test_is_reserved() {
        assert!(is_reserved("__name__"));
        assert!(!is_reserved("____"));
        assert!(!is_reserved("__name"));
        assert!(!is_reserved("name__"));
    }

    #[test]
    fn test_last_write_wins() {
        let store = service_store();
        let mut service = store.begin_type("service").unwrap().finish();
        service.set("port", 1).unwrap();
        service.set("port", 2).unwrap();
        assert_eq!(service.get("port"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_alias_collision() {
        let store = SchemaStore::builtin().unwrap();
        let mut substrate = store.begin_type("substrate").unwrap().finish();
        substrate.set("provider_spec", Value::Map(IndexMap::new())).unwrap();
        substrate.set("provider_spec", Value::Map(IndexMap::new())).unwrap();
        let err = substrate
            .set("create_spec", Value::Map(IndexMap::new()))
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::AliasCollision {
                type_name: "substrate".to_string(),
                field: "create_spec".to_string(),
                alias: "create_spec".to_string()
            }
        );
    }

    #[test]
    fn test_alias_stores_canonical() {
        let store = SchemaStore::builtin().unwrap();
        let mut substrate = store.begin_type("substrate").unwrap().finish();
        let mut spec = IndexMap::new();
        spec.insert("memory".to_string(), Value::Int(4096));
        substrate.set("provider_spec", Value::Map(spec.clone())).unwrap();
        assert!(substrate.is_set("create_spec"));
        assert_eq!(substrate.serialize()["create_spec"], json!({"memory": 4096}));
        assert!(substrate.serialize().get("provider_spec").is_none());
    }

    #[test]
    fn test_malformed_macro_rejected() {
        let store = SchemaStore::builtin().unwrap();
        let mut variable = store.begin_type("variable").unwrap().finish();
        assert!(matches!(
            variable.set("value", "@@{broken").unwrap_err(),
            CompileError::MalformedMacro { ref field, .. } if field == "variable.value"
        ));
        variable.set("value", "@@{ok}@@").unwrap();
    }

    #[test]
    fn test_nested_entity_and_references() {
        let store = SchemaStore::builtin().unwrap();
        let endpoint = store
            .begin_type("endpoint")
            .unwrap()
            .set("name", "linux")
            .unwrap()
            .finish();
        let runbook = store
            .begin_type("runbook")
            .unwrap()
            .set("name", "rb")
            .unwrap()
            .set("endpoints", vec![endpoint.clone()])
            .unwrap()
            .set("default_target", endpoint.reference())
            .unwrap()
            .finish();

        let mut seen = Vec::new();
        runbook.walk(&mut |e| seen.push(e.type_name().to_string()));
        assert_eq!(seen, vec!["runbook", "endpoint"]);

        let refs = runbook.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0, "runbook:rb.default_target_reference");
        assert_eq!(refs[0].1, Reference::new("app_endpoint", "linux"));
    }

    #[test]
    fn test_walk_paths_and_hook_see_ancestors() {
        let store = SchemaStore::builtin().unwrap();
        let shop = Entity::from_json(
            store,
            "blueprint",
            &json!({"name": "shop", "services": [{"name": "api", "actions": [{"name": "stop"}]}]}),
        )
        .unwrap();

        let mut seen = Vec::new();
        shop.walk_paths(&mut |path, e| {
            let parents: Vec<_> = path.iter().map(ToString::to_string).collect();
            seen.push(format!("{}<{}", e.name(), parents.join("/")));
        });
        assert_eq!(seen, vec!["shop<", "api<app_blueprint:shop", "stop<app_blueprint:shop/app_service:api"]);

        let json = shop.serialize_with(&mut |path, _, obj| {
            obj.insert("depth".to_string(), JsonValue::from(path.len()));
        });
        assert_eq!(json["depth"], 0);
        assert_eq!(json["service_definition_list"][0]["action_list"][0]["depth"], 2);
    }

    #[test]
    fn test_entity_field_rejects_wrong_type() {
        let store = SchemaStore::builtin().unwrap();
        let credential = store.begin_type("credential").unwrap().finish();
        let mut runbook = store.begin_type("runbook").unwrap().finish();
        assert!(matches!(
            runbook.set("default_target", credential).unwrap_err(),
            CompileError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_uuid_serialized_first() {
        let store = service_store();
        let mut service = store.begin_type("service").unwrap().finish();
        let uuid = Uuid::from_bytes([1u8; 16]);
        service.set_uuid(uuid);
        let json = service.serialize();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["uuid", "name", "port"]);
        assert_eq!(service.reference().uuid, Some(uuid));
    }

    #[test]
    fn test_serialize_with_hook() {
        let store = service_store();
        let service = store.begin_type("service").unwrap().finish();
        let json = service.serialize_with(&mut |_, e, obj| {
            obj.insert("kind".to_string(), JsonValue::String(e.ref_kind().to_string()));
        });
        assert_eq!(json["kind"], "app_service");
    }

    proptest! {
        #[test]
        fn prop_integer_port_roundtrips(port in any::<i64>()) {
            let store = service_store();
            let mut service = store.begin_type("service").unwrap().finish();
            service.set("port", port).unwrap();
            prop_assert_eq!(service.serialize()["port"].as_i64(), Some(port));
        }

        #[test]
        fn prop_non_integer_port_rejected(text in ".*", flag in any::<bool>()) {
            let store = service_store();
            let mut service = store.begin_type("service").unwrap().finish();
            let is_invalid = |r: CompileResult<()>| matches!(r, Err(CompileError::InvalidValue { .. }));
            prop_assert!(is_invalid(service.set("port", text)));
            prop_assert!(is_invalid(service.set("port", flag)));
        }

        #[test]
        fn prop_unknown_names_rejected(name in "[a-z][a-z_]{0,12}") {
            prop_assume!(name != "name" && name != "port");
            let store = service_store();
            let mut service = store.begin_type("service").unwrap().finish();
            let is_unknown = matches!(
                service.set(&name, 1),
                Err(CompileError::UnknownAttribute { .. })
            );
            prop_assert!(is_unknown);
        }
    }
}
