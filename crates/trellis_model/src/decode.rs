//! Kind-directed decoding of entities from JSON.
//!
//! Entity-typed properties accept either a nested object, decoded as the
//! property's entity type, or `{"$ref": {"kind", "name", "uuid"?, "external"?}}`.
//! The key `$uuid` on any object sets that entity's server identifier.

use crate::entity::{is_reserved, Entity};
use crate::kind::{ElementKind, PropertyKind};
use crate::reference::Reference;
use crate::schema::SchemaStore;
use crate::value::Value;
use serde_json::Value as JsonValue;
use trellis_core::{CompileError, CompileResult};
use uuid::Uuid;

const REF_KEY: &str = "$ref";
const UUID_KEY: &str = "$uuid";

impl Entity {
    /// Build an entity of `type_name` from a JSON object
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` for an undeclared type, and the same errors as
    /// [`Entity::set`] for each attribute
    pub fn from_json(store: &SchemaStore, type_name: &str, json: &JsonValue) -> CompileResult<Entity> {
        let invalid = |field: &str, reason: String| CompileError::InvalidValue {
            type_name: type_name.to_string(),
            field: field.to_string(),
            reason,
        };

        let JsonValue::Object(object) = json else {
            return Err(invalid("<root>", format!("expected object, got {}", json_shape(json))));
        };

        let schema = store.type_schema(type_name)?;
        let mut entity = store.begin_type(type_name)?.finish();
        for (key, raw) in object {
            if key == UUID_KEY {
                let uuid = raw
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| invalid(UUID_KEY, "expected a UUID string".to_string()))?;
                entity.set_uuid(uuid);
                continue;
            }
            if is_reserved(key) {
                let value = Value::from_plain_json(raw).map_err(|reason| invalid(key, reason))?;
                entity.set(key, value)?;
                continue;
            }

            let spec = schema
                .canonical(key)
                .and_then(|c| schema.property(c))
                .ok_or_else(|| CompileError::UnknownAttribute {
                    type_name: type_name.to_string(),
                    field: key.clone(),
                })?;
            let value = match &spec.kind {
                PropertyKind::Single(ElementKind::Scalar(_))
                | PropertyKind::ListOf(ElementKind::Scalar(_)) => {
                    Value::from_plain_json(raw).map_err(|reason| invalid(key, reason))?
                }
                PropertyKind::Single(ElementKind::Entity(target)) => {
                    decode_entity_value(store, target, raw).map_err(|e| wrap(e, &invalid, key))?
                }
                PropertyKind::ListOf(ElementKind::Entity(target)) => {
                    let JsonValue::Array(items) = raw else {
                        return Err(invalid(key, format!("expected list, got {}", json_shape(raw))));
                    };
                    Value::List(
                        items
                            .iter()
                            .map(|item| decode_entity_value(store, target, item))
                            .collect::<Result<_, _>>()
                            .map_err(|e| wrap(e, &invalid, key))?,
                    )
                }
            };
            entity.set(key, value)?;
        }
        Ok(entity)
    }
}

// Shape errors from a nested decode are reported against the outer field;
// errors raised inside a nested entity keep their own location.
fn wrap(err: DecodeError, invalid: &dyn Fn(&str, String) -> CompileError, key: &str) -> CompileError {
    match err {
        DecodeError::Shape(reason) => invalid(key, reason),
        DecodeError::Compile(e) => e,
    }
}

enum DecodeError {
    Shape(String),
    Compile(CompileError),
}

impl From<CompileError> for DecodeError {
    fn from(err: CompileError) -> Self {
        Self::Compile(err)
    }
}

fn decode_entity_value(store: &SchemaStore, type_name: &str, raw: &JsonValue) -> Result<Value, DecodeError> {
    let JsonValue::Object(object) = raw else {
        return Err(DecodeError::Shape(format!(
            "expected {} object or {} marker, got {}",
            type_name,
            REF_KEY,
            json_shape(raw)
        )));
    };
    match object.get(REF_KEY) {
        Some(target) if object.len() == 1 => {
            let reference: Reference = serde_json::from_value(target.clone())
                .map_err(|e| DecodeError::Shape(format!("bad {}: {}", REF_KEY, e)))?;
            Ok(Value::Ref(reference))
        }
        Some(_) => Err(DecodeError::Shape(format!(
            "{} cannot be combined with other keys",
            REF_KEY
        ))),
        None => Ok(Value::from(Entity::from_json(store, type_name, raw)?)),
    }
}

fn json_shape(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "object",
    }
}
