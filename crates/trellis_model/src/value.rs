//! Attribute values held by entities.

use crate::entity::{Entity, SerializeHook};
use crate::reference::Reference;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// A value assigned to an entity attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value (default of single entity fields)
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// String, possibly carrying `@@{...}@@` placeholders
    Str(String),
    /// Mapping
    Map(IndexMap<String, Value>),
    /// Ordered sequence
    List(Vec<Value>),
    /// Nested entity, owned by the parent
    Entity(Box<Entity>),
    /// Non-owning pointer to another entity or a server-side resource
    Ref(Reference),
}

impl Value {
    /// Short name of the value's shape, used in error messages
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Str(_) => "string",
            Self::Map(_) => "dict",
            Self::List(_) => "list",
            Self::Entity(_) => "entity",
            Self::Ref(_) => "reference",
        }
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get as integer
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as entity
    #[must_use]
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Get as list
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert plain JSON (no entities, no references) into a value
    ///
    /// # Errors
    ///
    /// Returns a reason if a number does not fit an integer
    pub fn from_plain_json(json: &JsonValue) -> Result<Self, String> {
        Ok(match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => return Err(format!("number {} is not an integer", n)),
            },
            JsonValue::String(s) => Self::Str(s.clone()),
            JsonValue::Array(items) => Self::List(
                items
                    .iter()
                    .map(Self::from_plain_json)
                    .collect::<Result<_, _>>()?,
            ),
            JsonValue::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_plain_json(v)?)))
                    .collect::<Result<_, String>>()?,
            ),
        })
    }

    /// Serialize to JSON, expanding nested entities
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        self.to_json_at(&mut Vec::new(), &mut |_, _, _| {})
    }

    pub(crate) fn to_json_at(&self, path: &mut Vec<Reference>, hook: &mut SerializeHook<'_>) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::from(*i),
            Self::Str(s) => JsonValue::String(s.clone()),
            Self::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json_at(path, hook)))
                    .collect(),
            ),
            Self::List(items) => {
                JsonValue::Array(items.iter().map(|v| v.to_json_at(path, hook)).collect())
            }
            Self::Entity(entity) => entity.serialize_at(path, hook),
            Self::Ref(reference) => reference.to_json(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<Entity> for Value {
    fn from(e: Entity) -> Self {
        Self::Entity(Box::new(e))
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe() {
        assert_eq!(Value::from("x").describe(), "string");
        assert_eq!(Value::from(1).describe(), "integer");
        assert_eq!(Value::from(true).describe(), "boolean");
        assert_eq!(Value::from(vec![1, 2]).describe(), "list");
        assert_eq!(Value::Null.describe(), "null");
    }

    #[test]
    fn test_from_plain_json() {
        let v = Value::from_plain_json(&json!({"a": [1, "b", true], "c": null})).unwrap();
        let Value::Map(map) = v else {
            panic!("expected map");
        };
        assert_eq!(
            map["a"],
            Value::List(vec![Value::Int(1), Value::from("b"), Value::Bool(true)])
        );
        assert_eq!(map["c"], Value::Null);
    }

    #[test]
    fn test_from_plain_json_rejects_float() {
        assert!(Value::from_plain_json(&json!(1.5)).is_err());
    }

    #[test]
    fn test_to_json_preserves_map_order() {
        let mut map = IndexMap::new();
        map.insert("z".to_string(), Value::from(1));
        map.insert("a".to_string(), Value::from(2));
        let text = serde_json::to_string(&Value::Map(map).to_json()).unwrap();
        assert_eq!(text, r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn test_ref_to_json() {
        let v = Value::from(Reference::new("app_endpoint", "linux"));
        assert_eq!(v.to_json(), json!({"kind": "app_endpoint", "name": "linux"}));
    }
}
