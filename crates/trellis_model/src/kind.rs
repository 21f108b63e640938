//! Property kinds and their tags.
//!
//! Tags are the registry keys: `string`, `integer`, `boolean`, `dict`,
//! `entity:<type>` and `list:<tag>` for each of those.

use crate::value::Value;
use std::fmt;

/// Scalar property kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Text
    String,
    /// 64-bit integer
    Integer,
    /// Boolean
    Boolean,
    /// String-keyed mapping
    Mapping,
}

impl ScalarKind {
    /// All scalar kinds, in registration order
    pub const ALL: [ScalarKind; 4] = [Self::String, Self::Integer, Self::Boolean, Self::Mapping];

    /// Registry tag
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Mapping => "dict",
        }
    }

    /// Default value when the schema gives none
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            Self::String => Value::Str(String::new()),
            Self::Integer => Value::Int(0),
            Self::Boolean => Value::Bool(false),
            Self::Mapping => Value::Map(Default::default()),
        }
    }

    /// Whether a value has this kind's shape
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::Str(_))
                | (Self::Integer, Value::Int(_))
                | (Self::Boolean, Value::Bool(_))
                | (Self::Mapping, Value::Map(_))
        )
    }
}

/// Kind of a single element
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Scalar element
    Scalar(ScalarKind),
    /// Nested entity of the named type
    Entity(String),
}

/// Kind of a schema property
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// One element
    Single(ElementKind),
    /// Ordered list of elements
    ListOf(ElementKind),
}

impl PropertyKind {
    /// Shorthand for a single scalar kind
    #[must_use]
    pub fn scalar(kind: ScalarKind) -> Self {
        Self::Single(ElementKind::Scalar(kind))
    }

    /// Shorthand for a single entity kind
    #[must_use]
    pub fn entity(type_name: impl Into<String>) -> Self {
        Self::Single(ElementKind::Entity(type_name.into()))
    }

    /// Registry tag
    #[must_use]
    pub fn tag(&self) -> String {
        self.to_string()
    }

    /// Entity type named by this kind, if any
    #[must_use]
    pub fn entity_type(&self) -> Option<&str> {
        match self {
            Self::Single(ElementKind::Entity(t)) | Self::ListOf(ElementKind::Entity(t)) => Some(t),
            _ => None,
        }
    }

    /// Whether this is a list kind
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, Self::ListOf(_))
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(k) => write!(f, "{}", k.tag()),
            Self::Entity(t) => write!(f, "entity:{}", t),
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(e) => write!(f, "{}", e),
            Self::ListOf(e) => write!(f, "list:{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(PropertyKind::scalar(ScalarKind::Integer).tag(), "integer");
        assert_eq!(PropertyKind::entity("service").tag(), "entity:service");
        assert_eq!(
            PropertyKind::ListOf(ElementKind::Scalar(ScalarKind::Mapping)).tag(),
            "list:dict"
        );
    }

    #[test]
    fn test_entity_type() {
        assert_eq!(PropertyKind::entity("endpoint").entity_type(), Some("endpoint"));
        assert_eq!(PropertyKind::scalar(ScalarKind::String).entity_type(), None);
    }

    #[test]
    fn test_scalar_accepts() {
        assert!(ScalarKind::Integer.accepts(&Value::Int(3)));
        assert!(!ScalarKind::Integer.accepts(&Value::from("3")));
        assert!(!ScalarKind::Boolean.accepts(&Value::Int(1)));
        assert!(ScalarKind::Mapping.accepts(&ScalarKind::Mapping.default_value()));
    }
}
