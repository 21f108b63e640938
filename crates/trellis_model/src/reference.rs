//! References between declared entities and server-side resources.

use crate::entity::Entity;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

/// A weak pointer to another entity or to a pre-existing server resource.
///
/// A reference never owns its target; the remote engine resolves it by
/// kind and name (and UUID when one is known from a prior round-trip).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Reference kind, e.g. `app_endpoint`
    pub kind: String,
    /// Target name
    pub name: String,
    /// Server identifier, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    /// Points at a server-side resource with no local definition
    #[serde(default, skip_serializing)]
    pub external: bool,
}

impl Reference {
    /// Create a reference to a locally declared entity
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            uuid: None,
            external: false,
        }
    }

    /// Create a reference to a pre-existing server resource
    #[must_use]
    pub fn external(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external: true,
            ..Self::new(kind, name)
        }
    }

    /// Attach a server identifier
    #[must_use]
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Kind and name, the identity used for resolution
    #[must_use]
    pub fn key(&self) -> (&str, &str) {
        (&self.kind, &self.name)
    }

    /// Serialized form embedded in documents
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self.uuid {
            Some(uuid) => json!({"kind": self.kind, "name": self.name, "uuid": uuid.to_string()}),
            None => json!({"kind": self.kind, "name": self.name}),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Produce a reference to a declared entity.
///
/// The kind is the entity type's declared reference kind; the UUID is
/// carried over when the entity already has a server identifier.
#[must_use]
pub fn resolve_ref(entity: &Entity) -> Reference {
    Reference {
        kind: entity.ref_kind().to_string(),
        name: entity.name().to_string(),
        uuid: entity.uuid(),
        external: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_new() {
        let r = Reference::new("app_endpoint", "linux");
        assert_eq!(r.key(), ("app_endpoint", "linux"));
        assert!(!r.external);
        assert!(r.uuid.is_none());
    }

    #[test]
    fn test_reference_external() {
        let r = Reference::external("subnet", "vlan0");
        assert!(r.external);
    }

    #[test]
    fn test_reference_json_skips_external_flag() {
        let r = Reference::external("account", "ntnx");
        let text = serde_json::to_string(&r).unwrap();
        assert_eq!(text, r#"{"kind":"account","name":"ntnx"}"#);
    }

    #[test]
    fn test_reference_deserialize_external() {
        let r: Reference =
            serde_json::from_str(r#"{"kind":"account","name":"ntnx","external":true}"#).unwrap();
        assert!(r.external);
    }

    #[test]
    fn test_reference_with_uuid() {
        let uuid = Uuid::from_bytes([7u8; 16]);
        let r = Reference::new("app_service", "db").with_uuid(uuid);
        assert_eq!(r.to_json()["uuid"], uuid.to_string());
        assert_eq!(format!("{}", r), "app_service:db");
    }
}
