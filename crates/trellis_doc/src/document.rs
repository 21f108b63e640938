//! The submission-ready document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use trellis_core::{CompileResult, Digest};
use uuid::Uuid;

/// Document header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Document name
    pub name: String,
    /// Server identifier from a prior round-trip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    /// Document format version
    pub spec_version: u32,
    /// Compile time, present only when injected by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_at: Option<DateTime<Utc>>,
}

/// Document body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    /// Root entity name
    pub name: String,
    /// Root entity description
    pub description: String,
    /// Root entity fields, nested entities and task definitions
    pub resources: Map<String, JsonValue>,
}

/// One compiled document. Never mutated after assembly except to stamp it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Header
    pub metadata: Metadata,
    /// Body
    pub spec: Spec,
}

impl Document {
    /// Stamp the compile time
    #[must_use]
    pub fn with_compiled_at(mut self, at: DateTime<Utc>) -> Self {
        self.metadata.compiled_at = Some(at);
        self
    }

    /// Canonical JSON value
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if serialization fails
    pub fn to_json(&self) -> CompileResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    /// Canonical JSON bytes
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if serialization fails
    pub fn to_bytes(&self) -> CompileResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Pretty JSON text, for files meant to be read
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if serialization fails
    pub fn to_pretty(&self) -> CompileResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// BLAKE3 digest of the canonical bytes
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if serialization fails
    pub fn digest(&self) -> CompileResult<Digest> {
        Ok(Digest::of_json(self)?)
    }

    /// Task definitions of the root entity, if it owns a graph
    #[must_use]
    pub fn task_definitions(&self) -> Option<&Vec<JsonValue>> {
        self.spec
            .resources
            .get("task_definition_list")
            .and_then(JsonValue::as_array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc() -> Document {
        let mut resources = Map::new();
        resources.insert("port".to_string(), json!(8080));
        Document {
            metadata: Metadata {
                name: "svc".to_string(),
                uuid: None,
                spec_version: 1,
                compiled_at: None,
            },
            spec: Spec {
                name: "svc".to_string(),
                description: String::new(),
                resources,
            },
        }
    }

    #[test]
    fn test_shape() {
        let value = doc().to_json().unwrap();
        assert_eq!(
            value,
            json!({
                "metadata": {"name": "svc", "spec_version": 1},
                "spec": {"name": "svc", "description": "", "resources": {"port": 8080}}
            })
        );
    }

    #[test]
    fn test_digest_stable() {
        assert_eq!(doc().digest().unwrap(), doc().digest().unwrap());
        assert_eq!(doc().digest().unwrap().to_hex().len(), 64);
    }

    #[test]
    fn test_stamp_changes_digest() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let stamped = doc().with_compiled_at(at);
        assert_ne!(stamped.digest().unwrap(), doc().digest().unwrap());
        let value = stamped.to_json().unwrap();
        assert_eq!(value["metadata"]["compiled_at"], "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_round_trip_text() {
        let text = doc().to_pretty().unwrap();
        let back: Document = serde_json::from_str(&text).unwrap();
        assert_eq!(back, doc());
        assert!(back.task_definitions().is_none());
    }
}
