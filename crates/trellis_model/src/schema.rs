//! Schema store: per-type property schemas loaded from a declarative template.
//!
//! The store is built once and never mutated afterwards, so a single
//! instance can be shared by any number of concurrent compilations.

use crate::builder::TypeBuilder;
use crate::kind::{ElementKind, PropertyKind, ScalarKind};
use crate::validator::ValidatorRegistry;
use crate::value::Value;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use trellis_core::{CompileError, CompileResult};

/// Template shipped with the crate: the blueprint and runbook entity set
pub const BUILTIN_TEMPLATE: &str = include_str!("../templates/builtin.json");

static BUILTIN: OnceCell<SchemaStore> = OnceCell::new();

/// One property of an entity type
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    /// Property name
    pub name: String,
    /// Property kind
    pub kind: PropertyKind,
    /// Default value
    pub default: Value,
}

/// Schema of one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSchema {
    /// Type name used by authors, e.g. `service`
    pub name: String,
    /// Reference kind used by the remote engine, e.g. `app_service`
    pub ref_kind: String,
    /// Properties in serialization order
    pub properties: IndexMap<String, PropertySpec>,
    /// Alternate spellings, alias -> property
    pub aliases: IndexMap<String, String>,
}

impl TypeSchema {
    /// Get a property by its canonical name
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.get(name)
    }

    /// Canonical property name for a spelling (property name or alias)
    #[must_use]
    pub fn canonical<'a>(&'a self, spelling: &'a str) -> Option<&'a str> {
        if self.properties.contains_key(spelling) {
            return Some(spelling);
        }
        self.aliases.get(spelling).map(String::as_str)
    }
}

/// Source form of a template
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateSource {
    types: IndexMap<String, TypeSource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeSource {
    kind: String,
    #[serde(default)]
    properties: IndexMap<String, PropertySource>,
    #[serde(default)]
    aliases: IndexMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PropertySource {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    default: Option<JsonValue>,
    #[serde(default)]
    items: Option<Box<PropertySource>>,
    #[serde(default, rename = "x-dsl-type")]
    dsl_type: Option<String>,
}

/// Write-once store of entity schemas plus the validator registry they use
#[derive(Clone)]
pub struct SchemaStore {
    types: IndexMap<String, Arc<TypeSchema>>,
    by_ref_kind: IndexMap<String, String>,
    registry: Arc<ValidatorRegistry>,
}

impl SchemaStore {
    /// Load a store from a parsed template
    ///
    /// # Errors
    ///
    /// Returns `SchemaLoad` for malformed or incomplete templates and
    /// `UnknownKind` when a property names an undeclared entity type
    pub fn load(template: &JsonValue) -> CompileResult<Self> {
        let source: TemplateSource =
            serde_json::from_value(template.clone()).map_err(|e| CompileError::SchemaLoad {
                reason: e.to_string(),
            })?;
        Self::from_source(source)
    }

    /// Load a store from template text
    ///
    /// # Errors
    ///
    /// Same as [`SchemaStore::load`]
    pub fn load_str(text: &str) -> CompileResult<Self> {
        let source: TemplateSource =
            serde_json::from_str(text).map_err(|e| CompileError::SchemaLoad {
                reason: e.to_string(),
            })?;
        Self::from_source(source)
    }

    /// Process-wide store loaded from [`BUILTIN_TEMPLATE`] on first use
    ///
    /// # Errors
    ///
    /// Returns the load error if the built-in template is invalid
    pub fn builtin() -> CompileResult<&'static SchemaStore> {
        BUILTIN.get_or_try_init(|| Self::load_str(BUILTIN_TEMPLATE))
    }

    fn from_source(source: TemplateSource) -> CompileResult<Self> {
        let mut registry = ValidatorRegistry::with_builtins();
        let mut by_ref_kind = IndexMap::new();

        // Entity validators first, so properties may name any declared type
        for (type_name, ty) in &source.types {
            if ty.kind.is_empty() {
                return Err(schema_err(format!("type {} declares no reference kind", type_name)));
            }
            if let Some(other) = by_ref_kind.insert(ty.kind.clone(), type_name.clone()) {
                return Err(schema_err(format!(
                    "types {} and {} share reference kind {}",
                    other, type_name, ty.kind
                )));
            }
            registry.register_entity(type_name, &ty.kind)?;
        }

        let mut types = IndexMap::new();
        for (type_name, ty) in source.types {
            let mut properties = IndexMap::new();
            for (prop_name, prop) in &ty.properties {
                let kind = resolve_kind(&type_name, prop_name, prop)?;
                let validator = registry.lookup(&kind.tag())?;
                let default = match &prop.default {
                    None => validator.default_value(),
                    Some(_) if kind.entity_type().is_some() => {
                        return Err(schema_err(format!(
                            "{}.{} is entity-typed and cannot declare a default",
                            type_name, prop_name
                        )));
                    }
                    Some(json) => {
                        let value = Value::from_plain_json(json).map_err(|reason| {
                            schema_err(format!("default of {}.{}: {}", type_name, prop_name, reason))
                        })?;
                        validator.check(&value).map_err(|reason| {
                            schema_err(format!("default of {}.{}: {}", type_name, prop_name, reason))
                        })?;
                        value
                    }
                };
                properties.insert(
                    prop_name.clone(),
                    PropertySpec {
                        name: prop_name.clone(),
                        kind,
                        default,
                    },
                );
            }

            for (alias, target) in &ty.aliases {
                if properties.contains_key(alias) {
                    return Err(schema_err(format!(
                        "alias {} of {} shadows a property",
                        alias, type_name
                    )));
                }
                if !properties.contains_key(target) {
                    return Err(schema_err(format!(
                        "alias {} of {} points at unknown property {}",
                        alias, type_name, target
                    )));
                }
            }

            tracing::debug!(
                type_name = %type_name,
                properties = properties.len(),
                aliases = ty.aliases.len(),
                "Loaded entity type"
            );
            types.insert(
                type_name.clone(),
                Arc::new(TypeSchema {
                    name: type_name,
                    ref_kind: ty.kind,
                    properties,
                    aliases: ty.aliases,
                }),
            );
        }

        tracing::info!(types = types.len(), kinds = registry.count(), "Schema store loaded");
        Ok(Self {
            types,
            by_ref_kind,
            registry: Arc::new(registry),
        })
    }

    /// Schema of a type
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the type was not declared
    pub fn type_schema(&self, type_name: &str) -> CompileResult<Arc<TypeSchema>> {
        self.types
            .get(type_name)
            .map(Arc::clone)
            .ok_or_else(|| CompileError::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    /// Default attributes of a type, in schema order
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the type was not declared
    pub fn defaults_for(&self, type_name: &str) -> CompileResult<IndexMap<String, Value>> {
        let schema = self.type_schema(type_name)?;
        Ok(schema
            .properties
            .values()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect())
    }

    /// Start declaring an entity of the given type
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the type was not declared
    pub fn begin_type(&self, type_name: &str) -> CompileResult<TypeBuilder> {
        let schema = self.type_schema(type_name)?;
        Ok(TypeBuilder::new(schema, Arc::clone(&self.registry)))
    }

    /// Validator registry shared by every entity of this store
    #[must_use]
    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    /// Type declared with the given reference kind
    #[must_use]
    pub fn type_for_kind(&self, ref_kind: &str) -> Option<&str> {
        self.by_ref_kind.get(ref_kind).map(String::as_str)
    }

    /// Check if a type is declared
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Declared types, in template order
    pub fn types(&self) -> impl Iterator<Item = &TypeSchema> {
        self.types.values().map(AsRef::as_ref)
    }
}

impl std::fmt::Debug for SchemaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaStore")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .field("kinds", &self.registry.count())
            .finish()
    }
}

fn schema_err(reason: String) -> CompileError {
    CompileError::SchemaLoad { reason }
}

fn resolve_kind(type_name: &str, prop_name: &str, prop: &PropertySource) -> CompileResult<PropertyKind> {
    match prop.ty.as_str() {
        "array" => {
            let items = prop.items.as_deref().ok_or_else(|| {
                schema_err(format!("array property {}.{} has no items", type_name, prop_name))
            })?;
            if items.ty == "array" {
                return Err(schema_err(format!(
                    "{}.{}: nested arrays are not supported",
                    type_name, prop_name
                )));
            }
            resolve_element(type_name, prop_name, items).map(PropertyKind::ListOf)
        }
        _ => resolve_element(type_name, prop_name, prop).map(PropertyKind::Single),
    }
}

fn resolve_element(type_name: &str, prop_name: &str, prop: &PropertySource) -> CompileResult<ElementKind> {
    match prop.ty.as_str() {
        "string" => Ok(ElementKind::Scalar(ScalarKind::String)),
        "integer" => Ok(ElementKind::Scalar(ScalarKind::Integer)),
        "boolean" => Ok(ElementKind::Scalar(ScalarKind::Boolean)),
        "object" => match prop.dsl_type.as_deref() {
            None => Err(schema_err(format!(
                "object property {}.{} has no x-dsl-type",
                type_name, prop_name
            ))),
            Some("dict") => Ok(ElementKind::Scalar(ScalarKind::Mapping)),
            Some(entity) => Ok(ElementKind::Entity(entity.to_string())),
        },
        other => Err(schema_err(format!(
            "{}.{} has unsupported type {}",
            type_name, prop_name, other
        ))),
    }
}
