//! Authoring manifests.
//!
//! A manifest is the file form of a declaration: the root entity's
//! attributes, plus a statement body for every runbook or action that
//! owns a task graph.

use crate::assembler::{locate_owner, Assembler, CompiledGraph};
use crate::document::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use trellis_core::{CompileError, CompileResult, CompilerConfig};
use trellis_model::{Entity, Reference, SchemaStore, Value};
use trellis_plan::{replay, Statement, TaskGraphCompiler};
use uuid::Uuid;

/// Optional document header overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestMetadata {
    /// Document name
    #[serde(default)]
    pub name: Option<String>,
    /// Server identifier from a prior round-trip
    #[serde(default)]
    pub uuid: Option<Uuid>,
}

/// The declared root entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootDecl {
    /// Entity type name
    #[serde(rename = "type")]
    pub type_name: String,
    /// Attributes, decoded against the type's schema
    pub attrs: JsonValue,
}

/// A task body and the entity it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphDecl {
    /// Owning runbook or action
    pub owner: Reference,
    /// Entity directly holding the owner; required when several entities
    /// hold an owner of the same kind and name
    #[serde(default)]
    pub parent: Option<Reference>,
    /// Graph name; `<parent>_<owner>` with a parent, else the owner's name
    #[serde(default)]
    pub name: Option<String>,
    /// Target for tasks that name none
    #[serde(default)]
    pub default_target: Option<Reference>,
    /// Credential for tasks that name none
    #[serde(default)]
    pub default_credential: Option<Reference>,
    /// Variables known before the first statement
    #[serde(default)]
    pub variables: Vec<String>,
    /// Statements
    pub body: Vec<Statement>,
}

/// A complete authoring manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Header overrides
    #[serde(default)]
    pub metadata: ManifestMetadata,
    /// Root entity
    pub root: RootDecl,
    /// Task graphs, in compile order
    #[serde(default)]
    pub graphs: Vec<GraphDecl>,
}

impl Manifest {
    /// Parse a manifest from JSON text
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if the text is not a manifest
    pub fn from_json(text: &str) -> CompileResult<Self> {
        serde_json::from_str(text).map_err(|e| CompileError::Encoding {
            reason: format!("manifest: {}", e),
        })
    }

    /// Compile into a document
    ///
    /// # Errors
    ///
    /// Returns the first error from decoding the root entity, recording a
    /// task body, or assembling the document
    pub fn compile(&self, store: &SchemaStore, config: &CompilerConfig) -> CompileResult<Document> {
        let root = Entity::from_json(store, &self.root.type_name, &self.root.attrs)?;

        let mut known = Vec::new();
        root.walk(&mut |entity| known.push(entity.reference()));

        let graphs = self
            .graphs
            .iter()
            .map(|decl| compile_graph(&root, decl, &known, config))
            .collect::<CompileResult<Vec<_>>>()?;

        let mut assembler = Assembler::new(config.clone());
        if let Some(name) = &self.metadata.name {
            assembler = assembler.with_name(name.clone());
        }
        if let Some(uuid) = self.metadata.uuid {
            assembler = assembler.with_uuid(uuid);
        }
        assembler.assemble(&root, &graphs)
    }
}

fn compile_graph(
    root: &Entity,
    decl: &GraphDecl,
    known: &[Reference],
    config: &CompilerConfig,
) -> CompileResult<CompiledGraph> {
    let name = decl.name.clone().unwrap_or_else(|| match &decl.parent {
        Some(parent) => format!("{}_{}", parent.name, decl.owner.name),
        None => decl.owner.name.clone(),
    });
    let (ancestors, owner) = locate_owner(root, &decl.owner, decl.parent.as_ref(), &format!("graph:{}", name))?;

    let mut variables = decl.variables.clone();
    owner.walk(&mut |entity| {
        if entity.type_name() == "variable" {
            variables.push(entity.name().to_string());
        }
    });
    variables.extend(enclosing_variables(root, &ancestors));
    let default_target = decl
        .default_target
        .clone()
        .or_else(|| reference_field(&owner, "default_target_reference"));
    let default_credential = decl
        .default_credential
        .clone()
        .or_else(|| reference_field(root, "default_credential_local_reference"));

    let mut compiler = TaskGraphCompiler::new(name)
        .with_config(config.clone())
        .with_known_targets(known.iter().cloned())
        .with_variables(variables);
    if let Some(target) = default_target {
        compiler = compiler.with_default_target(target);
    }
    if let Some(credential) = default_credential {
        compiler = compiler.with_default_credential(credential);
    }

    replay(&mut compiler, &decl.body)?;
    let graph = compiler.finish()?;
    tracing::debug!(graph = %graph.name, owner = %decl.owner, nodes = graph.node_count(), "Compiled task body");
    let compiled = CompiledGraph::new(decl.owner.clone(), graph);
    Ok(match &decl.parent {
        Some(parent) => compiled.with_parent(parent.clone()),
        None => compiled,
    })
}

/// Names in the `variable_list` of each entity on the path down to an owner
fn enclosing_variables(root: &Entity, ancestors: &[Reference]) -> Vec<String> {
    let mut names = Vec::new();
    root.walk_paths(&mut |path, entity| {
        let on_path = ancestors.get(path.len()).is_some_and(|a| a.key() == entity.reference().key())
            && path.iter().zip(ancestors).all(|(a, b)| a.key() == b.key());
        if !on_path {
            return;
        }
        if let Some(list) = entity.get("variable_list").and_then(Value::as_list) {
            names.extend(list.iter().filter_map(Value::as_entity).map(|v| v.name().to_string()));
        }
    });
    names
}

fn reference_field(entity: &Entity, field: &str) -> Option<Reference> {
    match entity.get(field)? {
        Value::Ref(r) => Some(r.clone()),
        Value::Entity(e) => Some(e.reference()),
        _ => None,
    }
}
