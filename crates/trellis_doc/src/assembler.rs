//! Document assembly.
//!
//! Combines a root entity tree with the task graphs of its runbooks and
//! actions. Before anything is emitted every reference is checked: it must
//! point at an entity declared somewhere in the tree, or be marked external.

use crate::document::{Document, Metadata, Spec};
use indexmap::{IndexMap, IndexSet};
use trellis_core::{CompileError, CompileResult, CompilerConfig};
use trellis_model::{Entity, Reference, Value};
use trellis_plan::{task_definition_list, RenderedGraph, TaskGraph};
use uuid::Uuid;

/// A task graph and the entity that owns it
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGraph {
    /// Runbook or action the graph belongs to
    pub owner: Reference,
    /// Entity directly holding the owner, when its kind and name alone are ambiguous
    pub parent: Option<Reference>,
    /// The graph
    pub graph: TaskGraph,
}

impl CompiledGraph {
    /// Pair a graph with its owner
    #[must_use]
    pub fn new(owner: Reference, graph: TaskGraph) -> Self {
        Self {
            owner,
            parent: None,
            graph,
        }
    }

    /// Pin the owner to the one held by `parent`
    #[must_use]
    pub fn with_parent(mut self, parent: Reference) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// `(kind, name)` of each entity from the root down to a graph owner
type OwnerPath = Vec<(String, String)>;

fn path_key(ancestors: &[Reference], entity: &Entity) -> OwnerPath {
    ancestors
        .iter()
        .map(|r| (r.kind.clone(), r.name.clone()))
        .chain(std::iter::once((entity.ref_kind().to_string(), entity.name().to_string())))
        .collect()
}

/// Find the single entity a graph owner names.
///
/// `parent`, when given, must be the entity directly holding the owner.
///
/// # Errors
///
/// - `DanglingReference` if nothing matches
/// - `InvalidGraph` if more than one entity matches
pub(crate) fn locate_owner(
    root: &Entity,
    owner: &Reference,
    parent: Option<&Reference>,
    referrer: &str,
) -> CompileResult<(Vec<Reference>, Entity)> {
    let mut matches: Vec<(Vec<Reference>, Entity)> = Vec::new();
    root.walk_paths(&mut |ancestors, entity| {
        let held_by_parent = parent.map_or(true, |p| ancestors.last().is_some_and(|a| a.key() == p.key()));
        if entity.ref_kind() == owner.kind && entity.name() == owner.name && held_by_parent {
            matches.push((ancestors.to_vec(), entity.clone()));
        }
    });
    if matches.len() > 1 {
        return Err(CompileError::InvalidGraph {
            reason: format!("{} is held by {} entities; name its parent", owner, matches.len()),
        });
    }
    matches.pop().ok_or_else(|| CompileError::DanglingReference {
        kind: owner.kind.clone(),
        name: owner.name.clone(),
        referrer: referrer.to_string(),
    })
}

/// Assembles documents
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    config: CompilerConfig,
    name: Option<String>,
    uuid: Option<Uuid>,
}

impl Assembler {
    /// Create an assembler
    #[must_use]
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            name: None,
            uuid: None,
        }
    }

    /// Override the document name (defaults to the root entity's name)
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the document identifier (defaults to the root entity's)
    #[must_use]
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Assemble one document
    ///
    /// # Errors
    ///
    /// - `DanglingReference` if an entity field, a graph owner, or a task
    ///   target or credential names nothing declared and is not external
    /// - `InvalidGraph` if two graphs share an owner
    pub fn assemble(&self, root: &Entity, graphs: &[CompiledGraph]) -> CompileResult<Document> {
        let declared = declared_references(root);

        for (referrer, reference) in root.references() {
            check_declared(&declared, &reference, &referrer)?;
        }

        let mut rendered: IndexMap<OwnerPath, RenderedGraph> = IndexMap::new();
        for compiled in graphs {
            let graph = &compiled.graph;
            let referrer = format!("graph:{}", graph.name);
            if compiled.owner.external {
                return Err(CompileError::InvalidGraph {
                    reason: format!("{} is external and cannot own a task graph", compiled.owner),
                });
            }
            let (ancestors, owner) = locate_owner(root, &compiled.owner, compiled.parent.as_ref(), &referrer)?;
            for node in graph.nodes.values() {
                let referrer = format!("{}.{}", graph.name, node.name);
                for reference in node.target.iter().chain(node.credential.iter()) {
                    check_declared(&declared, reference, &referrer)?;
                }
            }

            let key = path_key(&ancestors, &owner);
            if rendered.contains_key(&key) {
                return Err(CompileError::InvalidGraph {
                    reason: format!("{} owns more than one task graph", compiled.owner),
                });
            }
            rendered.insert(key, task_definition_list(graph, &self.config));
        }

        let serialized = root.serialize_with(&mut |ancestors, entity, object| {
            if rendered.is_empty() {
                return;
            }
            if let Some(graph) = rendered.shift_remove(&path_key(ancestors, entity)) {
                graph.inject(object);
            }
        });
        let serde_json::Value::Object(mut resources) = serialized else {
            return Err(CompileError::Encoding {
                reason: "root entity did not serialize to an object".to_string(),
            });
        };
        resources.shift_remove("uuid");
        resources.shift_remove("name");
        resources.shift_remove("description");

        let name = self.name.clone().unwrap_or_else(|| root.name().to_string());
        let description = root
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        tracing::info!(
            document = %name,
            root = %root.type_name(),
            graphs = graphs.len(),
            "Assembled document"
        );

        Ok(Document {
            metadata: Metadata {
                name: name.clone(),
                uuid: self.uuid.or_else(|| root.uuid()),
                spec_version: self.config.spec_version,
                compiled_at: None,
            },
            spec: Spec {
                name,
                description,
                resources,
            },
        })
    }
}

/// `(kind, name)` of every entity in the tree
fn declared_references(root: &Entity) -> IndexSet<(String, String)> {
    let mut declared = IndexSet::new();
    root.walk(&mut |entity| {
        declared.insert((entity.ref_kind().to_string(), entity.name().to_string()));
    });
    declared
}

fn check_declared(
    declared: &IndexSet<(String, String)>,
    reference: &Reference,
    referrer: &str,
) -> CompileResult<()> {
    if reference.external || declared.contains(&(reference.kind.clone(), reference.name.clone())) {
        return Ok(());
    }
    Err(CompileError::DanglingReference {
        kind: reference.kind.clone(),
        name: reference.name.clone(),
        referrer: referrer.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use trellis_model::SchemaStore;
    use trellis_plan::{ScriptType, Task, TaskGraphCompiler};

    fn web() -> Reference {
        Reference::new("app_endpoint", "web")
    }

    fn runbook() -> Entity {
        let store = SchemaStore::builtin().unwrap();
        Entity::from_json(
            store,
            "runbook",
            &json!({
                "name": "restart",
                "description": "restart the web tier",
                "endpoints": [{"name": "web", "values": ["10.0.0.1"]}],
                "default_target": {"$ref": {"kind": "app_endpoint", "name": "web"}}
            }),
        )
        .unwrap()
    }

    fn graph(target: Reference) -> TaskGraph {
        let mut c = TaskGraphCompiler::new("restart").with_config(
            CompilerConfig::new().with_strict_targets(false),
        );
        c.record(Task::exec(ScriptType::Shell, "systemctl restart web").with_target(target))
            .unwrap();
        c.finish().unwrap()
    }

    fn owner() -> Reference {
        Reference::new("app_runbook", "restart")
    }

    #[test]
    fn test_assemble_runbook() {
        let doc = Assembler::new(CompilerConfig::new())
            .assemble(&runbook(), &[CompiledGraph::new(owner(), graph(web()))])
            .unwrap();

        assert_eq!(doc.metadata.name, "restart");
        assert_eq!(doc.metadata.spec_version, 1);
        assert_eq!(doc.spec.description, "restart the web tier");
        assert!(!doc.spec.resources.contains_key("name"));
        let tasks = doc.task_definitions().unwrap();
        assert_eq!(tasks[0]["name"], "restart_dag");
        assert_eq!(tasks[1]["target_any_local_reference"]["name"], "web");
        assert_eq!(
            doc.spec.resources["main_task_local_reference"],
            json!({"kind": "app_task", "name": "restart_dag"})
        );
        let keys: Vec<_> = doc.spec.resources.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "endpoint_definition_list",
                "credential_definition_list",
                "variable_list",
                "default_target_reference",
                "main_task_local_reference",
                "task_definition_list"
            ]
        );
    }

    #[test]
    fn test_dangling_entity_reference() {
        let store = SchemaStore::builtin().unwrap();
        let rb = Entity::from_json(
            store,
            "runbook",
            &json!({"name": "rb", "default_target": {"$ref": {"kind": "app_endpoint", "name": "ghost"}}}),
        )
        .unwrap();
        let err = Assembler::default().assemble(&rb, &[]).unwrap_err();
        assert_eq!(
            err,
            CompileError::DanglingReference {
                kind: "app_endpoint".to_string(),
                name: "ghost".to_string(),
                referrer: "runbook:rb.default_target_reference".to_string(),
            }
        );
    }

    #[test]
    fn test_dangling_task_target() {
        let ghost = Reference::new("app_endpoint", "ghost");
        let err = Assembler::default()
            .assemble(&runbook(), &[CompiledGraph::new(owner(), graph(ghost))])
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::DanglingReference { ref name, ref referrer, .. }
                if name == "ghost" && referrer == "restart.exec_1"
        ));
    }

    #[test]
    fn test_external_reference_passes() {
        let shared = Reference::external("app_endpoint", "shared");
        assert!(Assembler::default()
            .assemble(&runbook(), &[CompiledGraph::new(owner(), graph(shared))])
            .is_ok());
    }

    #[test]
    fn test_undeclared_owner() {
        let err = Assembler::default()
            .assemble(
                &runbook(),
                &[CompiledGraph::new(Reference::new("app_runbook", "other"), graph(web()))],
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::DanglingReference { ref referrer, .. } if referrer == "graph:restart"));
    }

    #[test]
    fn test_external_owner_rejected() {
        let err = Assembler::default()
            .assemble(
                &runbook(),
                &[CompiledGraph::new(Reference::external("app_runbook", "restart"), graph(web()))],
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidGraph { .. }));
    }

    #[test]
    fn test_parent_pins_owner() {
        let store = SchemaStore::builtin().unwrap();
        let shop = Entity::from_json(
            store,
            "blueprint",
            &json!({"name": "shop", "services": [
                {"name": "api", "actions": [{"name": "stop"}]},
                {"name": "db", "actions": [{"name": "stop"}]}
            ]}),
        )
        .unwrap();
        let stop = Reference::new("app_action", "stop");
        let db = Reference::new("app_service", "db");
        let shared = || graph(Reference::external("app_endpoint", "shared"));

        let err = Assembler::default()
            .assemble(&shop, &[CompiledGraph::new(stop.clone(), shared())])
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidGraph { .. }));

        let doc = Assembler::default()
            .assemble(&shop, &[CompiledGraph::new(stop, shared()).with_parent(db)])
            .unwrap();
        let services = &doc.spec.resources["service_definition_list"];
        assert!(services[0]["action_list"][0].get("main_task_local_reference").is_none());
        assert_eq!(
            services[1]["action_list"][0]["main_task_local_reference"],
            json!({"kind": "app_task", "name": "restart_dag"})
        );
    }

    #[test]
    fn test_two_graphs_one_owner() {
        let graphs = [
            CompiledGraph::new(owner(), graph(web())),
            CompiledGraph::new(owner(), graph(web())),
        ];
        let err = Assembler::default().assemble(&runbook(), &graphs).unwrap_err();
        assert!(matches!(err, CompileError::InvalidGraph { .. }));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let build = || {
            Assembler::new(CompilerConfig::new())
                .assemble(&runbook(), &[CompiledGraph::new(owner(), graph(web()))])
                .unwrap()
                .to_bytes()
                .unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_service_scenario() {
        let store = SchemaStore::load_str(
            r#"{"types": {"Service": {"kind": "app_service", "properties": {
                "name": {"type": "string", "default": ""},
                "port": {"type": "integer", "default": 0}}}}}"#,
        )
        .unwrap();
        let builder = store.begin_type("Service").unwrap();
        assert!(matches!(
            builder.set("port", "abc"),
            Err(CompileError::InvalidValue { .. })
        ));
        let service = store.begin_type("Service").unwrap().set("port", 8080).unwrap().finish();
        assert_eq!(service.serialize(), json!({"name": "", "port": 8080}));

        let doc = Assembler::default().assemble(&service, &[]).unwrap();
        assert_eq!(doc.spec.resources.get("port"), Some(&json!(8080)));
    }

    #[test]
    fn test_uuid_carried_to_metadata() {
        let uuid = Uuid::from_bytes([9u8; 16]);
        let mut rb = runbook();
        rb.set_uuid(uuid);
        let doc = Assembler::default().assemble(&rb, &[]).unwrap();
        assert_eq!(doc.metadata.uuid, Some(uuid));
        assert!(!doc.spec.resources.contains_key("uuid"));
    }

    proptest! {
        #[test]
        fn prop_task_list_follows_body(scripts in prop::collection::vec("[a-z ]{0,12}", 1..12)) {
            let build = || {
                let mut c = TaskGraphCompiler::new("restart")
                    .with_known_targets([web()])
                    .with_default_target(web());
                for script in &scripts {
                    c.record(Task::exec(ScriptType::Shell, script.clone())).unwrap();
                }
                let graph = c.finish().unwrap();
                Assembler::default()
                    .assemble(&runbook(), &[CompiledGraph::new(owner(), graph)])
                    .unwrap()
            };
            let doc = build();
            let tasks = doc.task_definitions().unwrap();
            prop_assert_eq!(tasks.len(), scripts.len() + 1);
            prop_assert_eq!(tasks[0]["attrs"]["edges"].as_array().unwrap().len(), scripts.len() - 1);
            prop_assert_eq!(doc.digest().unwrap(), build().digest().unwrap());
        }
    }
}
