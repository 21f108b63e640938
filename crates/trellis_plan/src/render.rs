//! Rendering a task graph into task definitions.
//!
//! The remote engine expects a flat `task_definition_list` in which
//! nesting is expressed by name. A synthetic `DAG` task holds the roots,
//! and every child group becomes a `META` task named `<owner>_<label>`.

use crate::compiler::root_task_name;
use crate::dag::{Edge, TaskGraph, TaskNode};
use crate::task::TaskKind;
use serde_json::{json, Map, Value as JsonValue};
use trellis_core::{CompilerConfig, TaskId};

const TASK_KIND: &str = "app_task";

/// Rendered task definitions of one graph
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedGraph {
    /// Flat task list, root task first
    pub task_definition_list: Vec<JsonValue>,
    /// Reference to the root task
    pub main_task_local_reference: JsonValue,
}

impl RenderedGraph {
    /// Insert both fields into an owner entity's serialized object
    pub fn inject(self, object: &mut Map<String, JsonValue>) {
        object.insert(
            "main_task_local_reference".to_string(),
            self.main_task_local_reference,
        );
        object.insert(
            "task_definition_list".to_string(),
            JsonValue::Array(self.task_definition_list),
        );
    }
}

/// Render a graph
#[must_use]
pub fn task_definition_list(graph: &TaskGraph, config: &CompilerConfig) -> RenderedGraph {
    let renderer = Renderer { graph, config };
    let root_name = root_task_name(&graph.name);

    let mut tasks = Vec::with_capacity(graph.node_count() + 1);
    tasks.push(renderer.container(&root_name, "DAG", &graph.root_ids));
    for node in graph.nodes.values() {
        tasks.push(renderer.node(node));
        for group in &node.groups {
            let name = group_task_name(&node.name, &group.label);
            tasks.push(renderer.container(&name, "META", &group.child_ids));
        }
    }

    tracing::debug!(graph = %graph.name, tasks = tasks.len(), "Rendered task definitions");
    RenderedGraph {
        task_definition_list: tasks,
        main_task_local_reference: task_ref(&root_name),
    }
}

/// Name of the META task wrapping a child group
#[must_use]
pub fn group_task_name(owner: &str, label: &str) -> String {
    format!("{}_{}", owner, label)
}

struct Renderer<'a> {
    graph: &'a TaskGraph,
    config: &'a CompilerConfig,
}

impl Renderer<'_> {
    fn container(&self, name: &str, type_str: &str, children: &[TaskId]) -> JsonValue {
        let edges: Vec<_> = self
            .graph
            .edges_within(children)
            .iter()
            .map(|e| self.edge(e))
            .collect();
        let mut task = self.header(name, type_str);
        task.insert("attrs".to_string(), json!({ "edges": edges }));
        task.insert(
            "child_tasks_local_reference_list".to_string(),
            JsonValue::Array(children.iter().map(|id| self.task_ref_by_id(*id)).collect()),
        );
        task.insert("status_map_list".to_string(), json!([]));
        JsonValue::Object(task)
    }

    fn node(&self, node: &TaskNode) -> JsonValue {
        let mut task = self.header(&node.name, node.kind.type_str());
        if let Some(target) = &node.target {
            task.insert("target_any_local_reference".to_string(), target.to_json());
        }

        let mut attrs: Map<String, JsonValue> = node
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(credential) = &node.credential {
            attrs.insert("login_credential_local_reference".to_string(), credential.to_json());
        }
        if node.kind == TaskKind::Decision {
            for arm in ["success", "failure"] {
                attrs.insert(
                    format!("{}_child_reference", arm),
                    task_ref(&group_task_name(&node.name, arm)),
                );
            }
        }
        task.insert("attrs".to_string(), JsonValue::Object(attrs));

        let children: Vec<_> = node
            .groups
            .iter()
            .map(|g| task_ref(&group_task_name(&node.name, &g.label)))
            .collect();
        task.insert(
            "child_tasks_local_reference_list".to_string(),
            JsonValue::Array(children),
        );
        task.insert("status_map_list".to_string(), json!(node.status_overrides));
        JsonValue::Object(task)
    }

    fn header(&self, name: &str, type_str: &str) -> Map<String, JsonValue> {
        let mut task = Map::new();
        if self.config.emit_task_uuids {
            let id = self
                .graph
                .node_named(name)
                .map_or_else(|| TaskId::derive(self.config.id_mode, &self.graph.name, name), |n| n.id);
            task.insert("uuid".to_string(), json!(id.as_uuid().to_string()));
        }
        task.insert("name".to_string(), json!(name));
        task.insert("type".to_string(), json!(type_str));
        task.insert("description".to_string(), json!(""));
        task
    }

    fn edge(&self, edge: &Edge) -> JsonValue {
        json!({
            "from_task_reference": self.task_ref_by_id(edge.from),
            "to_task_reference": self.task_ref_by_id(edge.to),
        })
    }

    fn task_ref_by_id(&self, id: TaskId) -> JsonValue {
        match self.graph.get_node(id) {
            Some(node) => task_ref(&node.name),
            None => task_ref(&id.to_string()),
        }
    }
}

fn task_ref(name: &str) -> JsonValue {
    json!({"kind": TASK_KIND, "name": name})
}
