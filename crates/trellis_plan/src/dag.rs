//! Compiled task graph.
//!
//! Edges only ever link siblings: nodes recorded one after another in the
//! same child list. Nesting is expressed through each node's child groups.

use crate::task::{StatusMapping, TaskKind};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use trellis_core::{CompileError, CompileResult, TaskId};
use trellis_model::Reference;

/// The task graph of one runbook or action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    /// Graph name, used to derive identifiers and group names
    pub name: String,
    /// All nodes, in declaration order
    pub nodes: IndexMap<TaskId, TaskNode>,
    /// Execution-order edges between siblings
    pub edges: Vec<Edge>,
    /// Top-level nodes, in declaration order
    pub root_ids: Vec<TaskId>,
    /// Successor index over the first `indexed` entries of `edges`
    #[serde(skip)]
    successors: IndexMap<TaskId, Vec<TaskId>>,
    #[serde(skip)]
    indexed: usize,
}

impl PartialEq for TaskGraph {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.nodes == other.nodes
            && self.edges == other.edges
            && self.root_ids == other.root_ids
    }
}

impl TaskGraph {
    /// Create a new empty graph
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexMap::new(),
            edges: Vec::new(),
            root_ids: Vec::new(),
            successors: IndexMap::new(),
            indexed: 0,
        }
    }

    /// Add a node
    ///
    /// # Errors
    ///
    /// Returns error if a node with the same ID exists
    pub fn add_node(&mut self, node: TaskNode) -> CompileResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(CompileError::InvalidGraph {
                reason: format!("node {} ({}) added twice", node.id, node.name),
            });
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Add an edge
    ///
    /// # Errors
    ///
    /// Returns error if an endpoint is missing or the edge closes a cycle
    pub fn add_edge(&mut self, edge: Edge) -> CompileResult<()> {
        for id in [edge.from, edge.to] {
            if !self.nodes.contains_key(&id) {
                return Err(CompileError::InvalidGraph {
                    reason: format!("edge endpoint {} is not a node", id),
                });
            }
        }
        self.sync_successors();
        if self.would_create_cycle(&edge) {
            return Err(CompileError::InvalidGraph {
                reason: format!("edge {} -> {} would create a cycle", edge.from, edge.to),
            });
        }
        self.successors.entry(edge.from).or_default().push(edge.to);
        self.edges.push(edge);
        self.indexed = self.edges.len();
        Ok(())
    }

    // `edges` is public, so the index is rebuilt if it was changed directly
    fn sync_successors(&mut self) {
        if self.indexed == self.edges.len() {
            return;
        }
        self.successors = self.successor_map();
        self.indexed = self.edges.len();
    }

    fn would_create_cycle(&self, edge: &Edge) -> bool {
        if edge.from == edge.to {
            return true;
        }
        let mut visited = IndexSet::new();
        let mut stack = vec![edge.to];

        while let Some(current) = stack.pop() {
            if current == edge.from {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.successors.get(&current) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Outgoing edges of every node that has any, in recording order
    #[must_use]
    pub fn successor_map(&self) -> IndexMap<TaskId, Vec<TaskId>> {
        let mut map: IndexMap<TaskId, Vec<TaskId>> = IndexMap::new();
        for edge in &self.edges {
            map.entry(edge.from).or_default().push(edge.to);
        }
        map
    }

    /// Get node by ID
    #[must_use]
    pub fn get_node(&self, id: TaskId) -> Option<&TaskNode> {
        self.nodes.get(&id)
    }

    /// Get node by name
    #[must_use]
    pub fn node_named(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.values().find(|n| n.name == name)
    }

    /// Edges whose endpoints both belong to `members`, in recording order
    #[must_use]
    pub fn edges_within(&self, members: &[TaskId]) -> Vec<Edge> {
        self.edges
            .iter()
            .filter(|e| members.contains(&e.from) && members.contains(&e.to))
            .copied()
            .collect()
    }

    /// Get total node count
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get total edge count
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Check if graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A compiled task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Node ID
    pub id: TaskId,
    /// Unique name within the graph
    pub name: String,
    /// Task kind
    pub kind: TaskKind,
    /// Resolved execution target
    pub target: Option<Reference>,
    /// Resolved login credential
    pub credential: Option<Reference>,
    /// Kind-specific attributes
    pub attrs: IndexMap<String, JsonValue>,
    /// Child groups; empty for leaves
    pub groups: Vec<ChildGroup>,
    /// Status overrides: inherited scope mappings first, then the node's own
    pub status_overrides: Vec<StatusMapping>,
}

impl TaskNode {
    /// All children, group by group
    #[must_use]
    pub fn child_ids(&self) -> Vec<TaskId> {
        self.groups
            .iter()
            .flat_map(|g| g.child_ids.iter().copied())
            .collect()
    }

    /// Child group with the given label
    #[must_use]
    pub fn group(&self, label: &str) -> Option<&ChildGroup> {
        self.groups.iter().find(|g| g.label == label)
    }

    /// Whether the node has no child groups
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.groups.is_empty()
    }
}

/// A labelled, ordered list of children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildGroup {
    /// Group label: `success`, `failure`, `body`, or `branch_<n>`
    pub label: String,
    /// Children in declaration order
    pub child_ids: Vec<TaskId>,
}

impl ChildGroup {
    /// Create a group
    #[must_use]
    pub fn new(label: impl Into<String>, child_ids: Vec<TaskId>) -> Self {
        Self {
            label: label.into(),
            child_ids,
        }
    }

    /// Whether the group has no children
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.child_ids.is_empty()
    }
}

/// `to` executes after `from` completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source node
    pub from: TaskId,
    /// Target node
    pub to: TaskId,
}

impl Edge {
    /// Create a new edge
    #[must_use]
    pub fn new(from: TaskId, to: TaskId) -> Self {
        Self { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_node(name: &str) -> TaskNode {
        TaskNode {
            id: TaskId::from_name("g", name),
            name: name.to_string(),
            kind: TaskKind::Exec,
            target: None,
            credential: None,
            attrs: IndexMap::new(),
            groups: Vec::new(),
            status_overrides: Vec::new(),
        }
    }

    #[test]
    fn test_graph_new() {
        let graph = TaskGraph::new("g");
        assert!(graph.is_empty());
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_add_node_duplicate() {
        let mut graph = TaskGraph::new("g");
        graph.add_node(make_test_node("a")).unwrap();
        assert!(graph.add_node(make_test_node("a")).is_err());
        assert_eq!(graph.node_named("a").unwrap().name, "a");
    }

    #[test]
    fn test_add_edge_and_queries() {
        let mut graph = TaskGraph::new("g");
        let a = make_test_node("a");
        let b = make_test_node("b");
        let (ida, idb) = (a.id, b.id);
        graph.add_node(a).unwrap();
        graph.add_node(b).unwrap();
        graph.add_edge(Edge::new(ida, idb)).unwrap();

        assert_eq!(graph.successor_map().get(&ida), Some(&vec![idb]));
        assert!(graph.successor_map().get(&idb).is_none());
        assert_eq!(graph.edges_within(&[ida, idb]).len(), 1);
        assert!(graph.edges_within(&[ida]).is_empty());
    }

    #[test]
    fn test_add_edge_cycle() {
        let mut graph = TaskGraph::new("g");
        let a = make_test_node("a");
        let b = make_test_node("b");
        let (ida, idb) = (a.id, b.id);
        graph.add_node(a).unwrap();
        graph.add_node(b).unwrap();
        graph.add_edge(Edge::new(ida, idb)).unwrap();
        assert!(graph.add_edge(Edge::new(idb, ida)).is_err());
        assert!(graph.add_edge(Edge::new(ida, ida)).is_err());
    }

    #[test]
    fn test_cycle_seen_through_direct_edge_push() {
        let mut graph = TaskGraph::new("g");
        let ids: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                let node = make_test_node(name);
                let id = node.id;
                graph.add_node(node).unwrap();
                id
            })
            .collect();
        graph.add_edge(Edge::new(ids[0], ids[1])).unwrap();
        graph.edges.push(Edge::new(ids[1], ids[2]));
        assert!(graph.add_edge(Edge::new(ids[2], ids[0])).is_err());
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_add_edge_missing_node() {
        let mut graph = TaskGraph::new("g");
        let a = make_test_node("a");
        let ida = a.id;
        graph.add_node(a).unwrap();
        assert!(graph.add_edge(Edge::new(ida, TaskId::from_name("g", "ghost"))).is_err());
    }

    #[test]
    fn test_child_ids_flatten_groups() {
        let mut node = make_test_node("p");
        let x = TaskId::from_name("g", "x");
        let y = TaskId::from_name("g", "y");
        node.groups.push(ChildGroup::new("branch_0", vec![x]));
        node.groups.push(ChildGroup::new("branch_1", vec![y]));
        assert_eq!(node.child_ids(), vec![x, y]);
        assert!(!node.is_leaf());
        assert!(node.group("branch_1").is_some());
    }
}
