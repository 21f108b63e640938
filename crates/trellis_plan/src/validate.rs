//! Structural checks on finished task graphs.

use crate::dag::TaskGraph;
use crate::task::TaskKind;
use indexmap::{IndexMap, IndexSet};
use trellis_core::{CompileError, TaskId};

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Edge or group names a node that does not exist
    UnknownNode {
        /// The missing node
        id: TaskId,
    },
    /// Cycle detected
    Cycle {
        /// Nodes on the cycle, in edge order
        nodes: Vec<TaskId>,
    },
    /// Edge between nodes of different child lists
    CrossingEdge {
        /// Edge source
        from: TaskId,
        /// Edge target
        to: TaskId,
    },
    /// Node not reachable from the roots
    Unreachable {
        /// Nodes no child list leads to
        nodes: Vec<TaskId>,
    },
    /// Node listed in more than one child list
    SharedNode {
        /// The shared node
        id: TaskId,
    },
    /// Child groups do not match the node kind
    GroupShape {
        /// Node name
        node: String,
        /// What is wrong with its groups
        reason: String,
    },
    /// Graph exceeds the configured size
    TooLarge {
        /// Nodes in the graph
        count: usize,
        /// Configured limit
        max: usize,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode { id } => write!(f, "unknown node {}", id),
            Self::Cycle { nodes } => write!(f, "cycle through {} node(s)", nodes.len()),
            Self::CrossingEdge { from, to } => {
                write!(f, "edge {} -> {} crosses a scope boundary", from, to)
            }
            Self::Unreachable { nodes } => write!(f, "{} node(s) unreachable from roots", nodes.len()),
            Self::SharedNode { id } => write!(f, "node {} appears in more than one child list", id),
            Self::GroupShape { node, reason } => write!(f, "{}: {}", node, reason),
            Self::TooLarge { count, max } => write!(f, "{} nodes exceeds limit of {}", count, max),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for CompileError {
    fn from(err: ValidationError) -> Self {
        CompileError::InvalidGraph {
            reason: err.to_string(),
        }
    }
}

/// Parent child list of a node: `None` for the roots
type Container = Option<(TaskId, usize)>;

/// Validator for task graph invariants
pub struct GraphValidator {
    /// Maximum allowed nodes (0 = no limit)
    pub max_nodes: usize,
}

impl GraphValidator {
    /// Create a new validator
    #[must_use]
    pub fn new() -> Self {
        Self { max_nodes: 0 }
    }

    /// Set maximum node count
    #[must_use]
    pub fn with_max_nodes(mut self, max: usize) -> Self {
        self.max_nodes = max;
        self
    }

    /// Validate a graph
    ///
    /// # Errors
    ///
    /// Returns every violated invariant
    pub fn validate(&self, graph: &TaskGraph) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.max_nodes > 0 && graph.node_count() > self.max_nodes {
            errors.push(ValidationError::TooLarge {
                count: graph.node_count(),
                max: self.max_nodes,
            });
        }

        self.check_groups(graph, &mut errors);

        match self.containers(graph) {
            Ok(containers) => {
                self.check_edges(graph, &containers, &mut errors);
                let unreachable: Vec<_> = graph
                    .nodes
                    .keys()
                    .filter(|id| !containers.contains_key(*id))
                    .copied()
                    .collect();
                if !unreachable.is_empty() {
                    errors.push(ValidationError::Unreachable { nodes: unreachable });
                }
            }
            Err(e) => errors.push(e),
        }

        if let Err(e) = self.check_cycles(graph) {
            errors.push(e);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn check_groups(&self, graph: &TaskGraph, errors: &mut Vec<ValidationError>) {
        for node in graph.nodes.values() {
            let labels: Vec<&str> = node.groups.iter().map(|g| g.label.as_str()).collect();
            let reason = match node.kind {
                TaskKind::Decision if labels != ["success", "failure"] => {
                    Some(format!("decision needs success and failure groups, has {:?}", labels))
                }
                TaskKind::Loop if labels != ["body"] => {
                    Some(format!("loop needs one body group, has {:?}", labels))
                }
                TaskKind::Parallel if labels.is_empty() => Some("parallel has no branches".to_string()),
                kind if !kind.is_scoped() && !labels.is_empty() => {
                    Some(format!("{} is a leaf but has child groups", kind.type_str()))
                }
                _ => None,
            };
            if let Some(reason) = reason {
                errors.push(ValidationError::GroupShape {
                    node: node.name.clone(),
                    reason,
                });
            }
        }
    }

    /// Walk from the roots, recording which child list holds each node
    fn containers(&self, graph: &TaskGraph) -> Result<IndexMap<TaskId, Container>, ValidationError> {
        let mut containers = IndexMap::new();
        let mut stack: Vec<(TaskId, Container)> =
            graph.root_ids.iter().rev().map(|id| (*id, None)).collect();

        while let Some((id, container)) = stack.pop() {
            let node = graph
                .get_node(id)
                .ok_or(ValidationError::UnknownNode { id })?;
            if containers.insert(id, container).is_some() {
                return Err(ValidationError::SharedNode { id });
            }
            for (index, group) in node.groups.iter().enumerate().rev() {
                for child in group.child_ids.iter().rev() {
                    stack.push((*child, Some((id, index))));
                }
            }
        }
        Ok(containers)
    }

    fn check_edges(
        &self,
        graph: &TaskGraph,
        containers: &IndexMap<TaskId, Container>,
        errors: &mut Vec<ValidationError>,
    ) {
        for edge in &graph.edges {
            match (containers.get(&edge.from), containers.get(&edge.to)) {
                (Some(a), Some(b)) if a == b => {}
                (Some(_), Some(_)) => errors.push(ValidationError::CrossingEdge {
                    from: edge.from,
                    to: edge.to,
                }),
                (None, _) if !graph.nodes.contains_key(&edge.from) => {
                    errors.push(ValidationError::UnknownNode { id: edge.from });
                }
                (_, None) if !graph.nodes.contains_key(&edge.to) => {
                    errors.push(ValidationError::UnknownNode { id: edge.to });
                }
                // Unreachable endpoints are reported on their own
                _ => {}
            }
        }
    }

    fn check_cycles(&self, graph: &TaskGraph) -> Result<(), ValidationError> {
        let successors = graph.successor_map();
        let mut done = IndexSet::new();

        for &start in graph.nodes.keys() {
            if done.contains(&start) {
                continue;
            }
            // Nodes on the current path, each with the index of its next successor
            let mut path: IndexMap<TaskId, usize> = IndexMap::new();
            path.insert(start, 0);
            while let Some((&id, &next)) = path.last() {
                let children = successors.get(&id).map_or(&[][..], Vec::as_slice);
                match children.get(next) {
                    Some(&child) => {
                        if let Some(slot) = path.get_mut(&id) {
                            *slot += 1;
                        }
                        if path.contains_key(&child) {
                            let from = path.get_index_of(&child).unwrap_or(0);
                            return Err(ValidationError::Cycle {
                                nodes: path.keys().skip(from).copied().collect(),
                            });
                        }
                        if !done.contains(&child) {
                            path.insert(child, 0);
                        }
                    }
                    None => {
                        path.pop();
                        done.insert(id);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for GraphValidator {
    fn default() -> Self {
        Self::new()
    }
}
