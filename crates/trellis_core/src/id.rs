//! Identifiers for compiled task nodes.
//!
//! Task IDs are UUIDs. In deterministic mode they are derived (v5) from the
//! owning graph's name and the task's name so that compiling the same body
//! twice yields identical documents.

use crate::config::IdMode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task identifier - identifies a node in a task graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new random TaskId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }


    /// Create from a graph name and a task name (name-based v5 UUID)
    #[must_use]
    pub fn from_name(graph: &str, task: &str) -> Self {
        let namespace = Uuid::new_v5(&Uuid::NAMESPACE_OID, graph.as_bytes());
        Self(Uuid::new_v5(&namespace, task.as_bytes()))
    }

    /// Create an ID according to the configured mode
    #[must_use]
    pub fn derive(mode: IdMode, graph: &str, task: &str) -> Self {
        match mode {
            IdMode::Deterministic => Self::from_name(graph, task),
            IdMode::Random => Self::new(),
        }
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task_{}", self.0)
    }
}
