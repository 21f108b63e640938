//! Compiler configuration.

use serde::{Deserialize, Serialize};

/// How task identifiers are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdMode {
    /// Name-based IDs; identical bodies compile to identical documents
    #[default]
    Deterministic,
    /// Random IDs
    Random,
}

/// Configuration shared by the task-graph compiler and the document assembler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Task identifier generation
    pub id_mode: IdMode,
    /// Spec version written into document metadata
    pub spec_version: u32,
    /// Require every leaf target to be declared or marked external
    pub strict_targets: bool,
    /// Write task UUIDs into the rendered task definitions
    pub emit_task_uuids: bool,
    /// Largest node count a task graph may have (0 = no limit)
    pub max_nodes: usize,
}

impl CompilerConfig {
    /// Create a config with default settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            id_mode: IdMode::Deterministic,
            spec_version: 1,
            strict_targets: true,
            emit_task_uuids: true,
            max_nodes: 0,
        }
    }

    /// Set the ID mode
    #[must_use]
    pub fn with_id_mode(mut self, mode: IdMode) -> Self {
        self.id_mode = mode;
        self
    }

    /// Set the document format version
    #[must_use]
    pub fn with_spec_version(mut self, version: u32) -> Self {
        self.spec_version = version;
        self
    }

    /// Set whether targets are checked at record time
    #[must_use]
    pub fn with_strict_targets(mut self, strict: bool) -> Self {
        self.strict_targets = strict;
        self
    }

    /// Set whether task UUIDs are rendered
    #[must_use]
    pub fn with_emit_task_uuids(mut self, emit: bool) -> Self {
        self.emit_task_uuids = emit;
        self
    }

    /// Set the task graph size limit
    #[must_use]
    pub fn with_max_nodes(mut self, max: usize) -> Self {
        self.max_nodes = max;
        self
    }

    /// Parse a config from JSON text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a valid config
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::new()
    }
}
