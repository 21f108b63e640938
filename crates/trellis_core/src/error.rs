//! Compile-time error taxonomy for TRELLIS.
//!
//! Every stage of the pipeline reports through [`CompileError`]. None of
//! these errors are retried: a compilation either produces one complete
//! document or stops at the first error.

/// Core result type
pub type CompileResult<T> = Result<T, CompileError>;

/// Compile error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Malformed or incomplete schema template
    #[error("Schema load failed: {reason}")]
    SchemaLoad { reason: String },

    /// A property kind with no registered validator
    #[error("Unknown field kind: {kind}")]
    UnknownKind { kind: String },

    /// Entity type not present in the schema store
    #[error("Unknown entity type: {type_name}")]
    UnknownType { type_name: String },

    /// Attribute not declared in the type's schema
    #[error("Unknown attribute {field} on {type_name}")]
    UnknownAttribute { type_name: String, field: String },

    /// Value rejected by the property's validator
    #[error("Invalid value for {type_name}.{field}: {reason}")]
    InvalidValue {
        type_name: String,
        field: String,
        reason: String,
    },

    /// Property assigned through two different spellings
    #[error("{type_name}.{field} already set, cannot set again through alias {alias}")]
    AliasCollision {
        type_name: String,
        field: String,
        alias: String,
    },

    /// Placeholder syntax error in a string value
    #[error("Malformed macro in {field}: {reason} ({text:?})")]
    MalformedMacro {
        field: String,
        text: String,
        reason: String,
    },

    /// Closing a scope when only the root frame is open
    #[error("Cannot close a scope that was never opened")]
    UnopenedScope,

    /// Finishing a graph with scopes still open
    #[error("{depth} scope(s) left open at end of body")]
    UnclosedScope { depth: usize },

    /// Construct used in the wrong kind of scope
    #[error("Scope mismatch: expected {expected}, found {found}")]
    ScopeMismatch { expected: String, found: String },

    /// Decision/parallel/loop closed with nothing recorded inside
    #[error("Scope {node} closed with no populated branch")]
    EmptyBranch { node: String },

    /// Decision arm opened twice
    #[error("Arm {arm} of {node} already recorded")]
    DuplicateArm { node: String, arm: String },

    /// Inherit-target requested with no enclosing concrete target
    #[error("No enclosing scope provides a target for {node}")]
    NoInheritableTarget { node: String },

    /// Target not known to the compiler and not marked external
    #[error("Task {node} targets unknown {target}")]
    UnknownTarget { node: String, target: String },

    /// Variable referenced before it is declared
    #[error("Task {node} references undeclared variable {variable}")]
    UnknownVariable { node: String, variable: String },

    /// Two tasks with the same name in one graph
    #[error("Duplicate task name: {name}")]
    DuplicateTask { name: String },

    /// Structural invariant of a finished graph violated
    #[error("Invalid task graph: {reason}")]
    InvalidGraph { reason: String },

    /// Reference that resolves to nothing in the document
    #[error("Dangling reference to {kind} {name:?} from {referrer}")]
    DanglingReference {
        kind: String,
        name: String,
        referrer: String,
    },

    /// Serialization failure
    #[error("Encoding error: {reason}")]
    Encoding { reason: String },
}

impl From<serde_json::Error> for CompileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding {
            reason: err.to_string(),
        }
    }
}
