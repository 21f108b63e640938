//! TRELLIS Planner
//!
//! Records runbook and action bodies into task graphs. The compiler keeps
//! a stack of open scopes; leaf tasks are chained inside whichever scope
//! is on top, and decision, loop and parallel headers own labelled child
//! groups. Finished graphs are validated and rendered into the flat task
//! definition list the execution engine consumes.
//!
//! ```
//! use trellis_plan::{ScriptType, Task, TaskGraphCompiler};
//!
//! let mut compiler = TaskGraphCompiler::new("deploy");
//! compiler.record(Task::exec(ScriptType::Shell, "make").named("build"))?;
//! compiler.record(Task::exec(ScriptType::Shell, "make test").named("test"))?;
//! let graph = compiler.finish()?;
//! assert_eq!(graph.edge_count(), 1);
//! # Ok::<(), trellis_core::CompileError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compiler;
pub mod dag;
pub mod dsl;
pub mod render;
pub mod task;
pub mod validate;

pub use compiler::{root_task_name, Arm, TaskGraphCompiler};
pub use dag::{ChildGroup, Edge, TaskGraph, TaskNode};
pub use dsl::{parse, replay, Statement};
pub use render::{group_task_name, task_definition_list, RenderedGraph};
pub use task::{
    ExitCondition, Iterations, MatchKind, PowerAction, ResultStatus, ScriptType, StatusMapping,
    Task, TaskBody, TaskKind,
};
pub use validate::{GraphValidator, ValidationError};
