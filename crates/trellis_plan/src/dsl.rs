//! Declarative task bodies.
//!
//! A body is a JSON list of statements. Replaying it drives the same
//! recorder calls a hand-written builder would make, so a file and a
//! closure-built body compile to identical graphs.

use crate::compiler::TaskGraphCompiler;
use crate::task::Task;
use serde::{Deserialize, Serialize};
use trellis_core::{CompileError, CompileResult};

/// One statement of a task body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    /// A leaf task
    Task(Task),
    /// A decision with its two arms
    Decision {
        /// Decision header
        task: Task,
        /// Runs when the header succeeds
        #[serde(default)]
        success: Vec<Statement>,
        /// Runs when the header fails
        #[serde(default)]
        failure: Vec<Statement>,
    },
    /// A loop and its body
    Loop {
        /// Loop header
        task: Task,
        /// Loop body
        body: Vec<Statement>,
    },
    /// Independent branches
    Parallel {
        /// Parallel header; a generated one when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<Task>,
        /// One statement list per branch
        branches: Vec<Vec<Statement>>,
    },
}

/// Parse a body from JSON text
///
/// # Errors
///
/// Returns `Encoding` if the text is not a statement list
pub fn parse(input: &str) -> CompileResult<Vec<Statement>> {
    serde_json::from_str(input).map_err(|e| CompileError::Encoding {
        reason: format!("task body: {}", e),
    })
}

/// Record every statement into the compiler, in order
///
/// # Errors
///
/// Returns the first recording error
pub fn replay(compiler: &mut TaskGraphCompiler, statements: &[Statement]) -> CompileResult<()> {
    for statement in statements {
        match statement {
            Statement::Task(task) => {
                compiler.record(task.clone())?;
            }
            Statement::Decision {
                task,
                success,
                failure,
            } => {
                compiler.decision(
                    task.clone(),
                    |c| replay(c, success),
                    |c| replay(c, failure),
                )?;
            }
            Statement::Loop { task, body } => {
                compiler.while_loop(task.clone(), |c| replay(c, body))?;
            }
            Statement::Parallel { task, branches } => {
                let header = task.clone().unwrap_or_else(Task::parallel);
                compiler.parallel(header, |c| {
                    branches
                        .iter()
                        .try_for_each(|branch| c.branch(|c| replay(c, branch)))
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ScriptType, TaskKind};

    const BODY: &str = r#"[
        {"task": {"name": "fetch", "type": "set_variable", "script_type": "sh",
                  "script": "echo v=1", "variables": ["v"]}},
        {"decision": {
            "task": {"name": "check", "type": "decision", "script_type": "sh", "script": "test @@{v}@@"},
            "success": [{"task": {"name": "ok", "type": "exec", "script_type": "sh", "script": "true"}}],
            "failure": [{"task": {"name": "ko", "type": "delay", "interval_secs": 5}}]
        }},
        {"loop": {
            "task": {"name": "repeat", "type": "loop", "iterations": 3},
            "body": [{"task": {"name": "tick", "type": "exec", "script_type": "sh", "script": "echo @@{iteration}@@"}}]
        }},
        {"parallel": {"branches": [
            [{"task": {"name": "left", "type": "confirm"}}],
            [{"task": {"name": "right", "type": "input", "inputs": ["who"]}}]
        ]}}
    ]"#;

    #[test]
    fn test_parse_body() {
        let statements = parse(BODY).unwrap();
        assert_eq!(statements.len(), 4);
        match &statements[1] {
            Statement::Decision { task, success, failure } => {
                assert_eq!(task.kind(), TaskKind::Decision);
                assert_eq!(success.len(), 1);
                assert_eq!(failure.len(), 1);
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(parse("{"), Err(CompileError::Encoding { .. })));
        assert!(matches!(
            parse(r#"[{"task": {"type": "teleport"}}]"#),
            Err(CompileError::Encoding { .. })
        ));
    }

    #[test]
    fn test_replay_body() {
        let statements = parse(BODY).unwrap();
        let mut compiler = TaskGraphCompiler::new("rb");
        replay(&mut compiler, &statements).unwrap();
        let graph = compiler.finish().unwrap();

        let names: Vec<_> = graph.nodes.values().map(|n| n.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["fetch", "check", "ok", "ko", "repeat", "tick", "parallel_1", "left", "right"]
        );
        assert_eq!(graph.root_ids.len(), 4);
        let parallel = graph.node_named("parallel_1").unwrap();
        assert_eq!(parallel.groups.len(), 2);
    }

    #[test]
    fn test_replay_matches_closures() {
        let statements = parse(BODY).unwrap();
        let mut from_file = TaskGraphCompiler::new("rb");
        replay(&mut from_file, &statements).unwrap();

        let sh = |name: &str, script: &str| Task::exec(ScriptType::Shell, script).named(name);
        let mut by_hand = TaskGraphCompiler::new("rb");
        by_hand
            .record(Task::set_variable(ScriptType::Shell, "echo v=1", &["v"]).named("fetch"))
            .unwrap();
        by_hand
            .decision(
                Task::decision(ScriptType::Shell, "test @@{v}@@").named("check"),
                |c| c.record(sh("ok", "true")).map(drop),
                |c| c.record(Task::delay(5).named("ko")).map(drop),
            )
            .unwrap();
        by_hand
            .while_loop(
                Task::while_loop(crate::task::Iterations::Count(3)).named("repeat"),
                |c| c.record(sh("tick", "echo @@{iteration}@@")).map(drop),
            )
            .unwrap();
        by_hand
            .parallel(Task::parallel(), |c| {
                c.branch(|c| c.record(Task::confirm().named("left")).map(drop))?;
                c.branch(|c| c.record(Task::input(&["who"]).named("right")).map(drop))
            })
            .unwrap();

        assert_eq!(from_file.finish().unwrap(), by_hand.finish().unwrap());
    }

    #[test]
    fn test_replay_stops_at_first_error() {
        let statements = parse(
            r#"[{"loop": {"task": {"type": "loop", "iterations": {"variable": "missing"}}, "body": []}}]"#,
        )
        .unwrap();
        let mut compiler = TaskGraphCompiler::new("rb");
        let err = replay(&mut compiler, &statements).unwrap_err();
        assert!(matches!(err, CompileError::UnknownVariable { .. }));
        assert_eq!(compiler.depth(), 0);
    }
}
