//! Recording compiler from authoring calls to a task graph.
//!
//! Authoring code runs once, top to bottom. Every construct it uses is a
//! recording call against [`TaskGraphCompiler`], which keeps a cursor stack
//! with one frame per open scope:
//!
//! ```text
//! root ─┬─ exec            (sequential: edge from the previous sibling)
//!       ├─ decision ─┬─ success frame
//!       │            └─ failure frame
//!       ├─ loop ──── body frame
//!       └─ parallel ─┬─ branch frame 0   (no edges between branches)
//!                    └─ branch frame 1
//! ```
//!
//! Scoped nodes are appended to their parent list when their scope closes,
//! so the edge into a decision is recorded after its arms are complete.

use crate::dag::{ChildGroup, Edge, TaskGraph, TaskNode};
use crate::task::{Iterations, StatusMapping, Task, TaskBody, TaskKind};
use crate::validate::GraphValidator;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value as JsonValue;
use trellis_core::{CompileError, CompileResult, CompilerConfig, TaskId};
use trellis_model::{validate_macros, Reference};

/// Arm of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arm {
    /// Taken when the decision script succeeds
    Success,
    /// Taken when the decision script fails
    Failure,
}

impl Arm {
    /// Child group label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameKind {
    Root,
    Decision { seen: Vec<Arm> },
    Arm(Arm),
    Loop,
    Parallel { branches: usize },
    Branch(usize),
}

impl FrameKind {
    fn describe(&self) -> String {
        match self {
            Self::Root => "root".to_string(),
            Self::Decision { .. } => "decision".to_string(),
            Self::Arm(arm) => format!("{} arm", arm.label()),
            Self::Loop => "loop body".to_string(),
            Self::Parallel { .. } => "parallel".to_string(),
            Self::Branch(i) => format!("branch {}", i),
        }
    }
}

/// Inherited execution context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Context {
    target: Option<Reference>,
    credential: Option<Reference>,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    /// Scoped node owning this frame; `None` for the root
    owner: Option<TaskId>,
    children: Vec<TaskId>,
    previous: Option<TaskId>,
    context: Context,
    /// Target of the scope's triggering task, for `inherit_target`
    recorded_target: Option<Reference>,
    /// Status mappings inherited by everything recorded in this frame
    status_maps: Vec<StatusMapping>,
    /// Loop variable introduced by this scope, forgotten when it closes
    scoped_variable: Option<String>,
}

impl Frame {
    fn child_of(parent: &Frame, kind: FrameKind, owner: TaskId) -> Self {
        Self {
            kind,
            owner: Some(owner),
            children: Vec::new(),
            previous: None,
            context: parent.context.clone(),
            recorded_target: None,
            status_maps: parent.status_maps.clone(),
            scoped_variable: None,
        }
    }
}

/// Records authoring calls into a [`TaskGraph`]
///
/// ```
/// # use trellis_plan::{Task, TaskGraphCompiler, ScriptType};
/// let mut c = TaskGraphCompiler::new("hello");
/// c.record(Task::exec(ScriptType::Shell, "echo one"))?;
/// c.record(Task::exec(ScriptType::Shell, "echo two"))?;
/// let graph = c.finish()?;
/// assert_eq!(graph.edge_count(), 1);
/// # Ok::<(), trellis_core::CompileError>(())
/// ```
#[derive(Debug)]
pub struct TaskGraphCompiler {
    graph: TaskGraph,
    frames: Vec<Frame>,
    names: IndexSet<String>,
    counters: IndexMap<&'static str, usize>,
    variables: IndexSet<String>,
    known_targets: IndexSet<(String, String)>,
    default_target: Option<Reference>,
    default_credential: Option<Reference>,
    config: CompilerConfig,
}

impl TaskGraphCompiler {
    /// Create a compiler for a graph with the given name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut names = IndexSet::new();
        names.insert(root_task_name(&name));
        Self {
            graph: TaskGraph::new(name),
            frames: vec![Frame {
                kind: FrameKind::Root,
                owner: None,
                children: Vec::new(),
                previous: None,
                context: Context::default(),
                recorded_target: None,
                status_maps: Vec::new(),
                scoped_variable: None,
            }],
            names,
            counters: IndexMap::new(),
            variables: IndexSet::new(),
            known_targets: IndexSet::new(),
            default_target: None,
            default_credential: None,
            config: CompilerConfig::default(),
        }
    }

    /// Set the target used when neither the task nor a scope gives one
    #[must_use]
    pub fn with_default_target(mut self, target: Reference) -> Self {
        self.default_target = Some(target);
        self
    }

    /// Set the credential used when neither the task nor a scope gives one
    #[must_use]
    pub fn with_default_credential(mut self, credential: Reference) -> Self {
        self.default_credential = Some(credential);
        self
    }

    /// Declare targets that tasks may name
    #[must_use]
    pub fn with_known_targets(mut self, targets: impl IntoIterator<Item = Reference>) -> Self {
        self.known_targets
            .extend(targets.into_iter().map(|r| (r.kind, r.name)));
        self
    }

    /// Declare variables visible to every task
    #[must_use]
    pub fn with_variables<S: Into<String>>(mut self, variables: impl IntoIterator<Item = S>) -> Self {
        self.variables.extend(variables.into_iter().map(Into::into));
        self
    }

    /// Set the compiler configuration
    #[must_use]
    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Graph name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.graph.name
    }

    /// Number of open scopes
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Whether a variable is known at this point of the body
    #[must_use]
    pub fn knows_variable(&self, name: &str) -> bool {
        self.variables.contains(name)
    }

    /// Record a leaf task in the current scope
    ///
    /// # Errors
    ///
    /// - `ScopeMismatch` if the task is a scoped kind, or the current scope
    ///   is a decision or parallel that only accepts arms/branches
    /// - `DuplicateTask`, `UnknownTarget`, `NoInheritableTarget`,
    ///   `MalformedMacro` from building the node
    pub fn record(&mut self, task: Task) -> CompileResult<TaskId> {
        if task.kind().is_scoped() {
            return Err(CompileError::ScopeMismatch {
                expected: "leaf task".to_string(),
                found: task.kind().type_str().to_string(),
            });
        }
        self.expect_list_frame("task")?;
        let name = self.claim_task_name(&task)?;
        let id = self.build_node(task, name)?;
        self.append(id)?;
        Ok(id)
    }

    /// Open a decision scope; arms are opened with [`Self::open_arm`]
    ///
    /// # Errors
    ///
    /// Returns `ScopeMismatch` if the task is not a decision, plus the
    /// errors of building the node
    pub fn open_decision(&mut self, task: Task) -> CompileResult<TaskId> {
        self.expect_kind(&task, TaskKind::Decision)?;
        self.open_scoped(task, FrameKind::Decision { seen: Vec::new() }, &["success", "failure"])
    }

    /// Open one arm of the current decision
    ///
    /// # Errors
    ///
    /// Returns `ScopeMismatch` outside a decision and `DuplicateArm` if the
    /// arm was already recorded
    pub fn open_arm(&mut self, arm: Arm) -> CompileResult<()> {
        let top = self.top_mut();
        let owner = top.owner;
        let FrameKind::Decision { seen } = &mut top.kind else {
            let found = top.kind.describe();
            return Err(CompileError::ScopeMismatch {
                expected: "decision".to_string(),
                found,
            });
        };
        let owner = owner.ok_or_else(|| CompileError::InvalidGraph {
            reason: "decision frame without owner".to_string(),
        })?;
        if seen.contains(&arm) {
            let node = self.node_name(owner);
            return Err(CompileError::DuplicateArm {
                node,
                arm: arm.label().to_string(),
            });
        }
        seen.push(arm);
        let frame = Frame::child_of(self.top(), FrameKind::Arm(arm), owner);
        self.frames.push(frame);
        Ok(())
    }

    /// Open a loop scope; everything recorded until it closes is the body
    ///
    /// # Errors
    ///
    /// - `ScopeMismatch` if the task is not a loop
    /// - `UnknownVariable` if the iteration count names an unknown variable
    pub fn open_loop(&mut self, task: Task) -> CompileResult<TaskId> {
        self.expect_kind(&task, TaskKind::Loop)?;
        if let TaskBody::Loop {
            iterations: Iterations::Variable { variable },
            ..
        } = &task.body
        {
            if !self.variables.contains(variable) {
                return Err(CompileError::UnknownVariable {
                    node: self.peek_name(&task),
                    variable: variable.clone(),
                });
            }
        }
        let fresh = match &task.body {
            TaskBody::Loop { loop_variable, .. } if !self.variables.contains(loop_variable) => {
                Some(loop_variable.clone())
            }
            _ => None,
        };
        let id = self.open_scoped(task, FrameKind::Loop, &["body"])?;
        self.top_mut().scoped_variable = fresh;
        Ok(id)
    }

    /// Open a parallel scope; branches are opened with [`Self::open_branch`]
    ///
    /// # Errors
    ///
    /// Returns `ScopeMismatch` if the task is not a parallel header
    pub fn open_parallel(&mut self, task: Task) -> CompileResult<TaskId> {
        self.expect_kind(&task, TaskKind::Parallel)?;
        self.open_scoped(task, FrameKind::Parallel { branches: 0 }, &[])
    }

    /// Open the next branch of the current parallel
    ///
    /// # Errors
    ///
    /// Returns `ScopeMismatch` outside a parallel, or `DuplicateTask` if the
    /// branch's group name is taken
    pub fn open_branch(&mut self) -> CompileResult<usize> {
        let top = self.top();
        let FrameKind::Parallel { branches } = top.kind else {
            return Err(CompileError::ScopeMismatch {
                expected: "parallel".to_string(),
                found: top.kind.describe(),
            });
        };
        let owner = top.owner.ok_or_else(|| CompileError::InvalidGraph {
            reason: "parallel frame without owner".to_string(),
        })?;
        let frame = Frame::child_of(top, FrameKind::Branch(branches), owner);
        let group_name = format!("{}_branch_{}", self.node_name(owner), branches);
        self.claim_name(group_name)?;

        if let FrameKind::Parallel { branches } = &mut self.top_mut().kind {
            *branches += 1;
        }
        self.frames.push(frame);
        Ok(branches)
    }

    /// Close the innermost open scope
    ///
    /// # Errors
    ///
    /// - `UnopenedScope` when only the root is open
    /// - `EmptyBranch` when a decision, loop, or parallel closes with nothing
    ///   recorded inside
    pub fn close_scope(&mut self) -> CompileResult<()> {
        if self.frames.len() == 1 {
            return Err(CompileError::UnopenedScope);
        }
        let frame = self.frames.pop().ok_or(CompileError::UnopenedScope)?;
        if let Some(variable) = &frame.scoped_variable {
            self.variables.shift_remove(variable);
        }
        let owner = frame.owner.ok_or(CompileError::UnopenedScope)?;

        match frame.kind {
            FrameKind::Root => return Err(CompileError::UnopenedScope),
            FrameKind::Arm(arm) => {
                self.set_group(owner, arm.label(), frame.children)?;
            }
            FrameKind::Branch(index) => {
                let node = self.node_mut(owner)?;
                node.groups
                    .push(ChildGroup::new(format!("branch_{}", index), frame.children));
            }
            FrameKind::Loop => {
                if frame.children.is_empty() {
                    return Err(CompileError::EmptyBranch {
                        node: self.node_name(owner),
                    });
                }
                self.set_group(owner, "body", frame.children)?;
                self.append(owner)?;
            }
            FrameKind::Decision { .. } => {
                let node = self.node_mut(owner)?;
                for arm in [Arm::Success, Arm::Failure] {
                    if node.group(arm.label()).is_none() {
                        node.groups.push(ChildGroup::new(arm.label(), Vec::new()));
                    }
                }
                node.groups.sort_by_key(|g| g.label != Arm::Success.label());
                if node.groups.iter().all(ChildGroup::is_empty) {
                    return Err(CompileError::EmptyBranch {
                        node: node.name.clone(),
                    });
                }
                self.append(owner)?;
            }
            FrameKind::Parallel { branches } => {
                if branches == 0 {
                    return Err(CompileError::EmptyBranch {
                        node: self.node_name(owner),
                    });
                }
                self.append(owner)?;
            }
        }
        tracing::debug!(graph = %self.graph.name, depth = self.depth(), "Closed scope");
        Ok(())
    }

    /// Record a decision with both arms given as closures.
    ///
    /// Every scope opened here is closed again, even when an arm fails.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by an arm or by closing the scopes
    pub fn decision<S, F>(&mut self, task: Task, on_success: S, on_failure: F) -> CompileResult<TaskId>
    where
        S: FnOnce(&mut Self) -> CompileResult<()>,
        F: FnOnce(&mut Self) -> CompileResult<()>,
    {
        let id = self.open_decision(task)?;
        self.scoped(|c| {
            c.open_arm(Arm::Success)?;
            c.scoped(on_success)?;
            c.open_arm(Arm::Failure)?;
            c.scoped(on_failure)
        })?;
        Ok(id)
    }

    /// Record a loop whose body is given as a closure
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the body or by closing the scope
    pub fn while_loop<B>(&mut self, task: Task, body: B) -> CompileResult<TaskId>
    where
        B: FnOnce(&mut Self) -> CompileResult<()>,
    {
        let id = self.open_loop(task)?;
        self.scoped(body)?;
        Ok(id)
    }

    /// Record a parallel; the closure opens branches with [`Self::branch`]
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a branch or by closing the scope
    pub fn parallel<B>(&mut self, task: Task, branches: B) -> CompileResult<TaskId>
    where
        B: FnOnce(&mut Self) -> CompileResult<()>,
    {
        let id = self.open_parallel(task)?;
        self.scoped(branches)?;
        Ok(id)
    }

    /// Record one branch of the current parallel
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the body or by closing the scope
    pub fn branch<B>(&mut self, body: B) -> CompileResult<()>
    where
        B: FnOnce(&mut Self) -> CompileResult<()>,
    {
        self.open_branch()?;
        self.scoped(body)
    }

    /// Finish recording and validate the graph
    ///
    /// # Errors
    ///
    /// Returns `UnclosedScope` if scopes are still open, or `InvalidGraph`
    /// if a structural invariant does not hold
    pub fn finish(mut self) -> CompileResult<TaskGraph> {
        if self.frames.len() > 1 {
            return Err(CompileError::UnclosedScope {
                depth: self.frames.len() - 1,
            });
        }
        let root = self.frames.pop().ok_or(CompileError::UnopenedScope)?;
        self.graph.root_ids = root.children;

        GraphValidator::new()
            .with_max_nodes(self.config.max_nodes)
            .validate(&self.graph)
            .map_err(|errors| CompileError::InvalidGraph {
                reason: errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            })?;

        tracing::info!(
            graph = %self.graph.name,
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "Compiled task graph"
        );
        Ok(self.graph)
    }

    // Run `body` inside the scope on top of the stack, then close it. On
    // failure the stack is cut back below that scope.
    fn scoped<B>(&mut self, body: B) -> CompileResult<()>
    where
        B: FnOnce(&mut Self) -> CompileResult<()>,
    {
        let depth = self.frames.len();
        let base = depth.saturating_sub(1).max(1);
        let scope = self.scope_key(depth - 1);
        let result = body(self);
        let intact = self.frames.len() >= depth && self.scope_key(depth - 1) == scope;

        if let Err(e) = result {
            self.unwind_to(base);
            return Err(e);
        }
        if !intact {
            self.unwind_to(base);
            return Err(CompileError::ScopeMismatch {
                expected: "scope closed by its helper".to_string(),
                found: "scope closed inside its body".to_string(),
            });
        }
        if self.frames.len() > depth {
            let open = self.frames.len() - depth;
            self.unwind_to(base);
            return Err(CompileError::UnclosedScope { depth: open });
        }
        self.close_scope()
    }

    /// Identity of the frame at `index`: owner and role
    fn scope_key(&self, index: usize) -> Option<(Option<TaskId>, String)> {
        self.frames.get(index).map(|f| (f.owner, f.kind.describe()))
    }

    /// Drop frames above `len` without closing them
    fn unwind_to(&mut self, len: usize) {
        while self.frames.len() > len {
            let Some(frame) = self.frames.pop() else {
                break;
            };
            if let Some(variable) = frame.scoped_variable {
                self.variables.shift_remove(&variable);
            }
        }
    }

    fn open_scoped(&mut self, task: Task, kind: FrameKind, groups: &[&str]) -> CompileResult<TaskId> {
        self.expect_list_frame(task.kind().type_str())?;
        let name = self.claim_task_name(&task)?;
        for label in groups {
            self.claim_name(format!("{}_{}", name, label))?;
        }
        let status_map = task.status_map.clone();
        let id = self.build_node(task, name.clone())?;

        let node = self.node_mut(id)?;
        let context = Context {
            target: node.target.clone(),
            credential: node.credential.clone(),
        };
        let recorded_target = match kind {
            FrameKind::Decision { .. } | FrameKind::Parallel { .. } => node.target.clone(),
            _ => None,
        };

        let mut frame = Frame::child_of(self.top(), kind, id);
        frame.context = context;
        frame.recorded_target = recorded_target;
        frame.status_maps.extend(status_map);
        tracing::debug!(graph = %self.graph.name, node = %name, scope = %frame.kind.describe(), "Opened scope");
        self.frames.push(frame);
        Ok(id)
    }

    fn claim_task_name(&mut self, task: &Task) -> CompileResult<String> {
        let name = match &task.name {
            Some(name) => name.clone(),
            None => self.generate_name(task.kind()),
        };
        self.claim_name(name.clone())?;
        Ok(name)
    }

    fn build_node(&mut self, task: Task, name: String) -> CompileResult<TaskId> {
        let kind = task.kind();
        let target = self.resolve_target(&task, &name)?;
        if target.is_none() && kind.requires_target() {
            tracing::warn!(graph = %self.graph.name, node = %name, "Task has no target");
        }
        let credential = task
            .credential
            .clone()
            .or_else(|| self.top().context.credential.clone())
            .or_else(|| self.default_credential.clone());

        let attrs = task.body.attrs();
        for (key, value) in &attrs {
            check_macros(&format!("{}.{}", name, key), value)?;
        }

        let mut status_overrides = self.top().status_maps.clone();
        status_overrides.extend(task.status_map.iter().cloned());

        self.variables
            .extend(task.body.produces().into_iter().map(str::to_string));

        let id = TaskId::derive(self.config.id_mode, &self.graph.name, &name);
        tracing::debug!(graph = %self.graph.name, node = %name, kind = kind.type_str(), "Recorded task");
        self.graph.add_node(TaskNode {
            id,
            name,
            kind,
            target,
            credential,
            attrs,
            groups: Vec::new(),
            status_overrides,
        })?;
        Ok(id)
    }

    fn resolve_target(&self, task: &Task, name: &str) -> CompileResult<Option<Reference>> {
        if task.inherit_target {
            return self
                .frames
                .iter()
                .rev()
                .find_map(|f| f.recorded_target.clone())
                .map(Some)
                .ok_or_else(|| CompileError::NoInheritableTarget {
                    node: name.to_string(),
                });
        }

        let target = task
            .target
            .clone()
            .or_else(|| self.top().context.target.clone())
            .or_else(|| self.default_target.clone());
        if let Some(t) = &target {
            let known = self.known_targets.contains(&(t.kind.clone(), t.name.clone()));
            if self.config.strict_targets && !t.external && !known {
                return Err(CompileError::UnknownTarget {
                    node: name.to_string(),
                    target: t.to_string(),
                });
            }
        }
        Ok(target)
    }

    fn append(&mut self, id: TaskId) -> CompileResult<()> {
        let frame = self.top_mut();
        let previous = frame.previous.replace(id);
        frame.children.push(id);
        if let Some(previous) = previous {
            self.graph.add_edge(Edge::new(previous, id))?;
        }
        Ok(())
    }

    fn set_group(&mut self, owner: TaskId, label: &str, children: Vec<TaskId>) -> CompileResult<()> {
        let node = self.node_mut(owner)?;
        node.groups.push(ChildGroup::new(label, children));
        Ok(())
    }

    fn expect_kind(&self, task: &Task, kind: TaskKind) -> CompileResult<()> {
        if task.kind() == kind {
            Ok(())
        } else {
            Err(CompileError::ScopeMismatch {
                expected: kind.type_str().to_string(),
                found: task.kind().type_str().to_string(),
            })
        }
    }

    fn expect_list_frame(&self, found: &str) -> CompileResult<()> {
        match &self.top().kind {
            FrameKind::Decision { .. } => Err(CompileError::ScopeMismatch {
                expected: "decision arm".to_string(),
                found: found.to_string(),
            }),
            FrameKind::Parallel { .. } => Err(CompileError::ScopeMismatch {
                expected: "parallel branch".to_string(),
                found: found.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn claim_name(&mut self, name: String) -> CompileResult<()> {
        if self.names.contains(&name) {
            return Err(CompileError::DuplicateTask { name });
        }
        self.names.insert(name);
        Ok(())
    }

    /// Name a task will get, without claiming it
    fn peek_name(&self, task: &Task) -> String {
        match &task.name {
            Some(name) => name.clone(),
            None => {
                let kind = task.kind();
                let next = self.counters.get(kind.slug()).copied().unwrap_or(0) + 1;
                format!("{}_{}", kind.slug(), next)
            }
        }
    }

    fn generate_name(&mut self, kind: TaskKind) -> String {
        loop {
            let counter = self.counters.entry(kind.slug()).or_insert(0);
            *counter += 1;
            let name = format!("{}_{}", kind.slug(), counter);
            if !self.names.contains(&name) {
                return name;
            }
        }
    }

    fn node_name(&self, id: TaskId) -> String {
        self.graph
            .get_node(id)
            .map_or_else(|| id.to_string(), |n| n.name.clone())
    }

    fn node_mut(&mut self, id: TaskId) -> CompileResult<&mut TaskNode> {
        self.graph
            .nodes
            .get_mut(&id)
            .ok_or_else(|| CompileError::InvalidGraph {
                reason: format!("scope owner {} is not a node", id),
            })
    }

    fn top(&self) -> &Frame {
        // The root frame is only removed by `finish`, which consumes self
        &self.frames[self.frames.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

/// Name of the synthetic root task of a graph
#[must_use]
pub fn root_task_name(graph: &str) -> String {
    format!("{}_dag", graph)
}

fn check_macros(field: &str, value: &JsonValue) -> CompileResult<()> {
    match value {
        JsonValue::String(s) => validate_macros(field, s),
        JsonValue::Array(items) => items.iter().try_for_each(|v| check_macros(field, v)),
        JsonValue::Object(map) => map.values().try_for_each(|v| check_macros(field, v)),
        _ => Ok(()),
    }
}
