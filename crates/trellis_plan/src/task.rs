//! Task declarations.
//!
//! A [`Task`] is what an author hands to the compiler: the kind of work,
//! its parameters, and how its execution target is chosen. The compiler
//! turns it into a [`TaskNode`](crate::dag::TaskNode).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use trellis_model::Reference;

/// Kind of a task node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run a script on the target
    Exec,
    /// Run a script and capture variables from its output
    SetVariable,
    /// Run a script and branch on its result
    Decision,
    /// Repeat a body
    Loop,
    /// Run branches concurrently
    Parallel,
    /// Sleep
    Delay,
    /// Wait for operator confirmation
    Confirm,
    /// Prompt the operator for values
    Input,
    /// Make an HTTP request
    Http,
    /// Change a VM's power state
    VmPowerOp(PowerAction),
    /// Run an action of a resource type
    ResourceTypeAction,
}

impl TaskKind {
    /// Task type string understood by the remote engine
    #[must_use]
    pub const fn type_str(self) -> &'static str {
        match self {
            Self::Exec => "EXEC",
            Self::SetVariable => "SET_VARIABLE",
            Self::Decision => "DECISION",
            Self::Loop => "WHILE_LOOP",
            Self::Parallel => "PARALLEL",
            Self::Delay => "DELAY",
            Self::Confirm => "CONFIRM",
            Self::Input => "INPUT",
            Self::Http => "HTTP",
            Self::VmPowerOp(PowerAction::On) => "VM_POWERON",
            Self::VmPowerOp(PowerAction::Off) => "VM_POWEROFF",
            Self::VmPowerOp(PowerAction::Restart) => "VM_RESTART",
            Self::ResourceTypeAction => "RT_OPERATION",
        }
    }

    /// Prefix for generated task names
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::SetVariable => "set_variable",
            Self::Decision => "decision",
            Self::Loop => "loop",
            Self::Parallel => "parallel",
            Self::Delay => "delay",
            Self::Confirm => "confirm",
            Self::Input => "input",
            Self::Http => "http",
            Self::VmPowerOp(_) => "power",
            Self::ResourceTypeAction => "rt_action",
        }
    }

    /// Whether the kind opens a scope instead of being a leaf
    #[must_use]
    pub const fn is_scoped(self) -> bool {
        matches!(self, Self::Decision | Self::Loop | Self::Parallel)
    }

    /// Whether the remote engine needs a target to run this kind
    #[must_use]
    pub const fn requires_target(self) -> bool {
        matches!(
            self,
            Self::Exec | Self::SetVariable | Self::Decision | Self::VmPowerOp(_)
        )
    }
}

/// Script interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptType {
    /// POSIX shell
    #[serde(rename = "sh")]
    Shell,
    /// PowerShell
    #[serde(rename = "npsscript")]
    PowerShell,
    /// Sandboxed script run by the engine itself
    #[serde(rename = "static")]
    Escript,
}

impl ScriptType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "sh",
            Self::PowerShell => "npsscript",
            Self::Escript => "static",
        }
    }
}

/// VM power operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    /// Power on
    On,
    /// Power off
    Off,
    /// Restart
    Restart,
}

/// Iteration count of a loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Iterations {
    /// Fixed count
    Count(u32),
    /// Count read from a variable at run time
    Variable {
        /// Variable name
        variable: String,
    },
}

impl Iterations {
    /// Rendered form: a number, or a placeholder for the variable
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Count(n) => n.to_string(),
            Self::Variable { variable } => format!("@@{{{}}}@@", variable),
        }
    }
}

/// When a loop stops early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExitCondition {
    /// Run all iterations
    #[default]
    #[serde(rename = "dont_care")]
    DontCare,
    /// Stop after the first successful iteration
    #[serde(rename = "exit_on_success")]
    OnSuccess,
    /// Stop after the first failed iteration
    #[serde(rename = "exit_on_failure")]
    OnFailure,
}

impl ExitCondition {
    fn as_str(self) -> &'static str {
        match self {
            Self::DontCare => "dont_care",
            Self::OnSuccess => "exit_on_success",
            Self::OnFailure => "exit_on_failure",
        }
    }
}

/// What a status mapping matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Script exit code (values may be ranges like `1-5`)
    ExitCode,
    /// Task status string
    Status,
}

/// Status a mapping rewrites to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    /// Treat as success
    Success,
    /// Treat as failure
    Failure,
    /// Treat as warning
    Warning,
}

/// One status override: matching results are reported as `result`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusMapping {
    /// What is matched
    #[serde(rename = "type")]
    pub kind: MatchKind,
    /// Values to match
    #[serde(rename = "match_values")]
    pub values: Vec<String>,
    /// Resulting status
    #[serde(rename = "result_status")]
    pub result: ResultStatus,
}

impl StatusMapping {
    /// Map exit codes to a status
    #[must_use]
    pub fn exit_codes(values: &[&str], result: ResultStatus) -> Self {
        Self {
            kind: MatchKind::ExitCode,
            values: values.iter().map(|v| (*v).to_string()).collect(),
            result,
        }
    }

    /// Map task statuses to a status
    #[must_use]
    pub fn statuses(values: &[&str], result: ResultStatus) -> Self {
        Self {
            kind: MatchKind::Status,
            values: values.iter().map(|v| (*v).to_string()).collect(),
            result,
        }
    }
}

fn default_loop_variable() -> String {
    "iteration".to_string()
}

fn default_success_codes() -> Vec<u16> {
    vec![200]
}

/// Kind-specific task parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TaskBody {
    /// Script execution
    Exec {
        /// Interpreter
        script_type: ScriptType,
        /// Script text
        script: String,
    },
    /// Script whose output sets variables
    SetVariable {
        /// Interpreter
        script_type: ScriptType,
        /// Script text
        script: String,
        /// Variables captured from the output
        variables: Vec<String>,
    },
    /// Script whose result picks the success or failure arm
    Decision {
        /// Interpreter
        script_type: ScriptType,
        /// Script text
        script: String,
    },
    /// Loop header
    Loop {
        /// Iteration count
        iterations: Iterations,
        /// Variable holding the current iteration
        #[serde(default = "default_loop_variable")]
        loop_variable: String,
        /// Early exit policy
        #[serde(default)]
        exit_condition: ExitCondition,
    },
    /// Parallel header
    Parallel,
    /// Sleep
    Delay {
        /// Seconds to wait
        interval_secs: u32,
    },
    /// Operator confirmation
    Confirm,
    /// Operator input
    Input {
        /// Variables prompted for
        inputs: Vec<String>,
    },
    /// HTTP request
    Http {
        /// Request method
        method: String,
        /// Request URL
        url: String,
        /// Request headers
        #[serde(default)]
        headers: IndexMap<String, String>,
        /// Request body
        #[serde(default)]
        body: String,
        /// Response codes treated as success
        #[serde(default = "default_success_codes")]
        success_codes: Vec<u16>,
        /// Variables set from response JSON paths, variable -> path
        #[serde(default)]
        response_paths: IndexMap<String, String>,
    },
    /// VM power operation
    VmPowerOp {
        /// Operation
        action: PowerAction,
    },
    /// Resource-type action
    ResourceTypeAction {
        /// Resource type name
        resource_type: String,
        /// Action name
        action: String,
        /// Action inputs
        #[serde(default)]
        inputs: IndexMap<String, String>,
    },
}

impl TaskBody {
    /// Task kind
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Exec { .. } => TaskKind::Exec,
            Self::SetVariable { .. } => TaskKind::SetVariable,
            Self::Decision { .. } => TaskKind::Decision,
            Self::Loop { .. } => TaskKind::Loop,
            Self::Parallel => TaskKind::Parallel,
            Self::Delay { .. } => TaskKind::Delay,
            Self::Confirm => TaskKind::Confirm,
            Self::Input { .. } => TaskKind::Input,
            Self::Http { .. } => TaskKind::Http,
            Self::VmPowerOp { action } => TaskKind::VmPowerOp(*action),
            Self::ResourceTypeAction { .. } => TaskKind::ResourceTypeAction,
        }
    }

    /// Variables this task makes available to later tasks
    #[must_use]
    pub fn produces(&self) -> Vec<&str> {
        match self {
            Self::SetVariable { variables, .. } => variables.iter().map(String::as_str).collect(),
            Self::Input { inputs } => inputs.iter().map(String::as_str).collect(),
            Self::Http { response_paths, .. } => response_paths.keys().map(String::as_str).collect(),
            Self::Loop { loop_variable, .. } => vec![loop_variable.as_str()],
            _ => Vec::new(),
        }
    }

    /// Rendered attributes
    #[must_use]
    pub fn attrs(&self) -> IndexMap<String, JsonValue> {
        let mut attrs = IndexMap::new();
        match self {
            Self::Exec { script_type, script } | Self::Decision { script_type, script } => {
                attrs.insert("script_type".to_string(), json!(script_type.as_str()));
                attrs.insert("script".to_string(), json!(script));
            }
            Self::SetVariable {
                script_type,
                script,
                variables,
            } => {
                attrs.insert("script_type".to_string(), json!(script_type.as_str()));
                attrs.insert("script".to_string(), json!(script));
                attrs.insert("eval_variables".to_string(), json!(variables));
            }
            Self::Loop {
                iterations,
                loop_variable,
                exit_condition,
            } => {
                attrs.insert("iterations".to_string(), json!(iterations.render()));
                attrs.insert("loop_variable".to_string(), json!(loop_variable));
                attrs.insert("exit_condition_type".to_string(), json!(exit_condition.as_str()));
            }
            Self::Parallel | Self::Confirm => {}
            Self::Delay { interval_secs } => {
                attrs.insert("interval_secs".to_string(), json!(interval_secs));
            }
            Self::Input { inputs } => {
                let list: Vec<_> = inputs
                    .iter()
                    .map(|name| json!({"name": name, "input_type": "text"}))
                    .collect();
                attrs.insert("inputs".to_string(), JsonValue::Array(list));
            }
            Self::Http {
                method,
                url,
                headers,
                body,
                success_codes,
                response_paths,
            } => {
                attrs.insert("method".to_string(), json!(method.to_uppercase()));
                attrs.insert("url".to_string(), json!(url));
                let headers: Vec<_> = headers
                    .iter()
                    .map(|(k, v)| json!({"name": k, "value": v}))
                    .collect();
                attrs.insert("headers".to_string(), JsonValue::Array(headers));
                attrs.insert("request_body".to_string(), json!(body));
                let codes: Vec<_> = success_codes
                    .iter()
                    .map(|c| json!({"status": "SUCCESS", "code": c}))
                    .collect();
                attrs.insert("expected_response_params".to_string(), JsonValue::Array(codes));
                attrs.insert("response_paths".to_string(), json!(response_paths));
            }
            Self::VmPowerOp { .. } => {}
            Self::ResourceTypeAction {
                resource_type,
                action,
                inputs,
            } => {
                attrs.insert("resource_type".to_string(), json!(resource_type));
                attrs.insert("action".to_string(), json!(action));
                attrs.insert("inputs".to_string(), json!(inputs));
            }
        }
        attrs
    }
}

/// A task declaration
///
/// Decoded in two halves: the keys every task shares, then the body. Both
/// halves reject keys they do not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, JsonValue>")]
pub struct Task {
    /// Task name, generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Kind-specific parameters
    #[serde(flatten)]
    pub body: TaskBody,
    /// Explicit execution target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Reference>,
    /// Take the target of the nearest enclosing scope that recorded one
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inherit_target: bool,
    /// Login credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Reference>,
    /// Status overrides declared on this task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_map: Vec<StatusMapping>,
}

const TASK_KEYS: [&str; 5] = ["name", "target", "inherit_target", "credential", "status_map"];

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskHeader {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    target: Option<Reference>,
    #[serde(default)]
    inherit_target: bool,
    #[serde(default)]
    credential: Option<Reference>,
    #[serde(default)]
    status_map: Vec<StatusMapping>,
}

impl TryFrom<Map<String, JsonValue>> for Task {
    type Error = serde_json::Error;

    fn try_from(mut fields: Map<String, JsonValue>) -> Result<Self, Self::Error> {
        let mut header = Map::new();
        for key in TASK_KEYS {
            if let Some(value) = fields.shift_remove(key) {
                header.insert(key.to_string(), value);
            }
        }
        let header: TaskHeader = serde_json::from_value(JsonValue::Object(header))?;

        // Unit bodies ignore extra keys on their own
        let extra = fields.keys().find(|k| *k != "type").cloned();
        let body: TaskBody = serde_json::from_value(JsonValue::Object(fields))?;
        if let (TaskBody::Parallel | TaskBody::Confirm, Some(key)) = (&body, extra) {
            return Err(serde::de::Error::unknown_field(&key, &[]));
        }

        Ok(Self {
            name: header.name,
            body,
            target: header.target,
            inherit_target: header.inherit_target,
            credential: header.credential,
            status_map: header.status_map,
        })
    }
}

impl Task {
    /// Create a task from its parameters
    #[must_use]
    pub fn new(body: TaskBody) -> Self {
        Self {
            name: None,
            body,
            target: None,
            inherit_target: false,
            credential: None,
            status_map: Vec::new(),
        }
    }

    /// Script execution
    #[must_use]
    pub fn exec(script_type: ScriptType, script: impl Into<String>) -> Self {
        Self::new(TaskBody::Exec {
            script_type,
            script: script.into(),
        })
    }

    /// Script that sets variables
    #[must_use]
    pub fn set_variable(script_type: ScriptType, script: impl Into<String>, variables: &[&str]) -> Self {
        Self::new(TaskBody::SetVariable {
            script_type,
            script: script.into(),
            variables: variables.iter().map(|v| (*v).to_string()).collect(),
        })
    }

    /// Decision header
    #[must_use]
    pub fn decision(script_type: ScriptType, script: impl Into<String>) -> Self {
        Self::new(TaskBody::Decision {
            script_type,
            script: script.into(),
        })
    }

    /// Loop header
    #[must_use]
    pub fn while_loop(iterations: Iterations) -> Self {
        Self::new(TaskBody::Loop {
            iterations,
            loop_variable: default_loop_variable(),
            exit_condition: ExitCondition::DontCare,
        })
    }

    /// Parallel header
    #[must_use]
    pub fn parallel() -> Self {
        Self::new(TaskBody::Parallel)
    }

    /// Sleep
    #[must_use]
    pub fn delay(interval_secs: u32) -> Self {
        Self::new(TaskBody::Delay { interval_secs })
    }

    /// Operator confirmation
    #[must_use]
    pub fn confirm() -> Self {
        Self::new(TaskBody::Confirm)
    }

    /// Operator input
    #[must_use]
    pub fn input(inputs: &[&str]) -> Self {
        Self::new(TaskBody::Input {
            inputs: inputs.iter().map(|v| (*v).to_string()).collect(),
        })
    }

    /// HTTP request
    #[must_use]
    pub fn http(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(TaskBody::Http {
            method: method.into(),
            url: url.into(),
            headers: IndexMap::new(),
            body: String::new(),
            success_codes: default_success_codes(),
            response_paths: IndexMap::new(),
        })
    }

    /// VM power operation
    #[must_use]
    pub fn power(action: PowerAction) -> Self {
        Self::new(TaskBody::VmPowerOp { action })
    }

    /// Resource-type action
    #[must_use]
    pub fn resource_action(resource_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(TaskBody::ResourceTypeAction {
            resource_type: resource_type.into(),
            action: action.into(),
            inputs: IndexMap::new(),
        })
    }

    /// Set the task name
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set an explicit target
    #[must_use]
    pub fn with_target(mut self, target: Reference) -> Self {
        self.target = Some(target);
        self
    }

    /// Inherit the target of the nearest enclosing decision or parallel
    #[must_use]
    pub fn inheriting_target(mut self) -> Self {
        self.inherit_target = true;
        self
    }

    /// Set the login credential
    #[must_use]
    pub fn with_credential(mut self, credential: Reference) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Add a status override
    #[must_use]
    pub fn with_status_map(mut self, mapping: StatusMapping) -> Self {
        self.status_map.push(mapping);
        self
    }

    /// Name the loop iteration variable (loops only)
    #[must_use]
    pub fn with_loop_variable(mut self, name: impl Into<String>) -> Self {
        if let TaskBody::Loop { loop_variable, .. } = &mut self.body {
            *loop_variable = name.into();
        }
        self
    }

    /// Set the loop exit policy (loops only)
    #[must_use]
    pub fn with_exit_condition(mut self, condition: ExitCondition) -> Self {
        if let TaskBody::Loop { exit_condition, .. } = &mut self.body {
            *exit_condition = condition;
        }
        self
    }

    /// Capture a response value into a variable (HTTP only)
    #[must_use]
    pub fn with_response_path(mut self, variable: impl Into<String>, path: impl Into<String>) -> Self {
        if let TaskBody::Http { response_paths, .. } = &mut self.body {
            response_paths.insert(variable.into(), path.into());
        }
        self
    }

    /// Task kind
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.body.kind()
    }
}
