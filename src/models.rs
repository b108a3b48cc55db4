//! Core data models for the task orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

//
// ================= Tools =================
//

/// Reserved pseudo-tool a model uses to end a run.
pub const FINISH_TOOL: &str = "finish";

/// Closed set of capabilities the action loop may dispatch to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ReadFile,
    ListDirectory,
    RunLocalCommand,
    RunRemoteCommand,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::ReadFile,
        ToolName::ListDirectory,
        ToolName::RunLocalCommand,
        ToolName::RunRemoteCommand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ReadFile => "read_file",
            ToolName::ListDirectory => "list_directory",
            ToolName::RunLocalCommand => "run_local_command",
            ToolName::RunRemoteCommand => "run_remote_command",
        }
    }

    /// Resolve a model-supplied name, accepting the legacy spellings models
    /// were trained on.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "read_file" | "readfile" => Some(ToolName::ReadFile),
            "list_directory" | "listdirectory" | "list_dir" => Some(ToolName::ListDirectory),
            "run_local_command" | "runlocalcommand" | "run_terminal_cmd" => {
                Some(ToolName::RunLocalCommand)
            }
            "run_remote_command" | "runremotecommand" | "ssh_run" => {
                Some(ToolName::RunRemoteCommand)
            }
            _ => None,
        }
    }

    pub fn takes_command(&self) -> bool {
        matches!(self, ToolName::RunLocalCommand | ToolName::RunRemoteCommand)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ================= Agent Steps =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool: ToolName,
    pub tool_input: Map<String, Value>,
    #[serde(default)]
    pub thought: String,
}

impl Action {
    pub fn new(tool: ToolName, tool_input: Map<String, Value>) -> Self {
        Self {
            tool,
            tool_input,
            thought: String::new(),
        }
    }

    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.tool_input.get(key).and_then(Value::as_str)
    }
}

/// Where a `Finish` came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinishKind {
    /// The model declared the task done.
    Answer,
    /// The parser rejected the reply; output tells the model what is legal.
    Correction,
    /// No structured object was found; output is the cleaned text.
    Unstructured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finish {
    pub output: Value,
    #[serde(default)]
    pub thought: String,
    pub kind: FinishKind,
}

impl Finish {
    pub fn answer(output: impl Into<Value>, thought: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            thought: thought.into(),
            kind: FinishKind::Answer,
        }
    }

    pub fn correction(message: impl Into<String>) -> Self {
        Self {
            output: Value::String(message.into()),
            thought: String::new(),
            kind: FinishKind::Correction,
        }
    }

    pub fn unstructured(text: impl Into<String>) -> Self {
        Self {
            output: Value::String(text.into()),
            thought: String::new(),
            kind: FinishKind::Unstructured,
        }
    }

    pub fn is_correction(&self) -> bool {
        self.kind == FinishKind::Correction
    }

    /// Output rendered as plain text.
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// One decision parsed from a model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentStep {
    Action(Action),
    Finish(Finish),
}

/// Temporary denylist entry created by cycle detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedTool {
    pub tool: ToolName,
    pub until_step: usize,
}

impl BlockedTool {
    pub fn is_active(&self, step: usize) -> bool {
        step < self.until_step
    }
}

//
// ================= Backends =================
//

/// A concrete model on a concrete runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendId {
    pub runtime: String,
    pub model: String,
}

impl BackendId {
    pub fn new(runtime: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            model: model.into(),
        }
    }

    /// Parse the `runtime/model` form used in configuration.
    pub fn parse(raw: &str) -> Option<Self> {
        let (runtime, model) = raw.trim().split_once('/')?;
        let (runtime, model) = (runtime.trim(), model.trim());
        if runtime.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(runtime, model))
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.model, self.runtime)
    }
}

//
// ================= Tasks =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Status only moves forward; terminal states never change.
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Queued, TaskStatus::Running | TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Completed | TaskStatus::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub status: TaskStatus,
    pub stage: String,
    pub output: Option<String>,
    pub knowledge: Value,
    pub error: Option<String>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn queued(id: Uuid, correlation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: TaskStatus::Queued,
            stage: "queued".to_string(),
            output: None,
            knowledge: Value::Object(Map::new()),
            error: None,
            correlation_id: correlation_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Caller input for a task submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub goal: String,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub project_context: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl TaskRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskHandle {
    pub task_id: Uuid,
    pub correlation_id: String,
}

/// Normalised reply from a peer executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationResult {
    pub status: String,
    pub output: String,
    pub knowledge: Value,
    pub correlation_id: Option<String>,
}

impl DelegationResult {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

//
// ================= Execution =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    UnknownTool,
}

/// Result of dispatching one action, already rendered as text for memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub tool: ToolName,
    pub output: String,
    pub status: ExecutionStatus,
    pub elapsed_ms: u64,
}
