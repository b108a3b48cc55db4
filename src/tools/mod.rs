//! Tool trait and registry
//!
//! The four side-effecting capabilities the action loop can dispatch to.
//! Tools return `Err` on failure; the execution engine turns that into an
//! observation so nothing here ever aborts a run.

use crate::config::ToolsConfig;
use crate::error::OrchestrationError;
use crate::models::ToolName;
use crate::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Files larger than this are cut before they reach the model.
const MAX_READ_BYTES: usize = 64 * 1024;

/// Substrings that make a command unconditionally rejected.
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "| rm ",
    "mkfs",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    "> /dev/sd",
    "shutdown",
    "reboot",
    "chmod 777",
    "drop database",
    ":(){ :|:& };:",
];

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;
    fn description(&self) -> &'static str;
    async fn execute(&self, input: &Map<String, Value>) -> Result<String>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    /// Registered names in a stable order.
    pub fn list(&self) -> Vec<ToolName> {
        let mut names: Vec<ToolName> = self.tools.keys().copied().collect();
        names.sort();
        names
    }

    /// One `name: description` line per tool, for prompts.
    pub fn describe(&self) -> String {
        self.list()
            .into_iter()
            .filter_map(|name| self.tools.get(&name))
            .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with all four capabilities wired to `config`.
pub fn create_default_registry(config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let root = config.workspace_root.clone();

    registry.register(Arc::new(ReadFileTool { root: root.clone() }));
    registry.register(Arc::new(ListDirectoryTool { root: root.clone() }));
    registry.register(Arc::new(LocalCommandTool {
        root,
        timeout: config.command_timeout,
    }));
    registry.register(Arc::new(RemoteCommandTool {
        user: config.ssh_user.clone(),
        timeout: config.ssh_timeout,
    }));

    registry
}

fn require_str<'a>(input: &'a Map<String, Value>, keys: &[&str]) -> Result<&'a str> {
    keys.iter()
        .find_map(|k| input.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            OrchestrationError::InvalidToolInput(format!("Expected '{}' in tool_input", keys[0]))
        })
}

fn resolve(root: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Reject commands matching a known destructive pattern.
pub fn check_command_safety(command: &str) -> Result<()> {
    let lower = command.to_lowercase();
    match FORBIDDEN_SUBSTR.iter().find(|f| lower.contains(*f)) {
        Some(pattern) => Err(OrchestrationError::ToolError(format!(
            "Command rejected, forbidden pattern: {}",
            pattern
        ))),
        None => Ok(()),
    }
}

async fn run_process(mut cmd: Command, timeout: Duration, label: &str) -> Result<String> {
    cmd.kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            OrchestrationError::ToolError(format!(
                "{} timed out after {}s",
                label,
                timeout.as_secs()
            ))
        })??;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(OrchestrationError::ToolError(format!(
            "{} exited with {}: {}",
            label,
            code,
            if stderr.is_empty() { &stdout } else { &stderr }
        )));
    }

    Ok(match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => "(no output)".to_string(),
        (false, true) => stdout,
        (true, false) => format!("STDERR: {}", stderr),
        (false, false) => format!("{}\nSTDERR: {}", stdout, stderr),
    })
}

pub struct ReadFileTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> ToolName {
        ToolName::ReadFile
    }

    fn description(&self) -> &'static str {
        "Read a text file. Input: {\"file_path\": \"path/to/file\"}"
    }

    async fn execute(&self, input: &Map<String, Value>) -> Result<String> {
        let path = resolve(&self.root, require_str(input, &["file_path", "path", "file"])?);
        debug!(path = %path.display(), "read_file");

        let mut content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            OrchestrationError::ToolError(format!("Cannot read {}: {}", path.display(), e))
        })?;

        if content.len() > MAX_READ_BYTES {
            let mut cut = MAX_READ_BYTES;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n... [truncated]");
        }
        Ok(content)
    }
}

pub struct ListDirectoryTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> ToolName {
        ToolName::ListDirectory
    }

    fn description(&self) -> &'static str {
        "List entries of a directory. Input: {\"directory\": \"path\"} (defaults to the workspace)"
    }

    async fn execute(&self, input: &Map<String, Value>) -> Result<String> {
        let raw = require_str(input, &["directory", "path", "dir"]).unwrap_or(".");
        let path = resolve(&self.root, raw);
        debug!(path = %path.display(), "list_directory");

        let mut reader = tokio::fs::read_dir(&path).await.map_err(|e| {
            OrchestrationError::ToolError(format!("Cannot list {}: {}", path.display(), e))
        })?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        if entries.is_empty() {
            return Ok("(empty directory)".to_string());
        }
        Ok(entries.join("\n"))
    }
}

pub struct LocalCommandTool {
    root: PathBuf,
    timeout: Duration,
}

#[async_trait::async_trait]
impl Tool for LocalCommandTool {
    fn name(&self) -> ToolName {
        ToolName::RunLocalCommand
    }

    fn description(&self) -> &'static str {
        "Run a shell command on this machine. Input: {\"command\": \"...\"}"
    }

    async fn execute(&self, input: &Map<String, Value>) -> Result<String> {
        let command = require_str(input, &["command", "cmd"])?;
        check_command_safety(command)?;

        info!(command = %command, "run_local_command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.root);
        run_process(cmd, self.timeout, "Command").await
    }
}

pub struct RemoteCommandTool {
    user: Option<String>,
    timeout: Duration,
}

#[async_trait::async_trait]
impl Tool for RemoteCommandTool {
    fn name(&self) -> ToolName {
        ToolName::RunRemoteCommand
    }

    fn description(&self) -> &'static str {
        "Run a shell command on a remote host over SSH. Input: {\"host\": \"...\", \"command\": \"...\"}"
    }

    async fn execute(&self, input: &Map<String, Value>) -> Result<String> {
        let host = require_str(input, &["host", "server"])?;
        let command = require_str(input, &["command", "cmd"])?;

        if host.starts_with('-') || host.contains(char::is_whitespace) {
            return Err(OrchestrationError::InvalidToolInput(format!(
                "Invalid host: {}",
                host
            )));
        }
        check_command_safety(command)?;

        let target = match &self.user {
            Some(user) if !host.contains('@') => format!("{}@{}", user, host),
            _ => host.to_string(),
        };
        info!(host = %target, command = %command, "run_remote_command");

        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes", "-o", "ConnectTimeout=10"])
            .arg(&target)
            .arg(command);
        run_process(cmd, self.timeout, "SSH command").await
    }
}
