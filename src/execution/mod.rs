//! Execution engine
//!
//! Dispatches one validated action to its tool and renders the outcome as
//! observation text. Tool failures are recorded, never propagated.

use crate::models::{Action, ExecutionStatus, Observation, ToolName};
use crate::tools::ToolRegistry;
use std::time::Instant;
use tracing::{debug, warn};

pub struct ExecutionEngine {
    tool_registry: ToolRegistry,
}

impl ExecutionEngine {
    pub fn new(tool_registry: ToolRegistry) -> Self {
        Self { tool_registry }
    }

    pub fn registered(&self) -> Vec<ToolName> {
        self.tool_registry.list()
    }

    pub fn describe_tools(&self) -> String {
        self.tool_registry.describe()
    }

    /// Execute `action` and always come back with an observation.
    pub async fn observe(&self, action: &Action) -> Observation {
        let start = Instant::now();

        let Some(tool) = self.tool_registry.get(action.tool) else {
            let valid = self
                .registered()
                .iter()
                .map(ToolName::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            warn!(tool = %action.tool, "Tool not registered");
            return Observation {
                tool: action.tool,
                output: format!(
                    "Error: tool '{}' is not available. Valid tools: {}",
                    action.tool, valid
                ),
                status: ExecutionStatus::UnknownTool,
                elapsed_ms: 0,
            };
        };

        let (output, status) = match tool.execute(&action.tool_input).await {
            Ok(text) => (text, ExecutionStatus::Success),
            Err(e) => {
                warn!(tool = %action.tool, error = %e, "Tool execution failed");
                (format!("Error: {}", e), ExecutionStatus::Failed)
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(tool = %action.tool, elapsed_ms, ?status, "Tool finished");

        Observation {
            tool: action.tool,
            output,
            status,
            elapsed_ms,
        }
    }
}
