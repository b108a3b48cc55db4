//! System prompts
//!
//! Wording is not load-bearing; the parser tolerates most deviations. The
//! blocked-tools addendum is, because it is how cycle detection reaches the
//! model.

use crate::memory::{Role, Turn};
use crate::models::ToolName;
use crate::parser::legal_tools;

pub const PLANNER_SYSTEM_PROMPT: &str = "You are a planning assistant. \
Given a task, write a short plan of one or two concrete steps. \
Plain text only, no JSON, no preamble.";

pub fn executor_system_prompt(tools_description: &str) -> String {
    format!(
        r#"You are an autonomous executor. You solve the task step by step using tools.

Available tools:
{tools}
- finish: return the final answer. Input: {{"output": "..."}}

Reply with exactly one JSON object and nothing else:
{{"thought": "why this step", "tool": "<tool name>", "tool_input": {{...}}}}

Rules:
- One tool call per reply. Wait for its observation before the next call.
- Do not repeat a call with identical input; use the observation you already have.
- When the task is done, use "finish"."#,
        tools = tools_description
    )
}

/// Append the blocked-tools notice to a system prompt.
pub fn with_blocked_tools(system: &str, blocked: &[ToolName]) -> String {
    if blocked.is_empty() {
        return system.to_string();
    }
    let names: Vec<&str> = blocked.iter().map(ToolName::as_str).collect();
    format!(
        "{}\n\nBLOCKED TOOLS (do not use them now): {}. Allowed: {}.",
        system,
        names.join(", "),
        legal_tools(blocked).join(", ")
    )
}

/// Copy of `conversation` with the blocked-tools notice folded into its
/// system turn (one is prepended if missing).
pub fn apply_blocked_tools(conversation: &[Turn], blocked: &[ToolName]) -> Vec<Turn> {
    let mut turns = conversation.to_vec();
    if blocked.is_empty() {
        return turns;
    }

    match turns.iter_mut().find(|t| t.role == Role::System) {
        Some(system) => system.content = with_blocked_tools(&system.content, blocked),
        None => turns.insert(0, Turn::system(with_blocked_tools("", blocked).trim_start())),
    }
    turns
}
