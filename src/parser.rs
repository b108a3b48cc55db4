//! Response parser
//!
//! Turns a model's raw reply into exactly one [`AgentStep`]. Models wrap
//! their answer in reasoning traces, prose and half-valid JSON, and invent
//! their own field names; all of that tolerance lives here so the rest of
//! the crate only ever sees the strict types.
//!
//! The parser never fails. Anything it cannot make sense of degrades to a
//! [`Finish`], and a reply that names a tool outside the allowed set (or a
//! blocked one) becomes a corrective `Finish` the caller feeds back to the
//! model.

use crate::models::{Action, AgentStep, Finish, ToolName, FINISH_TOOL};
use serde_json::{Map, Value};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Only this much of a reply is scanned for balanced objects.
const MAX_SCAN_BYTES: usize = 64 * 1024;

/// Balanced objects tried per reply, earliest opening brace first.
const MAX_CANDIDATES: usize = 64;

/// Keys a model uses for the arguments of a tool call.
const INPUT_KEYS: &[&str] = &["tool_input", "action_input", "input", "arguments", "args", "parameters"];

/// Keys carrying a plain answer in an otherwise unrecognised object.
const ANSWER_KEYS: &[&str] = &["response", "message", "output", "answer", "final_answer"];

/// Wrappers some models put around the real tool call.
const NESTED_KEYS: &[&str] = &["action", "next_step", "step"];

/// Shapes that look like a tool call but follow a foreign protocol.
const FOREIGN_KEYS: &[&str] = &["tool_execution", "final_output"];

/// Parse a raw model reply into an action or a finish.
pub fn parse_reply(raw: &str, blocked: &[ToolName]) -> AgentStep {
    let cleaned = strip_reasoning(raw);

    match extract_object(&cleaned) {
        Some(object) => normalize(&object, blocked),
        None => AgentStep::Finish(Finish::unstructured(cleaned)),
    }
}

/// Tools the model may currently choose, `finish` included.
pub fn legal_tools(blocked: &[ToolName]) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = ToolName::ALL
        .iter()
        .filter(|tool| !blocked.contains(tool))
        .map(ToolName::as_str)
        .collect();
    names.push(FINISH_TOOL);
    names
}

pub fn format_correction(blocked: &[ToolName]) -> String {
    format!(
        "Invalid response format. Reply with exactly one JSON object: \
         {{\"thought\": \"...\", \"tool\": \"<one of: {}>\", \"tool_input\": {{...}}}}. \
         To return the final answer use tool \"finish\" with tool_input.output.",
        legal_tools(blocked).join(", ")
    )
}

pub fn unknown_tool_correction(name: &str, blocked: &[ToolName]) -> String {
    format!(
        "Unknown tool '{}'. Choose one of: {}.",
        name,
        legal_tools(blocked).join(", ")
    )
}

pub fn blocked_tool_correction(tool: ToolName, blocked: &[ToolName]) -> String {
    format!(
        "Tool '{}' is temporarily blocked because it was repeated without progress. \
         Choose one of: {}.",
        tool,
        legal_tools(blocked).join(", ")
    )
}

/// Drop reasoning traces, keeping what the model said after them. A reply
/// cut off inside its reasoning leaves nothing to act on.
fn strip_reasoning(raw: &str) -> String {
    if let Some(idx) = raw.rfind(THINK_CLOSE) {
        return raw[idx + THINK_CLOSE.len()..].trim().to_string();
    }
    let text = raw.trim();
    if text.starts_with(THINK_OPEN) {
        return String::new();
    }
    text.to_string()
}

// =============================
// Object extraction
// =============================

fn extract_object(text: &str) -> Option<Map<String, Value>> {
    let span = outer_span(text);
    let candidates = balanced_candidates(text);

    span.and_then(parse_object)
        .or_else(|| candidates.iter().find_map(|c| parse_object(c)))
        .or_else(|| span.and_then(|s| parse_object(&python_literal_to_json(s))))
        .or_else(|| {
            candidates
                .iter()
                .find_map(|c| parse_object(&python_literal_to_json(c)))
        })
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// First `{` to last `}`.
fn outer_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Brace-balanced `{...}` regions in order of their opening brace, found in
/// one pass over at most `MAX_SCAN_BYTES`.
fn balanced_candidates(text: &str) -> Vec<&str> {
    let bytes = &text.as_bytes()[..text.len().min(MAX_SCAN_BYTES)];
    let mut open: Vec<usize> = Vec::new();
    let mut found: Vec<(usize, usize)> = Vec::new();
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for (idx, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            // Quotes only count inside an object; prose apostrophes do not.
            b'"' | b'\'' if !open.is_empty() => quote = Some(b),
            b'{' => open.push(idx),
            b'}' => {
                if let Some(start) = open.pop() {
                    found.push((start, idx));
                }
            }
            _ => {}
        }
    }

    found.sort_unstable_by_key(|&(start, _)| start);
    found
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(|(start, end)| &text[start..=end])
        .collect()
}

/// Rewrite a Python dict literal (single quotes, `True`/`False`/`None`)
/// into JSON.
fn python_literal_to_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    match chars.next() {
                        Some('\'') => out.push('\''),
                        Some(next) => {
                            out.push('\\');
                            out.push(next);
                        }
                        None => out.push('\\'),
                    }
                } else if c == q {
                    out.push('"');
                    quote = None;
                } else if c == '"' {
                    out.push_str("\\\"");
                } else {
                    out.push(c);
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    out.push('"');
                } else if c.is_ascii_alphabetic() {
                    let mut word = String::from(c);
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            word.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    match word.as_str() {
                        "True" => out.push_str("true"),
                        "False" => out.push_str("false"),
                        "None" => out.push_str("null"),
                        _ => out.push_str(&word),
                    }
                } else {
                    out.push(c);
                }
            }
        }
    }

    out
}

// =============================
// Normalisation
// =============================

fn normalize(object: &Map<String, Value>, blocked: &[ToolName]) -> AgentStep {
    if FOREIGN_KEYS.iter().any(|k| object.contains_key(*k)) {
        return AgentStep::Finish(Finish::correction(format_correction(blocked)));
    }

    let thought = string_field(object, "thought").unwrap_or_default();

    if let Some(tool) = object.get("tool") {
        return resolve_tool(tool, input_of(object), thought, blocked);
    }

    for key in NESTED_KEYS {
        match object.get(*key) {
            Some(Value::Object(nested)) => {
                if nested.contains_key("tool") {
                    let inner_thought = string_field(nested, "thought").unwrap_or(thought);
                    return resolve_tool(&nested["tool"], input_of(nested), inner_thought, blocked);
                }
                if has_command(nested) {
                    return command_action(nested, thought, blocked);
                }
            }
            // {"action": "read_file", "action_input": {...}}
            Some(name @ Value::String(_)) if *key == "action" => {
                return resolve_tool(name, input_of(object), thought, blocked);
            }
            _ => {}
        }
    }

    if has_command(object) {
        return command_action(object, thought, blocked);
    }

    let output = ANSWER_KEYS
        .iter()
        .find_map(|k| object.get(*k).filter(|v| !v.is_null()).cloned())
        .unwrap_or_else(|| Value::String(Value::Object(object.clone()).to_string()));

    AgentStep::Finish(Finish::answer(output, thought))
}

fn resolve_tool(
    tool: &Value,
    input: Option<&Value>,
    thought: String,
    blocked: &[ToolName],
) -> AgentStep {
    let name = match tool {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => match items.first() {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(other) => other.to_string(),
            None => String::new(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    };

    let raw_input = input.cloned().unwrap_or(Value::Null);
    let input_is_empty = match &raw_input {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    };

    if name.eq_ignore_ascii_case(FINISH_TOOL) || (name.is_empty() && input_is_empty) {
        let output = match &raw_input {
            Value::Object(map) => ["output", "answer", "result"]
                .iter()
                .find_map(|k| map.get(*k).filter(|v| !v.is_null()).cloned()),
            Value::String(s) if !s.trim().is_empty() => Some(Value::String(s.clone())),
            _ => None,
        };
        let output = output.unwrap_or_else(|| {
            if thought.is_empty() {
                Value::String("Done".to_string())
            } else {
                Value::String(thought.clone())
            }
        });
        return AgentStep::Finish(Finish::answer(output, thought));
    }

    let Some(tool) = ToolName::parse(&name) else {
        return AgentStep::Finish(Finish::correction(unknown_tool_correction(&name, blocked)));
    };

    if blocked.contains(&tool) {
        return AgentStep::Finish(Finish::correction(blocked_tool_correction(tool, blocked)));
    }

    AgentStep::Action(Action {
        tool,
        tool_input: normalize_input(tool, raw_input),
        thought,
    })
}

fn command_action(
    object: &Map<String, Value>,
    thought: String,
    blocked: &[ToolName],
) -> AgentStep {
    let command = string_field(object, "command")
        .or_else(|| string_field(object, "cmd"))
        .unwrap_or_default();
    if command.trim().is_empty() {
        return AgentStep::Finish(Finish::correction(format_correction(blocked)));
    }

    let mut input = Map::new();
    let tool = match string_field(object, "host").filter(|h| !h.trim().is_empty()) {
        Some(host) => {
            input.insert("host".to_string(), Value::String(host));
            ToolName::RunRemoteCommand
        }
        None => ToolName::RunLocalCommand,
    };
    input.insert("command".to_string(), Value::String(command));

    if blocked.contains(&tool) {
        return AgentStep::Finish(Finish::correction(blocked_tool_correction(tool, blocked)));
    }

    AgentStep::Action(Action {
        tool,
        tool_input: input,
        thought,
    })
}

/// Coerce whatever the model passed as arguments into an object, folding
/// bare strings and the `cmd` alias into the key each tool expects.
fn normalize_input(tool: ToolName, raw: Value) -> Map<String, Value> {
    let mut map = match raw {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(s) => {
            let key = match tool {
                ToolName::ReadFile => "file_path",
                ToolName::ListDirectory => "directory",
                ToolName::RunLocalCommand | ToolName::RunRemoteCommand => "command",
            };
            let mut map = Map::new();
            map.insert(key.to_string(), Value::String(s));
            map
        }
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };

    if tool.takes_command() && !map.contains_key("command") {
        if let Some(cmd) = map.remove("cmd") {
            map.insert("command".to_string(), cmd);
        }
    }

    map
}

fn input_of(object: &Map<String, Value>) -> Option<&Value> {
    INPUT_KEYS.iter().find_map(|k| object.get(*k))
}

fn has_command(object: &Map<String, Value>) -> bool {
    object.get("command").map_or(false, Value::is_string)
        || object.get("cmd").map_or(false, Value::is_string)
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}
