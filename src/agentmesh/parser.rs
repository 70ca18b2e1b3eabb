//! The structured-output parser: turns one LLM turn's free text into an [`Action`].
//!
//! Grounded in the original source's `agent/parser.py` (regex-based field extraction plus a
//! `get_format_instruction()` companion so the prompt text and the parser never drift) but
//! implements the richer five-variant grammar this system actually uses
//! (`tool` / `launch_subagents` / `wait` / `send_message` / `finish`) rather than the legacy
//! three-variant grammar the original `agent.py` spoke.

use serde_json::Value;

/// One parsed instruction from an LLM turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Tool {
        thought: Option<String>,
        tool: String,
        arguments: Value,
    },
    LaunchSubagents {
        thought: Option<String>,
        agents: Vec<String>,
        tasks: Vec<String>,
    },
    Wait { thought: Option<String> },
    SendMessage {
        thought: Option<String>,
        recipient: String,
        message: String,
    },
    Finish {
        thought: Option<String>,
        content: String,
    },
}

/// A parse failure, carrying a message meant to be fed straight back to the LLM as a
/// correction prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// The exact text shown to agents in their system prompt describing the output format. Shares
/// this module with [`parse_action`] so the documented grammar and the parser can never drift.
pub fn format_instruction() -> &'static str {
    r#"Respond using this exact format:

Thought: <free text>            (optional)
Action: tool
Tool: <name>
Arguments: {<json-object>}

Action: launch_subagents
Agents: ["a","b",...]
Tasks:  ["t1","t2",...]

Action: wait

Action: send_message
Recipient: <peer-name>
Message: <single-line text>

Action: finish
Content: <final answer>

Field order outside Thought/Action does not matter. Field names are matched case-insensitively."#
}

/// Parses one LLM turn into an [`Action`].
pub fn parse_action(text: &str) -> Result<Action, ParseError> {
    let thought = extract_field(text, "Thought");
    let action_idx = find_field_start(text, "Action").ok_or_else(|| ParseError("missing required field: Action".to_string()))?;
    let action_line = text[action_idx..].lines().next().unwrap_or("");
    let action_kind = action_line
        .splitn(2, ':')
        .nth(1)
        .map(|s| s.trim().to_lowercase())
        .ok_or_else(|| ParseError("Action field has no value".to_string()))?;

    match action_kind.as_str() {
        "tool" => parse_tool(text, thought),
        "launch_subagents" => parse_launch_subagents(text, thought),
        "wait" => Ok(Action::Wait { thought }),
        "send_message" => parse_send_message(text, thought),
        "finish" => parse_finish(text, thought),
        other => Err(ParseError(format!(
            "unknown action type '{other}': expected one of tool, launch_subagents, wait, send_message, finish"
        ))),
    }
}

fn parse_tool(text: &str, thought: Option<String>) -> Result<Action, ParseError> {
    let tool = extract_field(text, "Tool").ok_or_else(|| ParseError("action 'tool' requires a Tool field".to_string()))?;
    let arguments = match extract_field(text, "Arguments") {
        Some(raw) => serde_json::from_str::<Value>(raw.trim())
            .map_err(|e| ParseError(format!("Arguments field is not valid JSON: {e}")))
            .and_then(|v| {
                if v.is_object() {
                    Ok(v)
                } else {
                    Err(ParseError("Arguments field must be a JSON object".to_string()))
                }
            })?,
        None => Value::Object(Default::default()),
    };
    Ok(Action::Tool { thought, tool, arguments })
}

fn parse_launch_subagents(text: &str, thought: Option<String>) -> Result<Action, ParseError> {
    let agents_raw = extract_field(text, "Agents").ok_or_else(|| ParseError("action 'launch_subagents' requires an Agents field".to_string()))?;
    let tasks_raw = extract_field(text, "Tasks").ok_or_else(|| ParseError("action 'launch_subagents' requires a Tasks field".to_string()))?;

    let agents: Vec<String> = serde_json::from_str(agents_raw.trim())
        .map_err(|e| ParseError(format!("Agents field is not a valid JSON array of strings: {e}")))?;
    let tasks: Vec<String> = serde_json::from_str(tasks_raw.trim())
        .map_err(|e| ParseError(format!("Tasks field is not a valid JSON array of strings: {e}")))?;

    if agents.is_empty() || tasks.is_empty() {
        return Err(ParseError("Agents and Tasks must both be non-empty".to_string()));
    }
    if agents.len() != tasks.len() {
        return Err(ParseError(format!(
            "Agents and Tasks must have equal length (got {} and {})",
            agents.len(),
            tasks.len()
        )));
    }
    Ok(Action::LaunchSubagents { thought, agents, tasks })
}

fn parse_send_message(text: &str, thought: Option<String>) -> Result<Action, ParseError> {
    let recipient = extract_field(text, "Recipient").ok_or_else(|| ParseError("action 'send_message' requires a Recipient field".to_string()))?;
    let message = extract_field(text, "Message").ok_or_else(|| ParseError("action 'send_message' requires a Message field".to_string()))?;

    for forbidden in ["Action:", "Tool:", "Arguments:"] {
        if message.contains(forbidden) {
            return Err(ParseError(format!("Message field must be single-line and must not contain '{forbidden}'")));
        }
    }
    Ok(Action::SendMessage { thought, recipient, message })
}

fn parse_finish(text: &str, thought: Option<String>) -> Result<Action, ParseError> {
    let content = extract_field(text, "Content")
        .or_else(|| extract_field(text, "Response"))
        .ok_or_else(|| ParseError("action 'finish' requires a Content (or legacy Response) field".to_string()))?;
    Ok(Action::Finish { thought, content })
}

/// Finds the byte offset of a `<name>:` field label, case-insensitively, anchored to the start
/// of a line.
fn find_field_start(text: &str, name: &str) -> Option<usize> {
    let needle_lower = format!("{}:", name.to_lowercase());
    let lower = text.to_lowercase();
    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find(&needle_lower) {
        let idx = search_from + rel;
        let at_line_start = idx == 0 || text.as_bytes()[idx - 1] == b'\n';
        if at_line_start {
            return Some(idx);
        }
        search_from = idx + needle_lower.len();
    }
    None
}

/// Extracts the value of a `<name>: ...` field. The value runs from right after the colon to
/// just before the next recognized field label or end of text, trimmed.
fn extract_field(text: &str, name: &str) -> Option<String> {
    const FIELD_NAMES: &[&str] = &[
        "Thought", "Action", "Tool", "Arguments", "Agents", "Tasks", "Recipient", "Message", "Content", "Response",
    ];

    let start = find_field_start(text, name)?;
    let value_start = start + name.len() + 1;
    let rest = &text[value_start..];

    let mut end = rest.len();
    for other in FIELD_NAMES {
        if other.eq_ignore_ascii_case(name) {
            continue;
        }
        if let Some(next_start) = find_field_start(rest, other) {
            end = end.min(next_start);
        }
    }

    Some(rest[..end].trim().to_string())
}
