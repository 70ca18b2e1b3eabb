//! The tool interface and per-agent registry.
//!
//! This is a direct simplification of the teacher's multi-protocol `tool_protocol.rs`: that
//! module routed tool calls through swappable `ToolProtocol` backends (local functions, MCP
//! servers). This crate has exactly one kind of tool source — code compiled into the process —
//! so the protocol indirection is dropped and [`Tool`] becomes the trait agents implement
//! directly. [`ToolResult`], [`ToolParameter`]/[`ToolParameterType`], and [`ToolMetadata`] keep
//! their shape and builder methods unchanged, since they describe the result/schema contract
//! independent of how a tool is invoked.
//!
//! [`ToolRegistry::dispatch`] is the full invocation pipeline named in the runtime design:
//! look the tool up, hand it a [`Context`], run it, and truncate oversized output before it
//! goes back to the LLM.

use crate::agentmesh::context::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// The outcome of a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The declared type of a [`ToolParameter`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// A single parameter in a tool's schema, as presented to the LLM and validated on dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<serde_json::Value>,
    pub items: Option<Box<ToolParameterType>>,
    pub properties: Option<HashMap<String, ToolParameter>>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
            items: None,
            properties: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_items(mut self, item_type: ToolParameterType) -> Self {
        self.items = Some(Box::new(item_type));
        self
    }

    pub fn with_properties(mut self, properties: HashMap<String, ToolParameter>) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Static identity and schema of a [`Tool`], surfaced to the LLM in its system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }
}

/// Errors surfaced by [`ToolRegistry::dispatch`].
#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound(String),
    ExecutionFailed(String),
    InvalidParameters(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {name}"),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {msg}"),
            ToolError::InvalidParameters(msg) => write!(f, "invalid tool parameters: {msg}"),
        }
    }
}

impl Error for ToolError {}

/// A single callable capability an agent can invoke via the `tool` action.
///
/// Implementations own their state (the `calculator` tool is stateless; `memory` holds a
/// shared key/value store behind an `Arc`) and are registered once per agent in a
/// [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> ToolMetadata;

    /// Executes the tool with the given JSON arguments and call context.
    ///
    /// Implementations should validate `arguments` against their own schema rather than rely
    /// on the registry, since required-field shape varies per tool.
    async fn call(&self, arguments: serde_json::Value, context: &Context) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;
}

/// The set of tools available to one agent, plus the dispatch logic that sits between a parsed
/// `Action::Tool` and the concrete [`Tool::call`].
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.metadata().name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.tools.values().map(|t| t.metadata()).collect()
    }

    /// Looks the tool up, invokes it, and truncates its output through `context`'s truncator.
    ///
    /// Never propagates a raw error out of the dispatcher: an unknown tool name or a failed
    /// `Tool::call` both come back as a failed [`ToolResult`] rather than an `Err`, so callers
    /// can always fold the outcome straight into the LLM's observation history.
    ///
    /// Truncation only ever clips the *text* rendering of a successful output's `output`
    /// field (stringified) since that's what ends up folded back into the LLM prompt; the
    /// structured [`ToolResult`] itself is returned untouched so callers who want the raw JSON
    /// still get it.
    pub async fn dispatch(&self, tool_name: &str, arguments: serde_json::Value, context: &Context) -> (ToolResult, Option<String>) {
        let Some(tool) = self.tools.get(tool_name) else {
            let available = self.list_tools().into_iter().map(|m| m.name).collect::<Vec<_>>().join(", ");
            return (ToolResult::failure(format!("tool not found: '{tool_name}'; available tools: [{available}]")), None);
        };

        let result = match tool.call(arguments, context).await {
            Ok(result) => result,
            Err(error) => return (ToolResult::failure(format!("tool execution failed: {error}")), None),
        };

        let rendered = result.output.as_str().map(|s| s.to_string()).unwrap_or_else(|| result.output.to_string());
        let (truncated, metadata) = context.truncate_output(&rendered, tool_name);
        let truncation_note = metadata.is_truncated.then_some(truncated);

        (result, truncation_note)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
