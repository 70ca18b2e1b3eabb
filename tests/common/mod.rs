//! Shared test harness for the end-to-end scenario tests: spinning up an orchestrator/runtime
//! pair, plus a couple of test-only `Tool`/`EventHandler` implementations that exercise real
//! dispatch paths rather than mocking them away.

use agentmesh::agentmesh::context::Context;
use agentmesh::agentmesh::event::{AgentEvent, EventHandler};
use agentmesh::agentmesh::permissions::{PermissionKind, PermissionRequest};
use agentmesh::agentmesh::tool_protocol::{Tool, ToolMetadata, ToolParameter, ToolParameterType, ToolResult};
use agentmesh::{Orchestrator, Runtime};
use async_trait::async_trait;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// Builds a fresh orchestrator/runtime pair with the resume-signal driver already spawned, ready
/// for `runtime.launch_root(...)`.
pub fn spawn_test_runtime() -> (Arc<Orchestrator>, Arc<Runtime>) {
    let (orchestrator, resume_rx) = Orchestrator::new();
    let runtime = Runtime::new(orchestrator.clone());
    tokio::spawn(runtime.clone().drive(resume_rx));
    (orchestrator, runtime)
}

/// Returns the text on the same line immediately after the last occurrence of `marker`.
pub fn extract_after_last(haystack: &str, marker: &str) -> Option<String> {
    let idx = haystack.rfind(marker)?;
    let rest = &haystack[idx + marker.len()..];
    Some(rest.lines().next().unwrap_or("").trim().to_string())
}

pub fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

/// A tool that always asks permission for a configured [`PermissionKind`] before "writing" its
/// argument. Exists to drive a real denial through [`Context::ask`] rather than asserting on a
/// handler in isolation.
pub struct GatedTool {
    pub kind: PermissionKind,
}

#[async_trait]
impl Tool for GatedTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("gated_write", "Writes a value, subject to permission.")
            .with_parameter(ToolParameter::new("value", ToolParameterType::String).required())
    }

    async fn call(&self, arguments: serde_json::Value, context: &Context) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let value = arguments.get("value").and_then(|v| v.as_str()).unwrap_or_default();
        let request = PermissionRequest::new(self.kind, vec![value.to_string()]).with_description("gated_write tool call");
        match context.ask(request).await {
            Ok(()) => Ok(ToolResult::success(serde_json::json!(format!("wrote {value}")))),
            Err(denied) => Ok(ToolResult::failure(format!("permission denied: {denied}"))),
        }
    }
}

/// Captures the events a test wants to assert on directly, instead of inferring them from a
/// scripted agent's final text.
#[derive(Default)]
pub struct RecordingEventHandler {
    pub parse_failures: Mutex<usize>,
    pub tool_calls: Mutex<Vec<(String, bool, Option<String>)>>,
}

impl RecordingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_failure_count(&self) -> usize {
        *self.parse_failures.lock().unwrap()
    }

    pub fn tool_calls(&self) -> Vec<(String, bool, Option<String>)> {
        self.tool_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingEventHandler {
    async fn on_agent_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::ParseFailed { .. } => {
                *self.parse_failures.lock().unwrap() += 1;
            }
            AgentEvent::ToolCallCompleted { tool_name, success, error, .. } => {
                self.tool_calls.lock().unwrap().push((tool_name.clone(), *success, error.clone()));
            }
            _ => {}
        }
    }
}

/// Records strings pushed to it in call order, from inside a transport's decision closure — lets
/// a test assert the exact order agents decided to send peer messages in.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
