//! End-to-end: a parent launches two subagents that resolve at different speeds, and must fold
//! both of their results into its final answer regardless of arrival order.

mod common;

use agentmesh::agentmesh::agent::AgentTemplate;
use agentmesh::agentmesh::context_strategy::NoCompaction;
use agentmesh::agentmesh::llm::LlmTransport;
use agentmesh::agentmesh::tool_protocol::ToolRegistry;
use agentmesh::Agent;
use async_trait::async_trait;
use common::spawn_test_runtime;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// Dispatches purely on the task text, since children inherit the parent's transport instance —
/// a deliberate design choice (transports are shared across a template tree), not a test
/// shortcut.
struct CoordinatorTransport;

#[async_trait]
impl LlmTransport for CoordinatorTransport {
    async fn chat(&self, prompt: &str, _system_prompt: Option<&str>) -> Result<String, Box<dyn Error + Send + Sync>> {
        if prompt.starts_with("Task: compute alpha") {
            tokio::time::sleep(Duration::from_millis(5)).await;
            return Ok("Action: finish\nContent: alpha result".to_string());
        }
        if prompt.starts_with("Task: compute beta") {
            tokio::time::sleep(Duration::from_millis(40)).await;
            return Ok("Action: finish\nContent: beta result".to_string());
        }
        if prompt.contains("Subagent 'alpha'") && prompt.contains("Subagent 'beta'") {
            return Ok("Action: finish\nContent: assembled alpha result and beta result".to_string());
        }
        if prompt.contains("Action: launch_subagents") {
            return Ok("Action: wait".to_string());
        }
        Ok("Action: launch_subagents\nAgents: [\"alpha\",\"beta\"]\nTasks: [\"compute alpha\",\"compute beta\"]".to_string())
    }

    fn model_name(&self) -> String {
        "coordinator-mock".to_string()
    }
}

#[tokio::test]
async fn parallel_subagents_with_disparate_latencies_both_resolve() {
    let (orchestrator, runtime) = spawn_test_runtime();

    let mut root_template = AgentTemplate::new("root");
    root_template.subagent_templates.insert("alpha".to_string(), AgentTemplate::new("alpha"));
    root_template.subagent_templates.insert("beta".to_string(), AgentTemplate::new("beta"));

    let transport: Arc<dyn LlmTransport> = Arc::new(CoordinatorTransport);
    let tools = Arc::new(ToolRegistry::new());
    let compaction = Arc::new(NoCompaction);

    let root_id = runtime
        .launch_root(
            "root",
            move |id| Agent::from_template(id, &root_template, transport, tools, compaction),
            "coordinate alpha and beta",
        )
        .await;

    let response = orchestrator.wait_for_completion(&root_id).await.expect("root never registered");
    assert!(response.success);
    assert!(response.content.contains("alpha result"));
    assert!(response.content.contains("beta result"));
}
