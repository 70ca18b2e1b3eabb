//! End-to-end: an agent that never emits `finish` is stopped once it hits its configured
//! iteration cap, rather than looping forever. Hitting the cap forces one extra, unparsed LLM
//! turn asking for a final summary, and that summary is reported as a successful result.

mod common;

use agentmesh::agentmesh::agent::AgentTemplate;
use agentmesh::agentmesh::context_strategy::NoCompaction;
use agentmesh::agentmesh::llm::{LlmTransport, ScriptedTransport};
use agentmesh::agentmesh::tool_protocol::ToolRegistry;
use agentmesh::agentmesh::tools::calculator::CalculatorTool;
use agentmesh::Agent;
use common::spawn_test_runtime;
use std::sync::Arc;

#[tokio::test]
async fn iteration_cap_forces_a_final_summary_turn() {
    let (orchestrator, runtime) = spawn_test_runtime();

    const MAX_ITERATIONS: usize = 3;
    let mut template = AgentTemplate::new("looper");
    template.max_iterations = MAX_ITERATIONS;

    // Every turn is a harmless tool call, never `finish` — each one keeps the loop going
    // instead of suspending, so the iteration counter climbs every turn. One extra scripted
    // response is queued past the cap: the forced final-summary turn, which isn't parsed as an
    // Action at all, just returned verbatim as the result.
    const FINAL_SUMMARY: &str = "here is my best answer given what I found so far";
    let turn = "Action: tool\nTool: calculator\nArguments: {\"expression\": \"1+1\"}".to_string();
    let mut responses = vec![turn; MAX_ITERATIONS];
    responses.push(FINAL_SUMMARY.to_string());
    let transport: Arc<dyn LlmTransport> = Arc::new(ScriptedTransport::new("mock-model", responses));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool::new()));
    let tools = Arc::new(registry);
    let compaction = Arc::new(NoCompaction);

    let id = runtime
        .launch_root(
            "looper",
            move |id| Agent::from_template(id, &template, transport, tools, compaction),
            "keep going forever",
        )
        .await;

    let response = orchestrator.wait_for_completion(&id).await.expect("agent never registered");

    // Reaching the cap without ever calling `finish` still produces a deliberate answer: the
    // runtime forces one more turn with a fixed "write your final summary" prompt and reports
    // that reply as a successful result rather than a failure.
    assert!(response.success);
    assert_eq!(response.iterations, MAX_ITERATIONS);
    assert_eq!(response.content, FINAL_SUMMARY);
    assert_eq!(orchestrator.status(&id).await, Some(agentmesh::agentmesh::agent::AgentStatus::Completed));
}
