//! End-to-end: the model emits one malformed turn, the runtime retries with a correction prompt,
//! and the agent recovers and finishes normally.

mod common;

use agentmesh::agentmesh::agent::AgentTemplate;
use agentmesh::agentmesh::context_strategy::NoCompaction;
use agentmesh::agentmesh::llm::{LlmTransport, ScriptedTransport};
use agentmesh::agentmesh::tool_protocol::ToolRegistry;
use agentmesh::agentmesh::tools::calculator::CalculatorTool;
use agentmesh::Agent;
use common::{spawn_test_runtime, RecordingEventHandler};
use std::sync::Arc;

#[tokio::test]
async fn malformed_turn_is_retried_then_recovers() {
    let (orchestrator, runtime) = spawn_test_runtime();
    let recorder = Arc::new(RecordingEventHandler::new());
    runtime.add_event_handler(recorder.clone()).await;

    let template = AgentTemplate::new("calculator-agent");
    let transport: Arc<dyn LlmTransport> = Arc::new(ScriptedTransport::new(
        "mock-model",
        vec![
            "this is not formatted as an action at all".to_string(),
            "Action: tool\nTool: calculator\nArguments: {\"expression\": \"2+2\"}".to_string(),
            "Action: finish\nContent: 4".to_string(),
        ],
    ));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool::new()));
    let tools = Arc::new(registry);
    let compaction = Arc::new(NoCompaction);

    let id = runtime
        .launch_root(
            "calculator-agent",
            move |id| Agent::from_template(id, &template, transport, tools, compaction),
            "what is 2 + 2?",
        )
        .await;

    let response = orchestrator.wait_for_completion(&id).await.expect("agent never registered");
    assert!(response.success);
    assert_eq!(response.content, "4");
    assert_eq!(response.iterations, 2);
    assert_eq!(recorder.parse_failure_count(), 1);

    let tool_calls = recorder.tool_calls();
    assert_eq!(tool_calls.len(), 1);
    assert_eq!(tool_calls[0].0, "calculator");
    assert!(tool_calls[0].1);
}
