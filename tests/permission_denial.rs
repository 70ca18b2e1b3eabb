//! End-to-end: a tool requests `Write` permission under a handler that only auto-approves
//! `Read`. The denial must surface through the normal dispatch path, not as a runtime error.

mod common;

use agentmesh::agentmesh::agent::AgentTemplate;
use agentmesh::agentmesh::context_strategy::NoCompaction;
use agentmesh::agentmesh::llm::{LlmTransport, ScriptedTransport};
use agentmesh::agentmesh::permissions::{AutoApproveHandler, PermissionHandler, PermissionKind};
use agentmesh::agentmesh::tool_protocol::ToolRegistry;
use agentmesh::Agent;
use common::{spawn_test_runtime, GatedTool, RecordingEventHandler};
use std::sync::Arc;

#[tokio::test]
async fn write_permission_denied_surfaces_as_tool_failure_not_a_crash() {
    let (orchestrator, runtime) = spawn_test_runtime();
    let recorder = Arc::new(RecordingEventHandler::new());
    runtime.add_event_handler(recorder.clone()).await;

    let template = AgentTemplate::new("writer");
    let transport: Arc<dyn LlmTransport> = Arc::new(ScriptedTransport::new(
        "mock-model",
        vec![
            "Action: tool\nTool: gated_write\nArguments: {\"value\": \"secret\"}".to_string(),
            "Action: finish\nContent: could not complete the write, permission was denied".to_string(),
        ],
    ));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(GatedTool { kind: PermissionKind::Write }));
    let tools = Arc::new(registry);
    let compaction = Arc::new(NoCompaction);

    let mut handler = AutoApproveHandler::new(None);
    handler.add_pattern(PermissionKind::Read, "*");
    let handler: Arc<dyn PermissionHandler> = Arc::new(handler);

    let id = runtime
        .launch_root(
            "writer",
            move |id| Agent::from_template(id, &template, transport, tools, compaction).with_permission_handler(handler),
            "write 'secret' to storage",
        )
        .await;

    let response = orchestrator.wait_for_completion(&id).await.expect("agent never registered");
    assert!(response.success, "agent should still finish cleanly after a denied tool call");
    assert!(response.content.to_lowercase().contains("permission"));

    let tool_calls = recorder.tool_calls();
    assert_eq!(tool_calls.len(), 1);
    let (name, success, error) = &tool_calls[0];
    assert_eq!(name, "gated_write");
    assert!(!success, "tool call itself ran successfully but its result must report denial, not crash the dispatch");
    assert!(error.as_ref().unwrap().to_lowercase().contains("permission"));
}
