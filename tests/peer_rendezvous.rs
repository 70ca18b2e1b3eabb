//! End-to-end: two sibling agents assemble a value by exchanging peer messages, one pair of
//! requests and replies at a time, with no parent mediation beyond the initial launch.

mod common;

use agentmesh::agentmesh::agent::{AgentStatus, AgentTemplate};
use agentmesh::agentmesh::context_strategy::NoCompaction;
use agentmesh::agentmesh::llm::LlmTransport;
use agentmesh::agentmesh::tool_protocol::ToolRegistry;
use agentmesh::Agent;
use async_trait::async_trait;
use common::{count_occurrences, extract_after_last, spawn_test_runtime, EventLog};
use std::error::Error;
use std::sync::Arc;

/// A request from `a` to `b` asking for a suffix, `b`'s reply, `a` folding it into a
/// concatenation and sending that back, and `b` acknowledging it — four messages, alternating
/// sender, driven purely by how many "Message from '<peer>'" observations each side has seen so
/// far. Shared by both `a` and `b` since children inherit the parent's transport.
struct RendezvousTransport {
    log: EventLog,
}

#[async_trait]
impl LlmTransport for RendezvousTransport {
    async fn chat(&self, prompt: &str, _system_prompt: Option<&str>) -> Result<String, Box<dyn Error + Send + Sync>> {
        if prompt.starts_with("Task: assemble as a") {
            return Ok(self.decide_a(prompt));
        }
        if prompt.starts_with("Task: assemble as b") {
            return Ok(self.decide_b(prompt));
        }
        // coordinator: launch once, then idle.
        if prompt.contains("Action: launch_subagents") {
            return Ok("Action: wait".to_string());
        }
        Ok("Action: launch_subagents\nAgents: [\"a\",\"b\"]\nTasks: [\"assemble as a\",\"assemble as b\"]".to_string())
    }

    fn model_name(&self) -> String {
        "rendezvous-mock".to_string()
    }
}

impl RendezvousTransport {
    fn decide_a(&self, prompt: &str) -> String {
        match count_occurrences(prompt, "Message from 'b':") {
            0 => {
                self.log.push("a->b:need-suffix");
                "Action: send_message\nRecipient: b\nMessage: need-suffix".to_string()
            }
            1 => {
                let suffix = extract_after_last(prompt, "Message from 'b': ").unwrap_or_default();
                let combined = format!("prefix-{suffix}");
                self.log.push(format!("a->b:{combined}"));
                format!("Action: send_message\nRecipient: b\nMessage: {combined}")
            }
            _ => {
                let ack = extract_after_last(prompt, "Message from 'b': ").unwrap_or_default();
                format!("Action: finish\nContent: assembled value acknowledged by b: {ack}")
            }
        }
    }

    fn decide_b(&self, prompt: &str) -> String {
        match count_occurrences(prompt, "Message from 'a':") {
            0 => "Action: wait".to_string(),
            1 => {
                self.log.push("b->a:suffix-value");
                "Action: send_message\nRecipient: a\nMessage: suffix-value".to_string()
            }
            _ => {
                self.log.push("b->a:ack");
                "Action: send_message\nRecipient: a\nMessage: ack".to_string()
            }
        }
    }
}

#[tokio::test]
async fn peer_rendezvous_assembles_value_with_no_deadlock() {
    let (orchestrator, runtime) = spawn_test_runtime();
    let log = EventLog::new();

    let mut a_template = AgentTemplate::new("a");
    a_template.allowed_peers = vec!["b".to_string()];
    let mut b_template = AgentTemplate::new("b");
    b_template.allowed_peers = vec!["a".to_string()];

    let mut coordinator_template = AgentTemplate::new("coordinator");
    coordinator_template.subagent_templates.insert("a".to_string(), a_template);
    coordinator_template.subagent_templates.insert("b".to_string(), b_template);

    let transport: Arc<dyn LlmTransport> = Arc::new(RendezvousTransport { log: log.clone() });
    let tools = Arc::new(ToolRegistry::new());
    let compaction = Arc::new(NoCompaction);

    let coordinator_id = runtime
        .launch_root(
            "coordinator",
            move |id| Agent::from_template(id, &coordinator_template, transport, tools, compaction),
            "run rendezvous",
        )
        .await;

    // `children_of` only reflects the relationship once `launch_subagents` registers each
    // child, which happens on the coordinator's first turn — poll briefly rather than assuming
    // it has already happened by the time this call returns.
    let children = loop {
        let children = orchestrator.children_of(&coordinator_id).await;
        if children.len() == 2 {
            break children;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    };
    let a_id = children
        .into_iter()
        .find(|id| id.rsplit_once('_').map(|(name, _)| name) == Some("a"))
        .expect("coordinator did not launch a subagent named 'a'");

    let response = orchestrator.wait_for_completion(&a_id).await.expect("a never registered");
    assert!(response.success);
    assert!(response.content.contains("ack"));

    assert_eq!(
        log.snapshot(),
        vec![
            "a->b:need-suffix".to_string(),
            "b->a:suffix-value".to_string(),
            "a->b:prefix-suffix-value".to_string(),
            "b->a:ack".to_string(),
        ]
    );

    // `b` sent the final message and has nothing left to react to — it never independently
    // calls `finish`, but it is quiescent (Suspended), not stuck mid-turn or failed. That's the
    // "no deadlock" condition: every message was delivered and every agent that could act, did.
    let b_id = orchestrator.children_of(&coordinator_id).await.into_iter().find(|id| id != &a_id).unwrap();
    assert_eq!(orchestrator.status(&b_id).await, Some(AgentStatus::Suspended));
}
