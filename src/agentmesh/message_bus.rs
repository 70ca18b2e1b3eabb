//! The envelope type routed between agents.
//!
//! Grounded directly in the original source's `agent/schemas.py::AgentMessage` (a dataclass
//! with `type`, `from_agent`, `to_agent`, `payload`, `priority`, `timestamp`). The envelope
//! itself is deliberately dumb: it knows nothing about agent status.
//! [`Orchestrator`](crate::agentmesh::orchestrator::Orchestrator) is the component that decides
//! routing (peer-queue vs. pending-state) based on what it knows about each agent, and it is
//! `Orchestrator` that owns the actual per-agent FIFOs this module's [`EnvelopeFifo`] backs.

use std::collections::VecDeque;

/// What kind of event an [`AgentMessage`] carries.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// A message from one sibling agent to another.
    PeerMessage { content: String },
    /// A child finished successfully; addressed to its parent.
    SubagentCompleted { child_name: String, result: String },
    /// A child terminated with an error; addressed to its parent.
    SubagentFailed { child_name: String, error: String },
}

impl MessageKind {
    /// Parent-destined completion/failure envelopes outrank peer messages so that progress
    /// toward the root of a subagent tree is never starved by sibling chatter.
    pub fn default_priority(&self) -> i32 {
        match self {
            MessageKind::PeerMessage { .. } => 0,
            MessageKind::SubagentCompleted { .. } | MessageKind::SubagentFailed { .. } => 10,
        }
    }
}

/// One routed message.
#[derive(Debug, Clone)]
pub struct AgentMessage {
    pub kind: MessageKind,
    pub from_agent: Option<String>,
    pub to_agent: String,
    pub priority: i32,
}

impl AgentMessage {
    pub fn new(kind: MessageKind, from_agent: Option<String>, to_agent: impl Into<String>) -> Self {
        let priority = kind.default_priority();
        Self {
            kind,
            from_agent,
            to_agent: to_agent.into(),
            priority,
        }
    }
}

/// A plain FIFO envelope queue. [`Orchestrator`](crate::agentmesh::orchestrator::Orchestrator)
/// keeps one of these per agent for its peer-queue table (peer messages, drained one envelope
/// per resume) and one for its pending-state table (completion/failure envelopes arriving before
/// a suspend snapshot exists, drained fully on save). Parent-destined completion/failure
/// envelopes never share a queue with peer messages in the live routing path — each table holds
/// exactly one [`MessageKind`] family — so within either table, plain FIFO order already is
/// priority order; `priority` is kept on the envelope for observability (see
/// `OrchestrationEvent::MessageSent`) rather than for in-queue ordering.
pub type EnvelopeFifo = VecDeque<AgentMessage>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priority_ranks_completion_above_peer_message() {
        let peer = AgentMessage::new(MessageKind::PeerMessage { content: "hi".into() }, Some("a".into()), "b");
        let completion = AgentMessage::new(
            MessageKind::SubagentCompleted { child_name: "c".into(), result: "done".into() },
            Some("c".into()),
            "parent",
        );
        assert!(completion.priority > peer.priority);
    }
}
