//! The process-wide coordinator: agent registry, parent/child and peer relationship tables,
//! and the message routing that drives suspend/resume.
//!
//! This is close to a line-for-line port of the original source's `agent/orchestrator.py`
//! (`AgentOrchestrator`), translated from a single-threaded asyncio singleton into an
//! `Arc<Orchestrator>` shared across `tokio` tasks. The two are kept deliberately close because
//! the race this module exists to handle — a completion or peer message arriving for an agent
//! *before* its suspend snapshot has been saved — is exactly the race the original was written
//! to close, and the fix (a per-agent pending-state FIFO, drained on save) only works if the
//! ordering it relies on survives the port intact.
//!
//! Unlike the source's single `AgentOrchestrator` class, this crate splits the dumb queue
//! mechanics into [`message_bus`](crate::agentmesh::message_bus) and keeps routing decisions
//! (which table a message lands in) here, where the agent-status bookkeeping already lives.

use crate::agentmesh::agent::{AgentResponse, AgentState, AgentStatus, PeerMessage};
use crate::agentmesh::event::{AgentEvent, EventHandler, OrchestrationEvent};
use crate::agentmesh::message_bus::{AgentMessage, EnvelopeFifo, MessageKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

struct AgentEntry {
    name: String,
    status: AgentStatus,
    saved_state: Option<AgentState>,
    result: Option<AgentResponse>,
    completion: Arc<Notify>,
}

/// A fresh `tokio::task` should be spawned for `agent_id`, re-entering the runtime loop with
/// `state` restored. Emitted on the resume channel whenever a delivered message causes a
/// suspended agent to become runnable again.
pub struct ResumeSignal {
    pub agent_id: String,
    pub state: AgentState,
}

/// The process-wide coordinator described in the component design: one agent table, the
/// parent/child and name-lookup relationship tables, and the peer-queue / pending-state tables
/// that make suspend/resume race-free.
pub struct Orchestrator {
    agents: Mutex<HashMap<String, AgentEntry>>,
    parent_children: Mutex<HashMap<String, Vec<String>>>,
    child_parent: Mutex<HashMap<String, String>>,
    name_to_ids: Mutex<HashMap<String, Vec<String>>>,
    pending_state: Mutex<HashMap<String, EnvelopeFifo>>,
    /// Peer messages parked for a recipient that is running (not suspended). Unlike
    /// `pending_state`, which exists only to close the race window before a suspend snapshot
    /// exists and is drained fully, this table is the steady-state mailbox for a busy agent and
    /// is drained one envelope per resume, so a burst of peer messages doesn't all land on the
    /// same turn.
    peer_queues: Mutex<HashMap<String, EnvelopeFifo>>,
    resume_tx: mpsc::UnboundedSender<ResumeSignal>,
    event_handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
    next_id: AtomicU64,
}

impl Orchestrator {
    /// Builds a fresh orchestrator plus the receiving end of its resume channel. The caller
    /// (typically the runtime's top-level driver) owns the receiver and is responsible for
    /// spawning a new agent task for every [`ResumeSignal`] it sees.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ResumeSignal>) {
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self {
            agents: Mutex::new(HashMap::new()),
            parent_children: Mutex::new(HashMap::new()),
            child_parent: Mutex::new(HashMap::new()),
            name_to_ids: Mutex::new(HashMap::new()),
            pending_state: Mutex::new(HashMap::new()),
            peer_queues: Mutex::new(HashMap::new()),
            resume_tx,
            event_handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        });
        (orchestrator, resume_rx)
    }

    pub async fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_handlers.lock().await.push(handler);
    }

    async fn emit_orchestration_event(&self, event: OrchestrationEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler.on_orchestration_event(&event).await;
        }
    }

    async fn emit_agent_event(&self, event: AgentEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler.on_agent_event(&event).await;
        }
    }

    /// Registers a new agent, optionally as a child of `parent_id`. Returns the assigned id.
    ///
    /// Ids are `{name}_{counter}`, playing the role of the source's `f"{name}_{id(agent)}"` —
    /// a Python object identity has no Rust equivalent, so a monotonic counter stands in for it.
    pub async fn register_agent(&self, name: &str, parent_id: Option<&str>) -> String {
        let id = format!("{name}_{}", self.next_id.fetch_add(1, Ordering::SeqCst));

        self.agents.lock().await.insert(
            id.clone(),
            AgentEntry {
                name: name.to_string(),
                status: AgentStatus::Idle,
                saved_state: None,
                result: None,
                completion: Arc::new(Notify::new()),
            },
        );
        self.name_to_ids.lock().await.entry(name.to_string()).or_default().push(id.clone());

        if let Some(parent_id) = parent_id {
            self.parent_children.lock().await.entry(parent_id.to_string()).or_default().push(id.clone());
            self.child_parent.lock().await.insert(id.clone(), parent_id.to_string());
        }

        self.emit_orchestration_event(OrchestrationEvent::AgentRegistered {
            agent_id: id.clone(),
            agent_name: name.to_string(),
            parent_id: parent_id.map(|s| s.to_string()),
        })
        .await;

        id
    }

    /// Registers `name` as a child of `parent_id` and marks it running — the bookkeeping half
    /// of launching a subagent. The caller is responsible for actually spawning the `tokio::task`
    /// that runs the child's runtime loop; this method only makes the relationship visible to
    /// the rest of the orchestrator (peer lookup, completion routing).
    pub async fn launch_subagent(&self, parent_id: &str, name: &str) -> String {
        let id = self.register_agent(name, Some(parent_id)).await;
        self.agents.lock().await.get_mut(&id).unwrap().status = AgentStatus::Running;
        id
    }

    pub async fn status(&self, id: &str) -> Option<AgentStatus> {
        self.agents.lock().await.get(id).map(|e| e.status)
    }

    pub async fn mark_running(&self, id: &str) {
        if let Some(entry) = self.agents.lock().await.get_mut(id) {
            entry.status = AgentStatus::Running;
        }
    }

    /// Saves a suspend snapshot for `id`, marks it suspended, and drains two distinct tables
    /// before deciding whether that suspend actually sticks: the pending-state FIFO (the race
    /// window before this snapshot existed) is drained *fully*, and the peer-queue FIFO (the
    /// steady-state mailbox for messages that arrived while `id` was running) is drained of
    /// exactly *one* envelope, so a busy-queued peer message becomes the resume trigger rather
    /// than starving behind the agent's own workload. If either drain produced anything, the
    /// merged state is handed straight to a resume instead of actually suspending.
    pub async fn save_state(&self, id: &str, mut state: AgentState) {
        if let Some(entry) = self.agents.lock().await.get_mut(id) {
            entry.status = AgentStatus::Suspended;
        }

        let parked: Vec<AgentMessage> = self.pending_state.lock().await.remove(id).unwrap_or_default().into_iter().collect();
        let peer_envelope: Option<AgentMessage> = self.peer_queues.lock().await.get_mut(id).and_then(|fifo| fifo.pop_front());

        if parked.is_empty() && peer_envelope.is_none() {
            self.agents.lock().await.get_mut(id).unwrap().saved_state = Some(state);
            return;
        }

        for message in parked {
            merge_into_state(&mut state, &message);
        }
        if let Some(message) = peer_envelope {
            merge_into_state(&mut state, &message);
        }
        // Parked/queued messages already triggered this resume; hand the merged state straight
        // back out rather than re-saving it only to immediately re-deliver it.
        self.agents.lock().await.get_mut(id).unwrap().status = AgentStatus::Running;
        let _ = self.resume_tx.send(ResumeSignal { agent_id: id.to_string(), state });
    }

    /// Delivers `message` to its `to_agent`. If that agent's suspend snapshot is present, the
    /// message is merged in and a [`ResumeSignal`] is emitted immediately. Otherwise the message
    /// is parked until `save_state` runs: peer messages go into that agent's peer-queue FIFO
    /// (drained one envelope per resume), while subagent completion/failure envelopes go into
    /// the pending-state FIFO (drained fully, since they close a race window rather than model a
    /// steady-state mailbox).
    async fn deliver(&self, message: AgentMessage) {
        let to_agent = message.to_agent.clone();
        let message_type = message_type_name(&message.kind).to_string();

        let mut agents = self.agents.lock().await;
        let Some(entry) = agents.get_mut(&to_agent) else {
            log::warn!("dropping message for unknown agent '{to_agent}'");
            return;
        };

        match entry.saved_state.take() {
            Some(mut state) => {
                merge_into_state(&mut state, &message);
                entry.status = AgentStatus::Running;
                drop(agents);
                self.emit_orchestration_event(OrchestrationEvent::MessageDelivered {
                    message_type,
                    to_agent: to_agent.clone(),
                })
                .await;
                let _ = self.resume_tx.send(ResumeSignal { agent_id: to_agent, state });
            }
            None => {
                drop(agents);
                let is_peer_message = matches!(message.kind, MessageKind::PeerMessage { .. });
                if is_peer_message {
                    self.peer_queues.lock().await.entry(to_agent.clone()).or_default().push_back(message);
                    self.emit_orchestration_event(OrchestrationEvent::MessageParkedPeerQueue { to_agent }).await;
                } else {
                    self.pending_state.lock().await.entry(to_agent.clone()).or_default().push_back(message);
                    self.emit_orchestration_event(OrchestrationEvent::MessageParkedPendingState { to_agent }).await;
                }
            }
        }
    }

    /// Sends a peer (sibling-to-sibling) message. Routed through [`Self::deliver`], which
    /// already implements the two cases a recipient can be in: suspended (merge the message into
    /// its saved state and resume it immediately) or still running (park the message in the
    /// peer-queue FIFO, to be picked up one envelope at a time as that agent resumes).
    pub async fn send_peer(&self, from_agent: &str, to_agent: &str, content: String) {
        let kind = MessageKind::PeerMessage { content };
        self.emit_orchestration_event(OrchestrationEvent::MessageSent {
            message_type: message_type_name(&kind).to_string(),
            from_agent: Some(from_agent.to_string()),
            to_agent: to_agent.to_string(),
            priority: kind.default_priority(),
        })
        .await;

        self.deliver(AgentMessage::new(kind, Some(from_agent.to_string()), to_agent)).await;
    }

    /// Marks `id` completed, fires its completion signal, and — if it has a parent — routes a
    /// `subagent_completed` envelope to that parent.
    pub async fn mark_completed(&self, id: &str, response: AgentResponse) {
        self.finish(id, response, true).await;
    }

    /// Marks `id` failed, fires its completion signal, and — if it has a parent — routes a
    /// `subagent_failed` envelope to that parent.
    pub async fn mark_failed(&self, id: &str, response: AgentResponse) {
        self.finish(id, response, false).await;
    }

    async fn finish(&self, id: &str, response: AgentResponse, success: bool) {
        let (name, completion) = {
            let mut agents = self.agents.lock().await;
            let Some(entry) = agents.get_mut(id) else { return };
            entry.status = if success { AgentStatus::Completed } else { AgentStatus::Failed };
            entry.result = Some(response.clone());
            (entry.name.clone(), entry.completion.clone())
        };
        completion.notify_waiters();

        self.emit_agent_event(if success {
            AgentEvent::AgentFinished {
                agent_id: id.to_string(),
                agent_name: name.clone(),
                iterations: response.iterations,
                response_length: response.content.len(),
            }
        } else {
            AgentEvent::AgentFailed {
                agent_id: id.to_string(),
                agent_name: name.clone(),
                error: response.content.clone(),
            }
        })
        .await;

        let parent_id = self.child_parent.lock().await.get(id).cloned();
        let Some(parent_id) = parent_id else { return };

        let kind = if success {
            MessageKind::SubagentCompleted { child_name: name, result: response.content }
        } else {
            MessageKind::SubagentFailed { child_name: name, error: response.content }
        };
        self.emit_orchestration_event(OrchestrationEvent::MessageSent {
            message_type: message_type_name(&kind).to_string(),
            from_agent: Some(id.to_string()),
            to_agent: parent_id.clone(),
            priority: kind.default_priority(),
        })
        .await;
        self.deliver(AgentMessage::new(kind, Some(id.to_string()), parent_id)).await;
    }

    /// Awaits `id`'s completion and returns its result. Idempotent: callers may await the same
    /// id any number of times after it has terminated and always get the same response, since
    /// the result is stored rather than consumed.
    pub async fn wait_for_completion(&self, id: &str) -> Option<AgentResponse> {
        loop {
            let (result, notify) = {
                let agents = self.agents.lock().await;
                let entry = agents.get(id)?;
                (entry.result.clone(), entry.completion.clone())
            };
            if let Some(result) = result {
                return Some(result);
            }
            notify.notified().await;
        }
    }

    /// Looks up an agent named `name` that is a *sibling* of `requester_id` — i.e. shares its
    /// parent. Cross-branch lookups intentionally return `None`.
    pub async fn find_agent_by_name(&self, name: &str, requester_id: &str) -> Option<String> {
        let requester_parent = self.child_parent.lock().await.get(requester_id).cloned()?;
        let candidates = self.name_to_ids.lock().await.get(name).cloned().unwrap_or_default();
        let child_parent = self.child_parent.lock().await;
        candidates.into_iter().find(|candidate_id| child_parent.get(candidate_id) == Some(&requester_parent))
    }

    pub async fn children_of(&self, parent_id: &str) -> Vec<String> {
        self.parent_children.lock().await.get(parent_id).cloned().unwrap_or_default()
    }

    /// Clears every table. Intended for test isolation between scenarios that would otherwise
    /// share one orchestrator instance.
    pub async fn reset(&self) {
        self.agents.lock().await.clear();
        self.parent_children.lock().await.clear();
        self.child_parent.lock().await.clear();
        self.name_to_ids.lock().await.clear();
        self.pending_state.lock().await.clear();
        self.peer_queues.lock().await.clear();
    }
}

fn message_type_name(kind: &MessageKind) -> &'static str {
    match kind {
        MessageKind::PeerMessage { .. } => "peer_message",
        MessageKind::SubagentCompleted { .. } => "subagent_completed",
        MessageKind::SubagentFailed { .. } => "subagent_failed",
    }
}

/// Applies one envelope's effect to a restored [`AgentState`], exactly as `_resume_agent` does
/// in the original source: peer messages append to the peer-message buffer; subagent
/// completions/failures move the named child out of `pending_subagents` and record its result.
fn merge_into_state(state: &mut AgentState, message: &AgentMessage) {
    match &message.kind {
        MessageKind::PeerMessage { content } => {
            state.peer_messages.push(PeerMessage {
                from_agent: message.from_agent.clone().unwrap_or_default(),
                content: content.clone(),
            });
        }
        MessageKind::SubagentCompleted { child_name, result } => {
            state.pending_subagents.remove(child_name);
            state.completed_results.insert(child_name.clone(), result.clone());
        }
        MessageKind::SubagentFailed { child_name, error } => {
            if let Some(mut launched) = state.pending_subagents.remove(child_name) {
                launched.status = AgentStatus::Failed;
                launched.error = Some(error.clone());
            }
            state.completed_results.insert(child_name.clone(), format!("[failed] {error}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentmesh::agent::LaunchedSubagent;

    #[tokio::test]
    async fn register_agent_tracks_parent_child_relationship() {
        let (orchestrator, _resume_rx) = Orchestrator::new();
        let parent = orchestrator.register_agent("parent", None).await;
        let child = orchestrator.register_agent("child", Some(&parent)).await;

        assert_eq!(orchestrator.children_of(&parent).await, vec![child.clone()]);
        assert_eq!(orchestrator.find_agent_by_name("child", &parent).await, None);
    }

    #[tokio::test]
    async fn find_agent_by_name_is_sibling_scoped() {
        let (orchestrator, _resume_rx) = Orchestrator::new();
        let parent = orchestrator.register_agent("parent", None).await;
        let a = orchestrator.register_agent("a", Some(&parent)).await;
        let _b = orchestrator.register_agent("b", Some(&parent)).await;
        let other_parent = orchestrator.register_agent("other_parent", None).await;
        let _c = orchestrator.register_agent("c", Some(&other_parent)).await;

        assert_eq!(orchestrator.find_agent_by_name("b", &a).await, Some(_b.clone()));
        assert_eq!(orchestrator.find_agent_by_name("c", &a).await, None);
    }

    #[tokio::test]
    async fn completion_wakes_parent_with_subagent_completed() {
        let (orchestrator, mut resume_rx) = Orchestrator::new();
        let parent = orchestrator.register_agent("parent", None).await;
        let child = orchestrator.register_agent("child", Some(&parent)).await;

        let mut parent_state = AgentState::new(parent.clone(), "parent task");
        parent_state.pending_subagents.insert(
            "child".to_string(),
            LaunchedSubagent {
                name: "child".to_string(),
                id: child.clone(),
                task: "child task".to_string(),
                status: AgentStatus::Running,
                result: None,
                error: None,
            },
        );
        orchestrator.save_state(&parent, parent_state).await;

        orchestrator
            .mark_completed(
                &child,
                AgentResponse {
                    content: "child done".to_string(),
                    iterations: 1,
                    success: true,
                },
            )
            .await;

        let signal = resume_rx.recv().await.unwrap();
        assert_eq!(signal.agent_id, parent);
        assert_eq!(signal.state.completed_results.get("child"), Some(&"child done".to_string()));
        assert!(!signal.state.pending_subagents.contains_key("child"));
    }

    #[tokio::test]
    async fn message_arriving_before_save_state_is_parked_then_merged() {
        let (orchestrator, mut resume_rx) = Orchestrator::new();
        let parent = orchestrator.register_agent("parent", None).await;
        let child = orchestrator.register_agent("child", Some(&parent)).await;

        // Child completes before the parent has saved its suspend state.
        orchestrator
            .mark_completed(
                &child,
                AgentResponse {
                    content: "fast child".to_string(),
                    iterations: 1,
                    success: true,
                },
            )
            .await;

        let mut parent_state = AgentState::new(parent.clone(), "parent task");
        parent_state.pending_subagents.insert(
            "child".to_string(),
            LaunchedSubagent {
                name: "child".to_string(),
                id: child.clone(),
                task: "child task".to_string(),
                status: AgentStatus::Running,
                result: None,
                error: None,
            },
        );
        orchestrator.save_state(&parent, parent_state).await;

        let signal = resume_rx.recv().await.unwrap();
        assert_eq!(signal.agent_id, parent);
        assert_eq!(signal.state.completed_results.get("child"), Some(&"fast child".to_string()));
    }

    #[tokio::test]
    async fn wait_for_completion_is_idempotent() {
        let (orchestrator, _resume_rx) = Orchestrator::new();
        let id = orchestrator.register_agent("solo", None).await;
        orchestrator
            .mark_completed(
                &id,
                AgentResponse {
                    content: "done".to_string(),
                    iterations: 1,
                    success: true,
                },
            )
            .await;

        let first = orchestrator.wait_for_completion(&id).await.unwrap();
        let second = orchestrator.wait_for_completion(&id).await.unwrap();
        assert_eq!(first.content, second.content);
    }

    #[tokio::test]
    async fn peer_message_parks_when_recipient_not_suspended_then_delivers_on_suspend() {
        let (orchestrator, mut resume_rx) = Orchestrator::new();
        let parent = orchestrator.register_agent("parent", None).await;
        let a = orchestrator.register_agent("a", Some(&parent)).await;
        let b = orchestrator.register_agent("b", Some(&parent)).await;
        orchestrator.mark_running(&b).await;

        orchestrator.send_peer(&a, &b, "hello".to_string()).await;
        assert!(resume_rx.try_recv().is_err());

        orchestrator.save_state(&b, AgentState::new(b.clone(), "b task")).await;

        let signal = resume_rx.recv().await.unwrap();
        assert_eq!(signal.agent_id, b);
        assert_eq!(signal.state.peer_messages.len(), 1);
        assert_eq!(signal.state.peer_messages[0].content, "hello");
    }

    #[tokio::test]
    async fn peer_message_delivers_immediately_when_recipient_already_suspended() {
        let (orchestrator, mut resume_rx) = Orchestrator::new();
        let parent = orchestrator.register_agent("parent", None).await;
        let a = orchestrator.register_agent("a", Some(&parent)).await;
        let b = orchestrator.register_agent("b", Some(&parent)).await;
        orchestrator.save_state(&b, AgentState::new(b.clone(), "b task")).await;

        orchestrator.send_peer(&a, &b, "hi".to_string()).await;

        let signal = resume_rx.recv().await.unwrap();
        assert_eq!(signal.agent_id, b);
        assert_eq!(signal.state.peer_messages[0].content, "hi");
    }

    #[tokio::test]
    async fn peer_queue_drains_one_envelope_per_resume_not_all_at_once() {
        let (orchestrator, mut resume_rx) = Orchestrator::new();
        let parent = orchestrator.register_agent("parent", None).await;
        let a = orchestrator.register_agent("a", Some(&parent)).await;
        let b = orchestrator.register_agent("b", Some(&parent)).await;
        orchestrator.mark_running(&b).await;

        orchestrator.send_peer(&a, &b, "first".to_string()).await;
        orchestrator.send_peer(&a, &b, "second".to_string()).await;
        orchestrator.send_peer(&a, &b, "third".to_string()).await;
        assert!(resume_rx.try_recv().is_err());

        orchestrator.save_state(&b, AgentState::new(b.clone(), "b task")).await;
        let first_resume = resume_rx.recv().await.unwrap();
        assert_eq!(first_resume.state.peer_messages.len(), 1);
        assert_eq!(first_resume.state.peer_messages[0].content, "first");

        orchestrator.save_state(&b, first_resume.state).await;
        let second_resume = resume_rx.recv().await.unwrap();
        assert_eq!(second_resume.state.peer_messages.len(), 2);
        assert_eq!(second_resume.state.peer_messages[1].content, "second");

        orchestrator.save_state(&b, second_resume.state).await;
        let third_resume = resume_rx.recv().await.unwrap();
        assert_eq!(third_resume.state.peer_messages.len(), 3);
        assert_eq!(third_resume.state.peer_messages[2].content, "third");
    }

    #[tokio::test]
    async fn completion_envelope_is_not_starved_by_peer_queue() {
        let (orchestrator, mut resume_rx) = Orchestrator::new();
        let parent = orchestrator.register_agent("parent", None).await;
        let a = orchestrator.register_agent("a", Some(&parent)).await;
        let b = orchestrator.register_agent("b", Some(&parent)).await;
        let grandchild = orchestrator.register_agent("grandchild", Some(&b)).await;
        orchestrator.mark_running(&b).await;

        orchestrator.send_peer(&a, &b, "chatter".to_string()).await;
        orchestrator
            .mark_completed(
                &grandchild,
                AgentResponse {
                    content: "grandchild done".to_string(),
                    iterations: 1,
                    success: true,
                },
            )
            .await;

        let mut b_state = AgentState::new(b.clone(), "b task");
        b_state.pending_subagents.insert(
            "grandchild".to_string(),
            LaunchedSubagent {
                name: "grandchild".to_string(),
                id: grandchild.clone(),
                task: "grandchild task".to_string(),
                status: AgentStatus::Running,
                result: None,
                error: None,
            },
        );
        orchestrator.save_state(&b, b_state).await;

        let signal = resume_rx.recv().await.unwrap();
        assert_eq!(signal.state.completed_results.get("grandchild"), Some(&"grandchild done".to_string()));
        assert_eq!(signal.state.peer_messages.len(), 1);
    }
}
