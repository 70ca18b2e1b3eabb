//! Agent identity, templates, and the suspend/resume state snapshot.
//!
//! Grounded in the original source's `agent/schemas.py` dataclasses (`AgentStatus`,
//! `LaunchedSubagent`, `AgentState`) and in the teacher's `agent.rs` identity fields (id, name,
//! tools, llm session). Per the "templates vs instances" design decision recorded in
//! DESIGN.md, a parent holds lazy [`AgentTemplate`]s (name + config); launching a subagent
//! always instantiates a fresh [`Agent`] with a new id, never reuses one.

use crate::agentmesh::context_strategy::ContextStrategy;
use crate::agentmesh::llm::LlmTransport;
use crate::agentmesh::message::Message;
use crate::agentmesh::permissions::{AlwaysAllowHandler, PermissionHandler};
use crate::agentmesh::tool_protocol::ToolRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Where an agent is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Running,
    Suspended,
    Completed,
    Failed,
}

/// A child launched by an agent, tracked on the parent's side of the relationship.
#[derive(Debug, Clone)]
pub struct LaunchedSubagent {
    pub name: String,
    pub id: String,
    pub task: String,
    pub status: AgentStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// The full suspend snapshot for one agent: everything needed to resume its runtime loop in a
/// fresh `tokio::task` exactly where it left off.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub agent_id: String,
    pub task: String,
    pub iteration: usize,
    pub llm_history: Vec<Message>,
    pub launched_subagents: Vec<LaunchedSubagent>,
    /// Names of children still awaited, mapped to their launch record.
    pub pending_subagents: HashMap<String, LaunchedSubagent>,
    /// Results of children that have completed since the last resume, keyed by child name.
    pub completed_results: HashMap<String, String>,
    /// Peer messages received while suspended, FIFO order.
    pub peer_messages: Vec<PeerMessage>,
    /// Free-form bag for anything a particular deployment wants to carry across suspends.
    pub context: HashMap<String, serde_json::Value>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task: task.into(),
            iteration: 0,
            llm_history: Vec::new(),
            launched_subagents: Vec::new(),
            pending_subagents: HashMap::new(),
            completed_results: HashMap::new(),
            peer_messages: Vec::new(),
            context: HashMap::new(),
        }
    }
}

/// A message from a peer (sibling) agent, recorded on the recipient's state.
#[derive(Debug, Clone)]
pub struct PeerMessage {
    pub from_agent: String,
    pub content: String,
}

/// The final outcome of a completed agent run, handed back through the orchestrator's
/// completion signal.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub content: String,
    pub iterations: usize,
    pub success: bool,
}

/// A reusable, uninstantiated description of an agent: a name plus the configuration needed to
/// build a live [`Agent`] on demand. Parents hold a map of these for their declared subagent
/// roles; `launch_subagents` turns one into a fresh [`Agent`] with a brand new id every time.
#[derive(Clone)]
pub struct AgentTemplate {
    pub name: String,
    pub system_prompt: Option<String>,
    pub tool_names: Vec<String>,
    pub max_iterations: usize,
    pub subagent_templates: HashMap<String, AgentTemplate>,
    /// Names this agent's `send_message` action is allowed to address. `SendMessage` whose
    /// recipient isn't in this set is rejected before it ever reaches `Orchestrator::send_peer`.
    pub allowed_peers: Vec<String>,
}

impl AgentTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: None,
            tool_names: Vec::new(),
            max_iterations: 10,
            subagent_templates: HashMap::new(),
            allowed_peers: Vec::new(),
        }
    }
}

/// A live, runnable agent: identity plus the collaborators its runtime loop needs.
///
/// `tools` and `compaction` are shared (`Arc`) because sibling agents instantiated from the
/// same template may reasonably share a tool registry and compaction policy; `transport` is
/// shared for the same reason a single API client backs many conversations.
pub struct Agent {
    pub id: String,
    pub name: String,
    pub system_prompt: Option<String>,
    pub max_iterations: usize,
    pub transport: Arc<dyn LlmTransport>,
    pub tools: Arc<ToolRegistry>,
    pub compaction: Arc<dyn ContextStrategy>,
    pub subagent_templates: HashMap<String, AgentTemplate>,
    /// Governs tool-side permission requests raised through this agent's [`Context`]. Defaults to
    /// [`AlwaysAllowHandler`] via [`Agent::from_template`]; set
    /// [`Agent::with_permission_handler`] to restrict what the agent's tools may do.
    pub permission_handler: Arc<dyn PermissionHandler>,
    /// Names this agent may `send_message` to. Copied from the template at construction time;
    /// a `SendMessage` whose recipient isn't listed here is rejected by the runtime loop before
    /// any orchestrator lookup.
    pub allowed_peers: Vec<String>,
    /// Metadata shared across every [`Context`](crate::agentmesh::context::Context) built for
    /// this agent's tool calls. Allocated once here rather than per call, so a tool that sets a
    /// key on one turn can read it back on a later turn of the same agent.
    pub session_metadata: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl Agent {
    pub fn from_template(
        id: impl Into<String>,
        template: &AgentTemplate,
        transport: Arc<dyn LlmTransport>,
        tools: Arc<ToolRegistry>,
        compaction: Arc<dyn ContextStrategy>,
    ) -> Self {
        Self {
            id: id.into(),
            name: template.name.clone(),
            system_prompt: template.system_prompt.clone(),
            max_iterations: template.max_iterations,
            transport,
            tools,
            compaction,
            subagent_templates: template.subagent_templates.clone(),
            permission_handler: Arc::new(AlwaysAllowHandler),
            allowed_peers: template.allowed_peers.clone(),
            session_metadata: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_permission_handler(mut self, handler: Arc<dyn PermissionHandler>) -> Self {
        self.permission_handler = handler;
        self
    }
}
