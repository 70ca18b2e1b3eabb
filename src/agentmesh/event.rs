//! Agent and orchestration event system: a callback-based observability layer running
//! alongside (not instead of) the `log` crate's structured logging.
//!
//! Architecture mirrors the teacher's `event.rs`: one [`EventHandler`] trait with two methods,
//! both defaulting to no-ops, so a handler can subscribe to only the events it cares about.
//! `on_agent_event` reports what a single agent did; `on_orchestration_event` reports bus and
//! scheduling activity that spans agents. The variant set itself is grounded in the original
//! source's `agent/callbacks.py` method list (on_agent_start, on_iteration_start,
//! on_llm_request/response, on_parse_success/error, on_tool_call/result, on_subagent_call).
//!
//! # Example
//!
//! ```rust,no_run
//! use agentmesh::agentmesh::event::{AgentEvent, EventHandler, OrchestrationEvent};
//! use async_trait::async_trait;
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl EventHandler for Logger {
//!     async fn on_agent_event(&self, event: &AgentEvent) {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

use async_trait::async_trait;

/// Events emitted by a single agent during its run/resume lifecycle.
///
/// Every variant carries `agent_id` and `agent_name` so a handler can attribute events without
/// keeping external state.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Fired when an agent begins executing a task, whether freshly launched or resumed.
    AgentStarted {
        agent_id: String,
        agent_name: String,
        task_preview: String,
    },

    /// Fired at the top of each iteration of the runtime loop.
    IterationStarted { agent_id: String, agent_name: String, iteration: usize },

    /// Fired when an iteration completes (an action was dispatched).
    IterationCompleted { agent_id: String, agent_name: String, iteration: usize },

    /// Fired immediately before sending a prompt to the LLM.
    LlmRequestStarted { agent_id: String, agent_name: String, iteration: usize },

    /// Fired after the LLM responds.
    LlmRequestCompleted {
        agent_id: String,
        agent_name: String,
        iteration: usize,
        response_length: usize,
    },

    /// The LLM's free-text response parsed into a valid [`Action`](crate::agentmesh::parser::Action).
    ParseSucceeded { agent_id: String, agent_name: String, iteration: usize },

    /// Parsing the LLM's response failed; the runtime will retry with a correction prompt.
    ParseFailed {
        agent_id: String,
        agent_name: String,
        iteration: usize,
        error: String,
        attempt: usize,
    },

    /// A tool call was dispatched.
    ToolCallStarted {
        agent_id: String,
        agent_name: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// A tool call finished (success or failure).
    ToolCallCompleted {
        agent_id: String,
        agent_name: String,
        tool_name: String,
        success: bool,
        error: Option<String>,
    },

    /// One or more subagents were launched.
    SubagentsLaunched {
        agent_id: String,
        agent_name: String,
        child_names: Vec<String>,
    },

    /// A subagent finished, successfully or not, and its result was recorded against the
    /// parent's pending set.
    SubagentResolved {
        agent_id: String,
        agent_name: String,
        child_name: String,
        success: bool,
    },

    /// The agent suspended itself (waiting on subagents or a peer message).
    AgentSuspended { agent_id: String, agent_name: String, reason: String },

    /// The agent finished successfully.
    AgentFinished {
        agent_id: String,
        agent_name: String,
        iterations: usize,
        response_length: usize,
    },

    /// The agent terminated with an unrecoverable error.
    AgentFailed { agent_id: String, agent_name: String, error: String },
}

/// Events emitted by the [`Orchestrator`](crate::agentmesh::orchestrator::Orchestrator) and
/// [`MessageBus`](crate::agentmesh::message_bus::MessageBus) that span more than one agent.
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    /// A new agent was registered with the orchestrator.
    AgentRegistered { agent_id: String, agent_name: String, parent_id: Option<String> },

    /// A message was enqueued onto the bus.
    MessageSent {
        message_type: String,
        from_agent: Option<String>,
        to_agent: String,
        priority: i32,
    },

    /// A message was delivered to its destination agent (i.e. the agent was resumed with it).
    MessageDelivered { message_type: String, to_agent: String },

    /// A message arrived for an agent whose suspended state had not yet been persisted; it was
    /// parked in the pending-state table instead of being dropped.
    MessageParkedPendingState { to_agent: String },

    /// A peer message arrived for an agent that is running (not yet suspended); it was parked in
    /// that agent's peer-queue FIFO, to be drained one envelope at a time on its next resume.
    MessageParkedPeerQueue { to_agent: String },
}

/// Receives [`AgentEvent`]s and [`OrchestrationEvent`]s. Both methods default to no-ops.
///
/// Implementations are shared via `Arc<dyn EventHandler>` across agents and the orchestrator;
/// internal state must be `Send + Sync`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_agent_event(&self, _event: &AgentEvent) {}
    async fn on_orchestration_event(&self, _event: &OrchestrationEvent) {}
}

/// An [`EventHandler`] that logs every event via the `log` crate at debug level. Useful as a
/// default when no application-specific observer is registered.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_agent_event(&self, event: &AgentEvent) {
        log::debug!("agent event: {event:?}");
    }

    async fn on_orchestration_event(&self, event: &OrchestrationEvent) {
        log::debug!("orchestration event: {event:?}");
    }
}
