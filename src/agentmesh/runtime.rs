//! The agent runtime loop: the part of the system that actually drives one agent from a task
//! to a finished or suspended state, one LLM turn at a time.
//!
//! Grounded in the original source's `agent/agent.py` main loop (`run` / `_run_iteration`):
//! build a prompt from task + history + pending observations, consult the compaction hook,
//! call the LLM, parse its response with a bounded number of correction retries, dispatch the
//! resulting action, and either continue iterating, suspend (persisting state through the
//! [`Orchestrator`]), or terminate.

use crate::agentmesh::agent::{Agent, AgentResponse, AgentState, LaunchedSubagent};
use crate::agentmesh::context::Context;
use crate::agentmesh::event::{AgentEvent, EventHandler};
use crate::agentmesh::llm_session::render_transcript;
use crate::agentmesh::message::Message;
use crate::agentmesh::orchestrator::{Orchestrator, ResumeSignal};
use crate::agentmesh::parser::{format_instruction, parse_action, Action};
use crate::agentmesh::truncation::OutputTruncator;
use crate::agentmesh::tool_protocol::ToolResult;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How many times the runtime will ask the LLM to correct a malformed response before giving
/// up and failing the agent.
pub const MAX_PARSE_RETRIES: usize = 2;

/// Owns the live `{id -> Agent}` table and drives every agent's runtime loop.
///
/// Split from [`Orchestrator`] because the orchestrator only ever needs to reason about ids,
/// names, and [`AgentState`] snapshots — it has no business knowing about `LlmTransport`s or
/// tool registries. The runtime is the layer that actually owns live [`Agent`] objects and
/// turns a [`ResumeSignal`] back into a running `tokio` task.
pub struct Runtime {
    orchestrator: Arc<Orchestrator>,
    agents: tokio::sync::Mutex<std::collections::HashMap<String, Arc<Agent>>>,
    event_handlers: tokio::sync::Mutex<Vec<Arc<dyn EventHandler>>>,
}

impl Runtime {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            agents: tokio::sync::Mutex::new(std::collections::HashMap::new()),
            event_handlers: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub async fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_handlers.lock().await.push(handler);
    }

    async fn emit(&self, event: AgentEvent) {
        for handler in self.event_handlers.lock().await.iter() {
            handler.on_agent_event(&event).await;
        }
    }

    /// Registers a root agent (no parent), stores it for later resume lookups, and spawns its
    /// runtime loop. Returns the id immediately; the caller awaits completion separately via
    /// [`Orchestrator::wait_for_completion`].
    pub async fn launch_root(self: &Arc<Self>, name: &str, agent_blueprint: impl FnOnce(String) -> Agent, task: impl Into<String>) -> String {
        let id = self.orchestrator.register_agent(name, None).await;
        let agent = Arc::new(agent_blueprint(id.clone()));
        self.agents.lock().await.insert(id.clone(), agent.clone());
        let state = AgentState::new(id.clone(), task.into());
        let runtime = Arc::clone(self);
        eprintln!("[dbg] launch_root spawning id={}", id);
        tokio::spawn(async move { runtime.run(agent, state).await });
        id
    }

    /// Consumes resume signals from the orchestrator forever, spawning a fresh runtime-loop
    /// task for each one. Intended to be spawned once, for the lifetime of the process (or
    /// test), alongside whatever drives root agent launches.
    pub async fn drive(self: Arc<Self>, mut resume_rx: mpsc::UnboundedReceiver<ResumeSignal>) {
        while let Some(signal) = resume_rx.recv().await {
            eprintln!("[dbg] drive resuming {}", signal.agent_id);
            let Some(agent) = self.agents.lock().await.get(&signal.agent_id).cloned() else {
                log::warn!("resume signal for unknown agent '{}'", signal.agent_id);
                continue;
            };
            let runtime = Arc::clone(&self);
            tokio::spawn(async move { runtime.run(agent, signal.state).await });
        }
    }

    /// Runs (or resumes) one agent until it finishes, fails, or suspends again.
    ///
    /// Returns a manually-boxed future (instead of `async fn`) because this loop spawns further
    /// calls to itself for subagents via [`Self::launch_subagents`]; that self-recursion through
    /// `tokio::spawn` defeats the compiler's auto-trait inference for `Send` unless the
    /// recursive edge is erased behind a `dyn Future`.
    fn run(self: Arc<Self>, agent: Arc<Agent>, mut state: AgentState) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
        eprintln!("[dbg] run start {} iter={}", agent.id, state.iteration);
        self.orchestrator.mark_running(&agent.id).await;
        self.emit(AgentEvent::AgentStarted {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            task_preview: preview(&state.task),
        })
        .await;

        loop {
            if state.iteration >= agent.max_iterations {
                self.finish_with_forced_summary(&agent, &mut state).await;
                return;
            }
            state.iteration += 1;
            self.emit(AgentEvent::IterationStarted {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                iteration: state.iteration,
            })
            .await;

            if let Some(observation) = self.fold_observations(&agent, &mut state).await {
                state.llm_history.push(Message::user(observation));
            }

            if agent.compaction.should_compact(&state.llm_history) {
                if let Some(compacted) = agent.compaction.compact(&state.llm_history).await {
                    state.llm_history = compacted;
                }
            }

            let prompt = build_prompt(&state);
            let action = match self.request_action(&agent, &mut state, prompt).await {
                Ok(action) => action,
                Err(error) => {
                    let response = AgentResponse {
                        content: format!("runtime error: {error}"),
                        iterations: state.iteration,
                        success: false,
                    };
                    self.orchestrator.mark_failed(&agent.id, response).await;
                    return;
                }
            };

            self.emit(AgentEvent::IterationCompleted {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                iteration: state.iteration,
            })
            .await;

            match action {
                Action::Tool { tool, arguments, .. } => {
                    self.run_tool(&agent, &mut state, tool, arguments).await;
                }
                Action::LaunchSubagents { agents, tasks, .. } => {
                    self.launch_subagents(&agent, &mut state, agents, tasks).await;
                }
                Action::Wait { .. } => {
                    if state.pending_subagents.is_empty() {
                        log::warn!(
                            "agent '{}' ({}) waited with no pending subagents; it will only resume if a peer message arrives",
                            agent.name,
                            agent.id
                        );
                    }
                    self.emit(AgentEvent::AgentSuspended {
                        agent_id: agent.id.clone(),
                        agent_name: agent.name.clone(),
                        reason: "waiting for subagents or a peer message".to_string(),
                    })
                    .await;
                    eprintln!("[dbg] save_state (wait) {}", agent.id);
                    self.orchestrator.save_state(&agent.id, state).await;
                    return;
                }
                Action::SendMessage { recipient, message, .. } => {
                    if !agent.allowed_peers.iter().any(|peer| peer == &recipient) {
                        state.llm_history.push(Message::user(format!(
                            "'{recipient}' is not in your allowed_peers; the message was not sent."
                        )));
                        continue;
                    }
                    match self.orchestrator.find_agent_by_name(&recipient, &agent.id).await {
                        Some(target_id) => {
                            self.orchestrator.send_peer(&agent.id, &target_id, message).await;
                        }
                        None => {
                            state.llm_history.push(Message::user(format!(
                                "No peer agent named '{recipient}' exists among your siblings; the message was not sent."
                            )));
                            continue;
                        }
                    }
                    self.emit(AgentEvent::AgentSuspended {
                        agent_id: agent.id.clone(),
                        agent_name: agent.name.clone(),
                        reason: format!("sent a message to '{recipient}'"),
                    })
                    .await;
                    self.orchestrator.save_state(&agent.id, state).await;
                    return;
                }
                Action::Finish { content, .. } => {
                    let response = AgentResponse {
                        content,
                        iterations: state.iteration,
                        success: true,
                    };
                    self.orchestrator.mark_completed(&agent.id, response).await;
                    return;
                }
            }
        }
        })
    }

    /// Forces one extra, unparsed LLM turn once an agent has exhausted its iteration budget
    /// without calling `finish`, and reports its reply as the agent's (successful) result. This
    /// is the only LLM call in the runtime that doesn't go through [`Self::request_action`] —
    /// there is no action to parse, just a final answer.
    async fn finish_with_forced_summary(&self, agent: &Agent, state: &mut AgentState) {
        let prompt = format!(
            "You have reached the maximum of {} iterations for task \"{}\" without calling finish. \
             Write your final summary and best answer now as plain text; do not use the Action format.",
            agent.max_iterations, state.task
        );

        self.emit(AgentEvent::LlmRequestStarted {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            iteration: state.iteration,
        })
        .await;

        let response = match agent.transport.chat(&prompt, agent.system_prompt.as_deref()).await {
            Ok(content) => {
                self.emit(AgentEvent::LlmRequestCompleted {
                    agent_id: agent.id.clone(),
                    agent_name: agent.name.clone(),
                    iteration: state.iteration,
                    response_length: content.len(),
                })
                .await;
                AgentResponse {
                    content,
                    iterations: state.iteration,
                    success: true,
                }
            }
            Err(error) => AgentResponse {
                content: format!(
                    "stopped after reaching the maximum of {} iterations and failed to produce a final summary: {error}",
                    agent.max_iterations
                ),
                iterations: state.iteration,
                success: false,
            },
        };

        if response.success {
            self.orchestrator.mark_completed(&agent.id, response).await;
        } else {
            self.orchestrator.mark_failed(&agent.id, response).await;
        }
    }

    /// Sends `prompt`, parses the reply, and retries with a correction prompt up to
    /// [`MAX_PARSE_RETRIES`] times before giving up.
    async fn request_action(
        &self,
        agent: &Agent,
        state: &mut AgentState,
        mut prompt: String,
    ) -> Result<Action, Box<dyn Error + Send + Sync>> {
        for attempt in 0..=MAX_PARSE_RETRIES {
            self.emit(AgentEvent::LlmRequestStarted {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                iteration: state.iteration,
            })
            .await;

            let reply = agent.transport.chat(&prompt, agent.system_prompt.as_deref()).await?;
            self.emit(AgentEvent::LlmRequestCompleted {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                iteration: state.iteration,
                response_length: reply.len(),
            })
            .await;
            state.llm_history.push(Message::assistant(reply.clone()));

            match parse_action(&reply) {
                Ok(action) => {
                    self.emit(AgentEvent::ParseSucceeded {
                        agent_id: agent.id.clone(),
                        agent_name: agent.name.clone(),
                        iteration: state.iteration,
                    })
                    .await;
                    return Ok(action);
                }
                Err(parse_error) => {
                    self.emit(AgentEvent::ParseFailed {
                        agent_id: agent.id.clone(),
                        agent_name: agent.name.clone(),
                        iteration: state.iteration,
                        error: parse_error.0.clone(),
                        attempt,
                    })
                    .await;
                    prompt = format!(
                        "Your previous response could not be parsed: {}\n\n{}",
                        parse_error.0,
                        format_instruction()
                    );
                }
            }
        }
        Err(format!("gave up after {MAX_PARSE_RETRIES} failed attempts to parse a valid action").into())
    }

    async fn run_tool(&self, agent: &Agent, state: &mut AgentState, tool: String, arguments: serde_json::Value) {
        self.emit(AgentEvent::ToolCallStarted {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            tool_name: tool.clone(),
            arguments: arguments.clone(),
        })
        .await;

        let truncator = match OutputTruncator::with_defaults() {
            Ok(truncator) => Arc::new(truncator),
            Err(error) => {
                state.llm_history.push(Message::user(format!("Tool '{tool}' could not run: failed to build call context: {error}")));
                return;
            }
        };
        let context = Context::new(
            agent.id.clone(),
            state.iteration.to_string(),
            agent.name.clone(),
            ".",
            agent.permission_handler.clone(),
            agent.session_metadata.clone(),
            truncator,
        );

        let (result, truncated_rendering) = agent.tools.dispatch(&tool, arguments, &context).await;
        self.emit(AgentEvent::ToolCallCompleted {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            tool_name: tool.clone(),
            success: result.success,
            error: result.error.clone(),
        })
        .await;
        state.llm_history.push(Message::user(format!(
            "Tool '{tool}' result:\n{}",
            render_tool_result(&result, truncated_rendering)
        )));
    }

    async fn launch_subagents(self: &Arc<Self>, agent: &Arc<Agent>, state: &mut AgentState, names: Vec<String>, tasks: Vec<String>) {
        let mut launched_names = Vec::with_capacity(names.len());

        for (name, task) in names.into_iter().zip(tasks.into_iter()) {
            let Some(template) = agent.subagent_templates.get(&name).cloned() else {
                state
                    .llm_history
                    .push(Message::user(format!("Cannot launch subagent '{name}': no such subagent template is declared.")));
                continue;
            };

            let child_id = self.orchestrator.launch_subagent(&agent.id, &name).await;
            let child_agent = Arc::new(
                Agent::from_template(
                    child_id.clone(),
                    &template,
                    agent.transport.clone(),
                    agent.tools.clone(),
                    agent.compaction.clone(),
                )
                .with_permission_handler(agent.permission_handler.clone()),
            );
            self.agents.lock().await.insert(child_id.clone(), child_agent.clone());

            let launched = LaunchedSubagent {
                name: name.clone(),
                id: child_id.clone(),
                task: task.clone(),
                status: crate::agentmesh::agent::AgentStatus::Running,
                result: None,
                error: None,
            };
            state.launched_subagents.push(launched.clone());
            state.pending_subagents.insert(name.clone(), launched);
            launched_names.push(name);

            let child_state = AgentState::new(child_id, task);
            let runtime = Arc::clone(self);
            tokio::spawn(async move { runtime.run(child_agent, child_state).await });
        }

        if !launched_names.is_empty() {
            self.emit(AgentEvent::SubagentsLaunched {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                child_names: launched_names,
            })
            .await;
        }
    }

    /// Drains `state`'s completed-subagent and peer-message buffers into a single observation
    /// string folded into the next prompt, firing a [`AgentEvent::SubagentResolved`] for each
    /// resolved child along the way.
    async fn fold_observations(&self, agent: &Agent, state: &mut AgentState) -> Option<String> {
        let mut lines = Vec::new();

        for (child_name, result) in state.completed_results.drain().collect::<Vec<_>>() {
            let success = !result.starts_with("[failed]");
            self.emit(AgentEvent::SubagentResolved {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                child_name: child_name.clone(),
                success,
            })
            .await;
            lines.push(format!("Subagent '{child_name}' {}: {result}", if success { "completed" } else { "failed" }));
        }

        for message in state.peer_messages.drain(..) {
            lines.push(format!("Message from '{}': {}", message.from_agent, message.content));
        }

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

fn build_prompt(state: &AgentState) -> String {
    let mut parts = vec![format!("Task: {}", state.task)];
    if !state.llm_history.is_empty() {
        parts.push(render_transcript(&state.llm_history));
    }
    parts.push(format_instruction().to_string());
    parts.join("\n\n")
}

fn render_tool_result(result: &ToolResult, truncated_rendering: Option<String>) -> String {
    if let Some(truncated) = truncated_rendering {
        return truncated;
    }
    if result.success {
        match &result.output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    } else {
        format!("error: {}", result.error.clone().unwrap_or_default())
    }
}

fn preview(task: &str) -> String {
    const MAX_CHARS: usize = 80;
    if task.chars().count() <= MAX_CHARS {
        task.to_string()
    } else {
        format!("{}...", task.chars().take(MAX_CHARS).collect::<String>())
    }
}
