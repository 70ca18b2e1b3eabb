//! Per-agent conversation bookkeeping layered on top of an [`LlmTransport`].
//!
//! `LlmSession` owns the running `llm_history` that gets carried across suspend/resume
//! boundaries inside [`AgentState`](crate::agentmesh::agent::AgentState). It keeps the teacher's
//! token-budget trimming logic but drops the "send with a temporarily-prepended system prompt"
//! dance: the transport takes the system prompt as a separate argument, so the history never
//! needs a splice.

use crate::agentmesh::llm::LlmTransport;
use crate::agentmesh::message::{estimate_history_tokens, estimate_message_tokens, Message, Role};
use std::sync::Arc;

/// Wraps an [`LlmTransport`] with a bounded conversation history.
///
/// `max_history_tokens` is a soft cap: once the estimated token cost of `history` exceeds it,
/// the oldest messages are evicted before the next call. This is a last-resort safety valve
/// independent of the compaction hook in [`context_strategy`](crate::agentmesh::context_strategy) —
/// compaction summarizes, this just drops.
pub struct LlmSession {
    transport: Arc<dyn LlmTransport>,
    system_prompt: Option<String>,
    history: Vec<Message>,
    max_history_tokens: usize,
}

impl LlmSession {
    pub fn new(transport: Arc<dyn LlmTransport>, system_prompt: Option<String>, max_history_tokens: usize) -> Self {
        Self {
            transport,
            system_prompt,
            history: Vec::new(),
            max_history_tokens,
        }
    }

    /// Restores a session's history, e.g. after resuming a suspended agent.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn set_history(&mut self, history: Vec<Message>) {
        self.history = history;
    }

    pub fn set_system_prompt(&mut self, prompt: Option<String>) {
        self.system_prompt = prompt;
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_history_tokens(&self.history)
    }

    /// Sends `content` as a user turn, appends the assistant's reply, and returns it.
    ///
    /// The full history (sans system prompt, which travels out-of-band) is not replayed to the
    /// transport on every call: this crate's transports are single-shot prompt-in/text-out, so
    /// the runtime is responsible for folding prior turns into the prompt it builds. This method
    /// only owns the bookkeeping side of that exchange.
    pub async fn send(&mut self, content: String) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        let user_message = Message::user(content.clone());
        self.history.push(user_message);

        let reply = self
            .transport
            .chat(&content, self.system_prompt.as_deref())
            .await?;
        let assistant_message = Message::assistant(reply);
        self.history.push(assistant_message.clone());

        self.trim_to_budget();
        Ok(assistant_message)
    }

    /// Evicts the oldest messages until the history fits inside `max_history_tokens`.
    fn trim_to_budget(&mut self) {
        let mut total: usize = self.history.iter().map(estimate_message_tokens).sum();
        while total > self.max_history_tokens && !self.history.is_empty() {
            let removed = self.history.remove(0);
            total -= estimate_message_tokens(&removed);
        }
    }
}

/// Renders a history as a flat transcript suitable for folding into a single prompt string,
/// since this crate's [`LlmTransport`] takes one prompt rather than a message array.
pub fn render_transcript(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| {
            let tag = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{tag}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
