//! The compaction hook: a policy object consulted before each LLM call, independent of the
//! agent runtime loop.
//!
//! Grounded in the teacher's `ContextStrategy` trait (`should_compact` / `compact` / `name`)
//! and in the original source's `CompactionDetector` + `CompactionAgent` pair: detection is a
//! cheap synchronous token-threshold check, compaction itself is an async LLM call that
//! summarizes the old half of the history and splices it back in front of the protected
//! recent messages. Compaction failures are swallowed — a summarization hiccup must never
//! abort the agent's own task.

use crate::agentmesh::llm::LlmTransport;
use crate::agentmesh::message::{estimate_history_tokens, Message, Role};
use async_trait::async_trait;
use std::sync::Arc;

/// Minimum number of non-system, non-protected messages a history must contain before
/// compaction is considered worthwhile — compressing one or two turns doesn't recover enough
/// tokens to be worth an extra LLM round trip.
const MIN_OLD_MESSAGES: usize = 3;

/// A pluggable policy deciding when and how an agent's conversation history gets compacted.
///
/// Queried by the runtime immediately before building the next LLM prompt; the runtime does
/// not know or care how compaction is implemented.
#[async_trait]
pub trait ContextStrategy: Send + Sync {
    /// Returns true if `history` has grown enough to warrant compaction.
    fn should_compact(&self, history: &[Message]) -> bool;

    /// Attempts to compact `history`, returning the replacement history.
    ///
    /// Returns `None` on failure (and the runtime keeps the original history unchanged) per
    /// the "compaction failures are silent" behavior in the system this crate is modeled on.
    async fn compact(&self, history: &[Message]) -> Option<Vec<Message>>;

    fn name(&self) -> &'static str;
}

/// Never compacts. Used for short-lived agents or tests where history growth is bounded.
pub struct NoCompaction;

#[async_trait]
impl ContextStrategy for NoCompaction {
    fn should_compact(&self, _history: &[Message]) -> bool {
        false
    }

    async fn compact(&self, _history: &[Message]) -> Option<Vec<Message>> {
        None
    }

    fn name(&self) -> &'static str {
        "no_compaction"
    }
}

/// Summarizes the oldest messages in a history, preserving the system prompt (if one leads the
/// history) and a fixed number of the most recent messages untouched.
pub struct SummarizingCompaction {
    transport: Arc<dyn LlmTransport>,
    /// Context-window budget the history is measured against.
    context_limit_tokens: usize,
    /// Fraction of `context_limit_tokens` that triggers compaction.
    threshold: f64,
    /// Number of most recent messages that are never folded into the summary.
    protect_recent_messages: usize,
}

const COMPACTION_SYSTEM_PROMPT: &str = "You are a context compression assistant. Your job is to \
create BRIEF summaries of conversation history. Focus on information that would be helpful for \
continuing the conversation: what was done, what is in progress, and what comes next. Your \
summary MUST be significantly shorter than the original text. Use bullet points or short \
sentences and omit details unless critical.";

impl SummarizingCompaction {
    pub fn new(transport: Arc<dyn LlmTransport>, context_limit_tokens: usize, threshold: f64, protect_recent_messages: usize) -> Self {
        Self {
            transport,
            context_limit_tokens,
            threshold,
            protect_recent_messages,
        }
    }

    fn threshold_tokens(&self) -> usize {
        (self.context_limit_tokens as f64 * self.threshold) as usize
    }

    fn split_point(&self, history: &[Message]) -> Option<(usize, usize)> {
        let start_idx = if matches!(history.first(), Some(m) if m.role == Role::System) {
            1
        } else {
            0
        };
        if history.len() <= self.protect_recent_messages {
            return None;
        }
        let split_point = history.len().saturating_sub(self.protect_recent_messages);
        if split_point <= start_idx {
            return None;
        }
        Some((start_idx, split_point))
    }
}

#[async_trait]
impl ContextStrategy for SummarizingCompaction {
    fn should_compact(&self, history: &[Message]) -> bool {
        let current_tokens = estimate_history_tokens(history);
        if current_tokens < self.threshold_tokens() {
            return false;
        }
        match self.split_point(history) {
            Some((start_idx, split_point)) => (split_point - start_idx) >= MIN_OLD_MESSAGES,
            None => false,
        }
    }

    async fn compact(&self, history: &[Message]) -> Option<Vec<Message>> {
        let (start_idx, split_point) = self.split_point(history)?;
        let old_messages = &history[start_idx..split_point];
        let recent_messages = &history[split_point..];
        if old_messages.len() < MIN_OLD_MESSAGES {
            return None;
        }

        let transcript = old_messages
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content).to_uppercase())
            .collect::<Vec<_>>()
            .join("\n\n");
        let original_tokens = estimate_history_tokens(old_messages);
        let target_words = (original_tokens as f64 * 0.3).max(50.0) as usize;
        let prompt = format!(
            "Summarize the following conversation in AT MOST {target_words} words:\n\n{transcript}\n\n\
             IMPORTANT: your summary must be MUCH shorter than the original."
        );

        let summary = self
            .transport
            .chat(&prompt, Some(COMPACTION_SYSTEM_PROMPT))
            .await
            .ok()?;

        let mut compacted = Vec::with_capacity(recent_messages.len() + 2);
        if start_idx == 1 {
            compacted.push(history[0].clone());
        }
        compacted.push(Message::system(format!("[Previous conversation summary]\n\n{summary}")));
        compacted.extend_from_slice(recent_messages);

        if estimate_history_tokens(&compacted) >= original_tokens + estimate_history_tokens(recent_messages) {
            return None;
        }
        Some(compacted)
    }

    fn name(&self) -> &'static str {
        "summarizing_compaction"
    }
}
