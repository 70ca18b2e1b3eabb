//! Conversation primitives shared by the LLM transport, the session history kept in
//! [`AgentState`](crate::agentmesh::agent::AgentState), and the compaction policy.
//!
//! These types deliberately stay provider-agnostic: a [`Message`] is just a role-tagged
//! string plus a timestamp, the same shape every transport in this crate's lineage converges
//! on once you strip away vendor-specific wire formats.

use chrono::{DateTime, Utc};

/// The author of a [`Message`] inside an agent's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Primes or constrains the assistant's behavior for the remainder of the session.
    System,
    /// A message sent to the LLM: the task, an observation, or a retry prompt.
    User,
    /// A response returned by the LLM.
    Assistant,
}

/// A single turn in an agent's conversation with its LLM.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Estimates the number of tokens in a string.
///
/// Uses the same rough heuristic as the teacher's session bookkeeping (one token per
/// four characters): cheap, provider-agnostic, and good enough to decide *when* to
/// compact without depending on a concrete tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Estimates the token cost of a single message, including a fixed per-turn overhead
/// for its role tag.
pub fn estimate_message_tokens(message: &Message) -> usize {
    const ROLE_OVERHEAD: usize = 4;
    ROLE_OVERHEAD + estimate_tokens(&message.content)
}

/// Estimates the total token cost of a conversation history.
pub fn estimate_history_tokens(history: &[Message]) -> usize {
    history.iter().map(estimate_message_tokens).sum()
}
