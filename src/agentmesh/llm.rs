//! The transport boundary between an agent's runtime loop and whatever LLM backs it.
//!
//! [`LlmTransport`] is deliberately narrow compared to the teacher's `ClientWrapper`: the
//! runtime only ever needs "send this prompt, with this system prompt, get text back." Tool
//! schemas, streaming, and provider-specific wire formats belong to the adapter that implements
//! this trait, not to the runtime that consumes it.

use async_trait::async_trait;

/// A transport capable of turning a prompt into free-text model output.
///
/// Implementations wrap a concrete provider (OpenAI, DeepSeek, a local model, a test double).
/// The runtime treats the response as opaque text and hands it to
/// [`parser::parse_action`](crate::agentmesh::parser::parse_action).
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Sends `prompt` to the model, optionally scoped by a system prompt, and returns the
    /// model's raw text response.
    async fn chat(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;

    /// A human-readable model identifier, used in logs and events.
    fn model_name(&self) -> String;
}

/// A deterministic [`LlmTransport`] used by tests and examples: replays a fixed script of
/// responses in order, one per call, and panics (via a returned error) if the script runs dry.
///
/// Mirrors the `MockClient` pattern used in the teacher's own test suite: a vector of
/// canned replies behind a mutex, popped in call order.
pub struct ScriptedTransport {
    model: String,
    responses: tokio::sync::Mutex<std::collections::VecDeque<String>>,
}

impl ScriptedTransport {
    pub fn new(model: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            model: model.into(),
            responses: tokio::sync::Mutex::new(responses.into_iter().collect()),
        }
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn chat(
        &self,
        _prompt: &str,
        _system_prompt: Option<&str>,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let mut responses = self.responses.lock().await;
        responses
            .pop_front()
            .ok_or_else(|| "ScriptedTransport ran out of scripted responses".into())
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}
