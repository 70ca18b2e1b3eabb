//! The per-call [`Context`] handed to every tool invocation.
//!
//! Ported from the original source's `agent/context.py`: a `Context` bundles permission
//! checking, session-scoped metadata, an abort signal, conversation history access, and output
//! truncation behind one object so tools never need to reach into orchestrator internals.

use crate::agentmesh::permissions::{AlwaysAllowHandler, PermissionDeniedError, PermissionHandler, PermissionRequest};
use crate::agentmesh::truncation::{OutputTruncator, TruncationMetadata};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

/// Execution context passed to every [`Tool`](crate::agentmesh::tool_protocol::Tool) invocation.
pub struct Context {
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    pub agent_name: String,
    pub working_directory: String,

    permission_handler: Arc<dyn PermissionHandler>,
    abort: Arc<AbortSignal>,
    session_metadata: Arc<RwLock<HashMap<String, serde_json::Value>>>,
    truncator: Arc<OutputTruncator>,
}

impl Context {
    /// `session_metadata` is shared, not owned: it's the same map across every tool call made
    /// for a given session id, so one call's `set_session_metadata` is visible to the next. The
    /// caller (typically [`Agent`](crate::agentmesh::agent::Agent)) owns the `Arc` and hands the
    /// same clone to every `Context` it builds for that session.
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        agent_name: impl Into<String>,
        working_directory: impl Into<String>,
        permission_handler: Arc<dyn PermissionHandler>,
        session_metadata: Arc<RwLock<HashMap<String, serde_json::Value>>>,
        truncator: Arc<OutputTruncator>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            call_id: uuid::Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            working_directory: working_directory.into(),
            permission_handler,
            abort: Arc::new(AbortSignal::new()),
            session_metadata,
            truncator,
        }
    }

    /// Builds a `Context` with its own private, single-use metadata map. Suitable for tests and
    /// one-off calls that have no session to share state across; real runtime call sites should
    /// use [`Self::new`] with a metadata map owned by the agent.
    pub fn with_defaults(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> std::io::Result<Self> {
        Ok(Self::new(
            session_id,
            message_id,
            agent_name,
            ".",
            Arc::new(AlwaysAllowHandler),
            Arc::new(RwLock::new(HashMap::new())),
            Arc::new(OutputTruncator::with_defaults()?),
        ))
    }

    /// Requests permission for `request`, returning an error if denied.
    pub async fn ask(&self, request: PermissionRequest) -> Result<(), PermissionDeniedError> {
        if self.permission_handler.request_permission(&request).await {
            Ok(())
        } else {
            Err(PermissionDeniedError {
                request,
                reason: "permission denied".to_string(),
            })
        }
    }

    pub fn abort_signal(&self) -> Arc<AbortSignal> {
        self.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_set()
    }

    pub fn check_abort(&self) -> Result<(), String> {
        if self.is_aborted() {
            Err(format!(
                "operation aborted: {}",
                self.abort.reason().unwrap_or_else(|| "aborted".to_string())
            ))
        } else {
            Ok(())
        }
    }

    pub fn get_session_metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.session_metadata.read().unwrap().get(key).cloned()
    }

    pub fn set_session_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        self.session_metadata.write().unwrap().insert(key.into(), value);
    }

    pub fn all_metadata(&self) -> HashMap<String, serde_json::Value> {
        self.session_metadata.read().unwrap().clone()
    }

    /// Truncates `output` per this context's configured limits, tagged with `call_context`.
    pub fn truncate_output(&self, output: &str, call_context: &str) -> (String, TruncationMetadata) {
        self.truncator.truncate(output, &self.call_id, call_context)
    }
}

/// A one-shot, broadcastable cancellation flag. Once set, stays set: any number of waiters may
/// subscribe, and late subscribers see the signal immediately.
pub struct AbortSignal {
    flag: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            reason: RwLock::new(None),
            notify: Notify::new(),
        }
    }

    pub fn abort(&self, reason: Option<String>) {
        *self.reason.write().unwrap() = Some(reason.unwrap_or_else(|| "operation aborted".to_string()));
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.read().unwrap().clone()
    }

    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}
