//! The permission system gating potentially dangerous tool operations.
//!
//! Ported from the original source's `agent/permissions.py`: every tool invocation that
//! touches the filesystem, network, or a shell is expected to route through a
//! [`PermissionHandler`] before acting. The four handlers here (always-allow, always-deny,
//! pattern-based auto-approve with fallback, interactive) mirror that module's handler set;
//! `InteractiveHandler` falls back to denial instead of blocking on stdin, since this runtime
//! has no synchronous console loop to block on from inside an async agent.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The category of operation a tool is asking permission to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    Bash,
    Read,
    Write,
    Delete,
    Network,
    WebFetch,
    Question,
    Execute,
    Todo,
}

impl std::fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PermissionKind::Bash => "bash",
            PermissionKind::Read => "read",
            PermissionKind::Write => "write",
            PermissionKind::Delete => "delete",
            PermissionKind::Network => "network",
            PermissionKind::WebFetch => "webfetch",
            PermissionKind::Question => "question",
            PermissionKind::Execute => "execute",
            PermissionKind::Todo => "todo",
        };
        f.write_str(s)
    }
}

/// A request for permission to perform one operation.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub permission: PermissionKind,
    /// File paths, commands, or URLs being accessed by this operation.
    pub patterns: Vec<String>,
    /// Patterns pre-approved by the caller (e.g. from user config), checked before delegating
    /// to a handler.
    pub always: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub description: Option<String>,
}

impl PermissionRequest {
    pub fn new(permission: PermissionKind, patterns: Vec<String>) -> Self {
        Self {
            permission,
            patterns,
            always: Vec::new(),
            metadata: HashMap::new(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn matches_always_patterns(&self, pattern: &str) -> bool {
        self.always.iter().any(|always| glob_match(always, pattern))
    }

    /// True if every requested pattern matches at least one pre-approved pattern.
    pub fn should_auto_approve(&self) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        self.patterns.iter().all(|p| self.matches_always_patterns(p))
    }
}

/// Raised (returned as an error) when a permission request is denied.
#[derive(Debug)]
pub struct PermissionDeniedError {
    pub request: PermissionRequest,
    pub reason: String,
}

impl std::fmt::Display for PermissionDeniedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} for {:?}",
            self.reason, self.request.permission, self.request.patterns
        )
    }
}

impl std::error::Error for PermissionDeniedError {}

/// Decides whether a [`PermissionRequest`] is approved.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    async fn request_permission(&self, request: &PermissionRequest) -> bool;
}

/// Approves everything. Unsafe outside of tests or fully trusted environments.
pub struct AlwaysAllowHandler;

#[async_trait]
impl PermissionHandler for AlwaysAllowHandler {
    async fn request_permission(&self, _request: &PermissionRequest) -> bool {
        true
    }
}

/// Denies everything. Useful for read-only or audit-mode runs.
pub struct AlwaysDenyHandler;

#[async_trait]
impl PermissionHandler for AlwaysDenyHandler {
    async fn request_permission(&self, _request: &PermissionRequest) -> bool {
        false
    }
}

/// Approves requests whose patterns all match a configured allow-list, delegating to a
/// fallback handler (denying by default if none is set) when nothing matches.
pub struct AutoApproveHandler {
    patterns: HashMap<PermissionKind, Vec<String>>,
    fallback: Option<Box<dyn PermissionHandler>>,
}

impl AutoApproveHandler {
    pub fn new(fallback: Option<Box<dyn PermissionHandler>>) -> Self {
        Self {
            patterns: HashMap::new(),
            fallback,
        }
    }

    pub fn add_pattern(&mut self, kind: PermissionKind, pattern: impl Into<String>) {
        self.patterns.entry(kind).or_default().push(pattern.into());
    }

    pub fn add_patterns(&mut self, kind: PermissionKind, patterns: impl IntoIterator<Item = String>) {
        for p in patterns {
            self.add_pattern(kind, p);
        }
    }

    fn matches(&self, request: &PermissionRequest) -> bool {
        let Some(allowed) = self.patterns.get(&request.permission) else {
            return false;
        };
        if request.patterns.is_empty() {
            return false;
        }
        request
            .patterns
            .iter()
            .all(|req_pattern| allowed.iter().any(|allowed_pattern| glob_match(allowed_pattern, req_pattern)))
    }
}

#[async_trait]
impl PermissionHandler for AutoApproveHandler {
    async fn request_permission(&self, request: &PermissionRequest) -> bool {
        if self.matches(request) {
            return true;
        }
        if let Some(fallback) = &self.fallback {
            return fallback.request_permission(request).await;
        }
        false
    }
}

/// Would prompt a human over stdin in a synchronous CLI; since the agent runtime is async and
/// has no blocking console loop to offer, this handler denies anything not covered by
/// `auto_approve` instead of hanging the event loop on a read that never resolves.
pub struct InteractiveHandler {
    auto_approve: bool,
}

impl InteractiveHandler {
    pub fn new(auto_approve: bool) -> Self {
        Self { auto_approve }
    }
}

#[async_trait]
impl PermissionHandler for InteractiveHandler {
    async fn request_permission(&self, request: &PermissionRequest) -> bool {
        if self.auto_approve {
            return true;
        }
        log::warn!(
            "permission request for {} ({:?}) cannot be answered interactively in this runtime; denying",
            request.permission,
            request.patterns
        );
        false
    }
}

/// A minimal glob matcher supporting `*` wildcards, equivalent to Python's `fnmatch` for the
/// patterns this crate actually uses (command prefixes, file globs).
fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn match_here(pattern: &[u8], candidate: &[u8]) -> bool {
        match pattern.first() {
            None => candidate.is_empty(),
            Some(b'*') => {
                for i in 0..=candidate.len() {
                    if match_here(&pattern[1..], &candidate[i..]) {
                        return true;
                    }
                }
                false
            }
            Some(&c) => candidate.first() == Some(&c) && match_here(&pattern[1..], &candidate[1..]),
        }
    }
    match_here(pattern.as_bytes(), candidate.as_bytes())
}

/// Checks that `file_path` (absolute or relative to `cwd`) resolves to somewhere inside `cwd`,
/// blocking both `../` traversal and absolute escapes.
pub fn is_path_safe(file_path: impl AsRef<Path>, cwd: impl AsRef<Path>) -> bool {
    let cwd = match cwd.as_ref().canonicalize() {
        Ok(p) => p,
        Err(_) => return false,
    };
    let file_path = file_path.as_ref();
    let candidate = if file_path.is_absolute() {
        file_path.to_path_buf()
    } else {
        cwd.join(file_path)
    };
    let resolved: PathBuf = match candidate.canonicalize() {
        Ok(p) => p,
        // A path that doesn't exist yet (e.g. a file about to be created) is resolved
        // lexically instead, since canonicalize requires the path to exist.
        Err(_) => normalize_lexically(&candidate),
    };
    resolved.starts_with(&cwd)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Shell command patterns that are never safe to run unattended.
pub fn dangerous_commands() -> Vec<&'static str> {
    vec![
        "rm -rf *",
        "rm -rf /",
        "rm -r *",
        "> /dev/sda",
        "mkfs",
        "dd if=",
        "chmod -R 777",
        "chmod 777",
        "curl *| bash",
        "wget *| sh",
        "curl *| sh",
        ":(){ :|:& };:",
        "mv /* /dev/null",
        "shred",
    ]
}

/// Returns `Some(reason)` if `command` matches one of [`dangerous_commands`].
pub fn command_danger_reason(command: &str) -> Option<String> {
    for pattern in dangerous_commands() {
        let stripped = pattern.replace('*', "");
        if command.contains(&stripped) {
            return Some(format!("command matches dangerous pattern: {pattern}"));
        }
    }
    None
}
