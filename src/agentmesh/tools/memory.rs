//! A TTL-aware key/value store agents use to carry state across iterations and coordinate with
//! siblings launched from the same parent.
//!
//! [`Memory`]'s eviction task and expiry bookkeeping are grounded in the teacher's standalone
//! memory tool, but the store itself is keyed by `(session_id, key)` rather than bare `key`:
//! every [`MemoryTool::call`] threads the calling [`Context`]'s session id through, so one
//! agent's `put` can never clobber or leak into another agent's `get` even when both share the
//! same `Memory` instance (as siblings launched from the same parent do).

use crate::agentmesh::context::Context;
use crate::agentmesh::tool_protocol::{Tool, ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::sync::{Arc, Mutex};
use tokio::time::{self, Duration};

/// `(session_id, key)` — the actual identity of a stored entry.
type ScopedKey = (String, String);

/// Metadata tracked alongside each stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMetadata {
    pub added_utc: DateTime<Utc>,
    pub expires_in: Option<u64>,
}

impl MemoryMetadata {
    fn new(expires_in: Option<u64>) -> Self {
        Self { added_utc: Utc::now(), expires_in }
    }

    fn is_expired(&self) -> bool {
        match self.expires_in {
            Some(ttl) => Utc::now() > self.added_utc + chrono::Duration::seconds(ttl as i64),
            None => false,
        }
    }

    fn is_expireable(&self) -> bool {
        self.expires_in.is_some()
    }
}

/// A TTL-aware key/value store scoped by session id. Cheap to clone (everything is behind an
/// `Arc`), so the same instance can be shared between an agent and the subagents it launches
/// when a skill wants shared rather than per-agent memory — sharing the instance still keeps
/// each session's keys isolated, since the session id is part of the key itself.
#[derive(Debug, Clone)]
pub struct Memory {
    store: Arc<Mutex<HashMap<ScopedKey, (String, MemoryMetadata)>>>,
    expiring_timestamps_2_keys: Arc<Mutex<BTreeMap<DateTime<Utc>, Vec<ScopedKey>>>>,
}

impl Memory {
    /// Creates an empty store and spawns a background task that evicts expired entries once a
    /// second, so a `list_keys`/`get` call is never required just to reclaim memory.
    pub fn new() -> Self {
        let store: Arc<Mutex<HashMap<ScopedKey, (String, MemoryMetadata)>>> = Arc::new(Mutex::new(HashMap::new()));
        let expiring_timestamps_2_keys = Arc::new(Mutex::new(BTreeMap::new()));

        let eviction_store = Arc::clone(&store);
        tokio::spawn(async move {
            loop {
                time::sleep(Duration::from_secs(1)).await;
                let mut store = eviction_store.lock().unwrap();
                let expired: Vec<_> = store
                    .iter()
                    .filter_map(|(key, (_, metadata))| metadata.is_expired().then(|| key.clone()))
                    .collect();
                for key in expired {
                    store.remove(&key);
                }
            }
        });

        Self { store, expiring_timestamps_2_keys }
    }

    pub fn put(&self, session_id: &str, key: String, value: String, ttl: Option<u64>) {
        let metadata = MemoryMetadata::new(ttl);
        let scoped = (session_id.to_string(), key);
        let mut store = self.store.lock().unwrap();
        let mut expiring = self.expiring_timestamps_2_keys.lock().unwrap();

        let expiration_time = metadata
            .is_expireable()
            .then(|| metadata.added_utc + chrono::Duration::seconds(metadata.expires_in.unwrap_or(0) as i64));

        store.insert(scoped.clone(), (value, metadata));
        if let Some(exp_time) = expiration_time {
            expiring.entry(exp_time).or_default().push(scoped);
        }
    }

    pub fn get(&self, session_id: &str, key: &str) -> Option<(String, MemoryMetadata)> {
        self.evict_expired_keys();
        let store = self.store.lock().unwrap();
        store
            .get(&(session_id.to_string(), key.to_string()))
            .filter(|(_, metadata)| !metadata.is_expired())
            .cloned()
    }

    pub fn delete(&self, session_id: &str, key: &str) -> bool {
        self.store.lock().unwrap().remove(&(session_id.to_string(), key.to_string())).is_some()
    }

    pub fn list_keys(&self, session_id: &str) -> Vec<String> {
        self.evict_expired_keys();
        self.store
            .lock()
            .unwrap()
            .iter()
            .filter(|((sid, _), (_, metadata))| sid == session_id && !metadata.is_expired())
            .map(|((_, key), _)| key.clone())
            .collect()
    }

    pub fn clear(&self, session_id: &str) {
        self.store.lock().unwrap().retain(|(sid, _), _| sid != session_id);
    }

    /// Returns `(total_bytes, keys_bytes, values_bytes)` for everything stored under `session_id`.
    pub fn get_total_bytes_stored(&self, session_id: &str) -> (usize, usize, usize) {
        let store = self.store.lock().unwrap();
        let mut keys_size = 0;
        let mut values_size = 0;
        for ((sid, key), (value, _)) in store.iter() {
            if sid != session_id {
                continue;
            }
            keys_size += key.len();
            values_size += value.len();
        }
        (keys_size + values_size, keys_size, values_size)
    }

    fn evict_expired_keys(&self) {
        let now = Utc::now();
        let mut expiring = self.expiring_timestamps_2_keys.lock().unwrap();
        let mut store = self.store.lock().unwrap();
        expiring.retain(|&expiry, keys| {
            if expiry <= now {
                for key in keys.iter() {
                    store.remove(key);
                }
                false
            } else {
                true
            }
        });
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts [`Memory`] to the agent-facing [`Tool`] trait. One `action` field selects the
/// operation; `key`/`value`/`ttl_seconds` are interpreted per action.
pub struct MemoryTool {
    memory: Memory,
}

impl MemoryTool {
    pub fn new() -> Self {
        Self { memory: Memory::new() }
    }

    /// Shares an existing store instead of creating a fresh one, for skills that want a single
    /// memory visible to a parent and all of its subagents.
    pub fn with_memory(memory: Memory) -> Self {
        Self { memory }
    }
}

impl Default for MemoryTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "memory",
            "Stores and retrieves key/value state across iterations. Actions: put, get, delete, list, clear.",
        )
        .with_parameter(
            ToolParameter::new("action", ToolParameterType::String)
                .with_description("one of: put, get, delete, list, clear")
                .required(),
        )
        .with_parameter(ToolParameter::new("key", ToolParameterType::String).with_description("required for put/get/delete"))
        .with_parameter(ToolParameter::new("value", ToolParameterType::String).with_description("required for put"))
        .with_parameter(
            ToolParameter::new("ttl_seconds", ToolParameterType::Integer)
                .with_description("optional expiration for put; omit for no expiration"),
        )
    }

    async fn call(&self, arguments: serde_json::Value, context: &Context) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let action = arguments
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidParameters("missing required string field 'action'".to_string()))?;
        let session_id = context.session_id.as_str();

        match action {
            "put" => {
                let key = require_str(&arguments, "key")?;
                let value = require_str(&arguments, "value")?;
                let ttl = arguments.get("ttl_seconds").and_then(|v| v.as_u64());
                self.memory.put(session_id, key.to_string(), value.to_string(), ttl);
                Ok(ToolResult::success(serde_json::json!({"stored": key})))
            }
            "get" => {
                let key = require_str(&arguments, "key")?;
                match self.memory.get(session_id, key) {
                    Some((value, metadata)) => Ok(ToolResult::success(serde_json::json!({
                        "value": value,
                        "added_utc": metadata.added_utc.to_rfc3339(),
                        "expires_in": metadata.expires_in,
                    }))),
                    None => Ok(ToolResult::failure(format!("no value stored for key '{key}'"))),
                }
            }
            "delete" => {
                let key = require_str(&arguments, "key")?;
                let existed = self.memory.delete(session_id, key);
                Ok(ToolResult::success(serde_json::json!({"deleted": existed})))
            }
            "list" => Ok(ToolResult::success(serde_json::json!(self.memory.list_keys(session_id)))),
            "clear" => {
                self.memory.clear(session_id);
                Ok(ToolResult::success(serde_json::json!({"cleared": true})))
            }
            other => Ok(ToolResult::failure(format!("unknown memory action '{other}'"))),
        }
    }
}

fn require_str<'a>(arguments: &'a serde_json::Value, field: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing required string field '{field}'")))
}
