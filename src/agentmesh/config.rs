//! Runtime-wide configuration: truncation limits, compaction thresholds, and iteration defaults.
//!
//! Users construct a [`RuntimeConfig`] directly or via [`RuntimeConfig::from_env`] — there is no
//! config-file format of its own; skill files (see [`skill`](crate::agentmesh::skill)) carry
//! per-agent settings, this carries the ambient ones that apply process-wide.

use std::path::PathBuf;

/// Process-wide defaults consulted when building agents and their collaborators.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Default cap on loop iterations for agents whose skill file doesn't override it.
    pub default_max_iterations: usize,
    /// Line limit passed to every [`OutputTruncator`](crate::agentmesh::truncation::OutputTruncator).
    pub truncation_max_lines: usize,
    /// Byte limit passed to every [`OutputTruncator`](crate::agentmesh::truncation::OutputTruncator).
    pub truncation_max_bytes: usize,
    /// Directory spilled (truncated) tool output is written to.
    pub truncation_spill_dir: PathBuf,
    /// Context-window budget compaction is measured against.
    pub compaction_context_limit_tokens: usize,
    /// Fraction of `compaction_context_limit_tokens` that triggers compaction.
    pub compaction_threshold: f64,
    /// Number of most recent messages compaction never folds into a summary.
    pub compaction_protect_recent_messages: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: 10,
            truncation_max_lines: crate::agentmesh::truncation::DEFAULT_MAX_LINES,
            truncation_max_bytes: crate::agentmesh::truncation::DEFAULT_MAX_BYTES,
            truncation_spill_dir: std::env::temp_dir(),
            compaction_context_limit_tokens: 100_000,
            compaction_threshold: 0.75,
            compaction_protect_recent_messages: 6,
        }
    }
}

impl RuntimeConfig {
    /// Builds a config from defaults overlaid with `AGENTMESH_*` environment variables. Any
    /// variable that's unset or unparseable is silently skipped in favor of the default — a bad
    /// environment should never prevent startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_usize("AGENTMESH_MAX_ITERATIONS") {
            config.default_max_iterations = v;
        }
        if let Some(v) = env_usize("AGENTMESH_TRUNCATION_MAX_LINES") {
            config.truncation_max_lines = v;
        }
        if let Some(v) = env_usize("AGENTMESH_TRUNCATION_MAX_BYTES") {
            config.truncation_max_bytes = v;
        }
        if let Ok(dir) = std::env::var("AGENTMESH_LOG_DIR") {
            config.truncation_spill_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_usize("AGENTMESH_COMPACTION_CONTEXT_LIMIT_TOKENS") {
            config.compaction_context_limit_tokens = v;
        }
        if let Ok(raw) = std::env::var("AGENTMESH_COMPACTION_THRESHOLD") {
            if let Ok(v) = raw.parse::<f64>() {
                config.compaction_threshold = v;
            }
        }
        if let Some(v) = env_usize("AGENTMESH_COMPACTION_PROTECT_RECENT_MESSAGES") {
            config.compaction_protect_recent_messages = v;
        }

        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Initializes `env_logger` once for the process. Safe to call more than once; later calls are
/// no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = RuntimeConfig::default();
        assert!(config.default_max_iterations > 0);
        assert!(config.compaction_threshold > 0.0 && config.compaction_threshold < 1.0);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("AGENTMESH_MAX_ITERATIONS");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.default_max_iterations, RuntimeConfig::default().default_max_iterations);
    }
}
