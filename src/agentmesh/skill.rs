//! YAML-declared agent composition.
//!
//! Grounded in the original source's `SkillConfig`: a skill file names an agent's tools, system
//! prompt, iteration cap, and a map of child roles to the skill files that define them. Loading
//! a skill recursively resolves those child paths (relative to the parent file's directory) into
//! a tree of [`AgentTemplate`]s the [`Orchestrator`](crate::agentmesh::orchestrator::Orchestrator)
//! can instantiate on `launch_subagents`.
//!
//! The loader is a thin `serde_yaml` mapping plus path resolution — it never looks a tool name
//! up against a live [`ToolRegistry`](crate::agentmesh::tool_protocol::ToolRegistry); wiring
//! `tool_names` to concrete `Tool` instances is the embedding application's job.

use crate::agentmesh::agent::AgentTemplate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

fn default_max_iterations() -> usize {
    10
}

/// The on-disk shape of a skill file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Child role name -> path to that child's skill file, relative to this file's directory.
    #[serde(default)]
    pub subagents: HashMap<String, String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

#[derive(Debug)]
pub enum SkillLoadError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, serde_yaml::Error),
    Cycle(PathBuf),
}

impl fmt::Display for SkillLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkillLoadError::Io(path, e) => write!(f, "failed to read skill file {}: {e}", path.display()),
            SkillLoadError::Parse(path, e) => write!(f, "failed to parse skill file {}: {e}", path.display()),
            SkillLoadError::Cycle(path) => write!(f, "cyclic subagent reference through {}", path.display()),
        }
    }
}

impl Error for SkillLoadError {}

/// Loads a skill file and recursively resolves its `subagents` map into a full
/// [`AgentTemplate`] tree.
pub fn load_skill(path: impl AsRef<Path>) -> Result<AgentTemplate, SkillLoadError> {
    load_skill_inner(path.as_ref(), &mut Vec::new())
}

fn load_skill_inner(path: &Path, visiting: &mut Vec<PathBuf>) -> Result<AgentTemplate, SkillLoadError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if visiting.contains(&canonical) {
        return Err(SkillLoadError::Cycle(canonical));
    }
    visiting.push(canonical.clone());

    let raw = std::fs::read_to_string(path).map_err(|e| SkillLoadError::Io(path.to_path_buf(), e))?;
    let config: SkillConfig = serde_yaml::from_str(&raw).map_err(|e| SkillLoadError::Parse(path.to_path_buf(), e))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut template = AgentTemplate::new(config.name);
    template.system_prompt = config.system_prompt;
    template.tool_names = config.tools;
    template.max_iterations = config.max_iterations;

    for (child_role, relative_path) in config.subagents {
        let child_path = base_dir.join(&relative_path);
        let child_template = load_skill_inner(&child_path, visiting)?;
        template.subagent_templates.insert(child_role, child_template);
    }

    visiting.pop();
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_flat_skill_with_no_subagents() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "researcher.yaml",
            "name: researcher\ntools: [calculator]\nsystem_prompt: You research things.\nmax_iterations: 5\n",
        );

        let template = load_skill(&path).unwrap();
        assert_eq!(template.name, "researcher");
        assert_eq!(template.tool_names, vec!["calculator".to_string()]);
        assert_eq!(template.max_iterations, 5);
        assert!(template.subagent_templates.is_empty());
    }

    #[test]
    fn defaults_max_iterations_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "plain.yaml", "name: plain\n");
        let template = load_skill(&path).unwrap();
        assert_eq!(template.max_iterations, 10);
    }

    #[test]
    fn resolves_subagent_paths_relative_to_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "child.yaml", "name: child\ntools: [memory]\n");
        let parent_path = write_file(
            dir.path(),
            "parent.yaml",
            "name: parent\nsubagents:\n  helper: child.yaml\n",
        );

        let template = load_skill(&parent_path).unwrap();
        let child = template.subagent_templates.get("helper").unwrap();
        assert_eq!(child.name, "child");
        assert_eq!(child.tool_names, vec!["memory".to_string()]);
    }

    #[test]
    fn detects_cycles() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.yaml", "name: a\nsubagents:\n  loop: b.yaml\n");
        let a_path = write_file(dir.path(), "b.yaml", "name: b\nsubagents:\n  loop: a.yaml\n");

        let result = load_skill(&a_path);
        assert!(result.is_err());
    }
}
