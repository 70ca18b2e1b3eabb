//! Automatic truncation of large tool outputs, with spillover to disk.
//!
//! Ported from the original source's `agent/truncation.py`: a tool call result bigger than
//! `max_lines` or `max_bytes` gets clipped, the full output is written to a spill file, and a
//! footer with retrieval instructions is appended. This keeps a single noisy tool call from
//! blowing the LLM's context window while still making the full output recoverable.

use std::path::{Path, PathBuf};

/// Default maximum number of lines kept in an in-context tool result.
pub const DEFAULT_MAX_LINES: usize = 2000;
/// Default maximum byte size kept in an in-context tool result (50KB).
pub const DEFAULT_MAX_BYTES: usize = 51_200;

/// Describes whether and how a tool output was truncated.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TruncationMetadata {
    pub total_lines: usize,
    pub total_bytes: usize,
    pub is_truncated: bool,
    pub truncated_at_line: Option<usize>,
    pub full_output_file: Option<String>,
}

/// Truncates oversized tool output and spills the full content to a temp file.
pub struct OutputTruncator {
    max_lines: usize,
    max_bytes: usize,
    temp_dir: PathBuf,
}

impl OutputTruncator {
    pub fn new(max_lines: usize, max_bytes: usize, temp_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&temp_dir)?;
        Ok(Self {
            max_lines,
            max_bytes,
            temp_dir,
        })
    }

    pub fn with_defaults() -> std::io::Result<Self> {
        Self::new(DEFAULT_MAX_LINES, DEFAULT_MAX_BYTES, std::env::temp_dir())
    }

    /// Truncates `output` if it exceeds either limit, returning the (possibly clipped) text and
    /// the metadata describing what happened. `call_id` names the spill file; `context` is an
    /// optional human-readable tag folded into the truncation footer.
    pub fn truncate(&self, output: &str, call_id: &str, context: &str) -> (String, TruncationMetadata) {
        let lines: Vec<&str> = output.split('\n').collect();
        let byte_size = output.len();

        let mut metadata = TruncationMetadata {
            total_lines: lines.len(),
            total_bytes: byte_size,
            is_truncated: false,
            truncated_at_line: None,
            full_output_file: None,
        };

        if lines.len() <= self.max_lines && byte_size <= self.max_bytes {
            return (output.to_string(), metadata);
        }

        let spill_path = self.temp_dir.join(format!("output_{call_id}.txt"));
        let spill_written = std::fs::write(&spill_path, output).is_ok();

        let truncated_lines = &lines[..lines.len().min(self.max_lines)];
        let mut truncated_output = truncated_lines.join("\n");

        let context_str = if context.is_empty() {
            String::new()
        } else {
            format!(" ({context})")
        };
        let mut footer = vec![
            String::new(),
            "=".repeat(70),
            format!("OUTPUT TRUNCATED{context_str}"),
            "=".repeat(70),
            format!("Total lines: {} (showing first {})", lines.len(), self.max_lines),
            format!("Total size: {} bytes (limit: {} bytes)", byte_size, self.max_bytes),
        ];
        if spill_written {
            footer.push(String::new());
            footer.push(format!("Full output saved to: {}", spill_path.display()));
            footer.push(String::new());
            footer.push("To read more:".to_string());
            footer.push(format!("  - re-invoke with offset={} to continue", self.max_lines));
        }
        footer.push("=".repeat(70));

        truncated_output.push('\n');
        truncated_output.push_str(&footer.join("\n"));

        metadata.is_truncated = true;
        metadata.truncated_at_line = Some(self.max_lines);
        metadata.full_output_file = spill_written.then(|| spill_path.display().to_string());

        (truncated_output, metadata)
    }

    /// Removes spill files under this truncator's temp dir older than `max_age_hours`.
    pub fn clean_old_files(&self, max_age_hours: u64) -> usize {
        let cutoff = std::time::SystemTime::now()
            .checked_sub(std::time::Duration::from_secs(max_age_hours * 3600));
        let Some(cutoff) = cutoff else { return 0 };
        let Ok(entries) = std::fs::read_dir(&self.temp_dir) else {
            return 0;
        };
        let mut deleted = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_spill_file(&path) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(modified) = meta.modified() {
                    if modified < cutoff && std::fs::remove_file(&path).is_ok() {
                        deleted += 1;
                    }
                }
            }
        }
        deleted
    }
}

fn is_spill_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("output_") && n.ends_with(".txt"))
        .unwrap_or(false)
}
