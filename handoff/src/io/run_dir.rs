//! Run directory layout and step artifacts.
//!
//! Artifact presence is the only record of what has executed: a step counts
//! as done when its output or raw response file exists.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::core::handoff::HandoffParser;

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    /// Human-readable log (`runlog.md`).
    pub run_log: PathBuf,
    /// Append-only JSONL event log (`events.jsonl`).
    pub events_log: PathBuf,
    /// One line per driver attempt (`continue.log`).
    pub driver_log: PathBuf,
    /// Copy of the brief, written once.
    pub brief_copy: PathBuf,
    /// Effective configuration of the run, written once.
    pub config_snapshot: PathBuf,
}

impl RunPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            run_log: dir.join("runlog.md"),
            events_log: dir.join("events.jsonl"),
            driver_log: dir.join("continue.log"),
            brief_copy: dir.join("brief.md"),
            config_snapshot: dir.join("config.toml"),
        }
    }

    pub fn step_files(&self, index: usize, role: &str) -> StepFiles {
        let stem = format!("{index:02}-{role}");
        StepFiles {
            prompt: self.dir.join(format!("{stem}.prompt.md")),
            output: self.dir.join(format!("{stem}.md")),
            response: self.dir.join(format!("{stem}.response.md")),
            error_log: self.dir.join(format!("{stem}.error.log")),
        }
    }
}

/// Files of one step, named by zero-padded index and role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFiles {
    pub prompt: PathBuf,
    /// Authoritative output.
    pub output: PathBuf,
    /// Raw final message written by the agent.
    pub response: PathBuf,
    /// Bounded stdout/stderr tail on failure or timeout.
    pub error_log: PathBuf,
}

impl StepFiles {
    pub fn has_output(&self) -> bool {
        self.output.exists() || self.response.exists()
    }
}

/// `runs/<YYYYmmdd-HHMMSS>` under `root`.
pub fn default_run_dir(root: &Path, now: DateTime<Local>) -> PathBuf {
    root.join("runs")
        .join(now.format("%Y%m%d-%H%M%S").to_string())
}

/// Copy the raw response over the authoritative output when the output is
/// absent, or always when `force` is set. Returns whether a copy happened.
pub fn materialize_output(files: &StepFiles, force: bool) -> Result<bool> {
    if !files.response.exists() || (files.output.exists() && !force) {
        return Ok(false);
    }
    let response = read_text(&files.response)?;
    write_text(&files.output, &response)?;
    Ok(true)
}

/// Content of a step, preferring whichever artifact carries handoff markers,
/// then the output, then the raw response. Empty artifacts are ignored.
pub fn select_output(files: &StepFiles, parser: &HandoffParser) -> Result<Option<String>> {
    let output = read_optional(&files.output)?.filter(|text| !text.is_empty());
    let response = read_optional(&files.response)?.filter(|text| !text.is_empty());

    let with_markers = [&output, &response]
        .into_iter()
        .flatten()
        .find(|text| parser.has_markers(text));
    if let Some(text) = with_markers {
        return Ok(Some(text.clone()));
    }
    Ok(output.or(response))
}

pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

pub fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    read_text(path).map(Some)
}

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
