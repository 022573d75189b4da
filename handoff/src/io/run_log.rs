//! Human-readable run log (`runlog.md`) and per-step error excerpts.
//!
//! The log is append-only. The run's sequence is declared in the header and
//! re-declared by `## Sequence` entries; the last `- Sequence:` line wins.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;

use crate::core::sequence::parse_sequence_list;
use crate::core::types::StepStatus;
use crate::io::config::RunConfig;
use crate::io::process::tail_chars;

const SEQUENCE_PREFIX: &str = "- Sequence:";

/// Start a fresh run log declaring `sequence` and the effective settings.
pub fn init_run_log(
    path: &Path,
    config: &RunConfig,
    sequence: &[String],
    brief: &Path,
    stop_after: Option<usize>,
) -> Result<()> {
    let lines = [
        "# Run Log".to_string(),
        String::new(),
        format!("- Started: {}", now()),
        format!("{SEQUENCE_PREFIX} {}", sequence.join(", ")),
        format!("- Model: {}", config.agent.model.as_deref().unwrap_or("(default)")),
        format!("- Sandbox: {}", config.agent.sandbox.as_deref().unwrap_or("(default)")),
        format!("- Full-auto: {}", yes_no(config.agent.full_auto)),
        format!("- Working dir: {}", config.agent.workdir.display()),
        format!("- Brief: {}", brief.display()),
        format!("- Per-step timeout: {}s", config.effective_timeout_secs()),
        format!("- Short prompt: {}", yes_no(config.short_prompt())),
        format!("- Short prompt chars: {}", config.prompt.short_chars),
        format!("- Avoid timeout mode: {}", yes_no(config.policy.avoid_timeout)),
        format!("- Auto reviewer: {}", yes_no(config.policy.auto_reviewer)),
        format!(
            "- Stop after: {}",
            stop_after.map_or_else(|| "(none)".to_string(), |n| n.to_string())
        ),
        String::new(),
        "## Steps".to_string(),
        String::new(),
    ];
    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(path, contents).with_context(|| format!("write run log {}", path.display()))
}

pub fn append_resume_marker(path: &Path) -> Result<()> {
    append(path, &format!("\n## Resume\n- Resumed: {}\n\n", now()))
}

/// One per-step entry.
#[derive(Debug, Clone)]
pub struct StepEntry<'a> {
    pub index: usize,
    pub role: &'a str,
    pub status: StepStatus,
    pub prompt: &'a Path,
    pub output: Option<&'a Path>,
    pub error_log: Option<&'a Path>,
    pub elapsed_secs: Option<f64>,
    pub timeout_secs: Option<u64>,
    pub note: Option<&'a str>,
}

impl<'a> StepEntry<'a> {
    pub fn new(index: usize, role: &'a str, status: StepStatus, prompt: &'a Path) -> Self {
        Self {
            index,
            role,
            status,
            prompt,
            output: None,
            error_log: None,
            elapsed_secs: None,
            timeout_secs: None,
            note: None,
        }
    }

    fn render(&self) -> String {
        let mut lines = vec![
            format!("### {:02}. {}", self.index, self.role),
            format!("- Status: {}", self.status.as_str()),
            format!("- Prompt: {}", self.prompt.display()),
        ];
        if let Some(output) = self.output {
            lines.push(format!("- Output: {}", output.display()));
        }
        if let Some(error_log) = self.error_log {
            lines.push(format!("- Error log: {}", error_log.display()));
        }
        if let Some(elapsed) = self.elapsed_secs {
            lines.push(format!("- Elapsed: {elapsed:.1}s"));
        }
        if let Some(timeout) = self.timeout_secs {
            lines.push(format!("- Timeout: {timeout}s"));
        }
        if let Some(note) = self.note {
            lines.push(format!("- Note: {note}"));
        }
        lines.push(String::new());
        lines.join("\n") + "\n"
    }
}

pub fn append_step_entry(path: &Path, entry: &StepEntry<'_>) -> Result<()> {
    append(path, &entry.render())
}

/// Re-declare the sequence after it changed mid-run.
pub fn append_sequence_update(path: &Path, sequence: &[String], note: &str) -> Result<()> {
    append(
        path,
        &format!(
            "## Sequence\n{SEQUENCE_PREFIX} {}\n- Note: {note}\n\n",
            sequence.join(", ")
        ),
    )
}

pub fn append_stop(path: &Path, executed: usize) -> Result<()> {
    append(
        path,
        &format!("\n## Stop\n- Stopped after {executed} executed step(s).\n"),
    )
}

pub fn append_abort(path: &Path, message: &str) -> Result<()> {
    append(path, &format!("\n## Abort\n- {}\n- Reason: {message}\n", now()))
}

/// Append one timestamped line, creating the file when needed.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    append(path, &format!("[{}] {line}\n", now()))
}

/// Sequence declared last in the run log, if any.
pub fn declared_sequence(path: &Path) -> Result<Option<Vec<String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run log {}", path.display()))?;
    let declared = contents
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(SEQUENCE_PREFIX))
        .map(parse_sequence_list)
        .filter(|sequence| !sequence.is_empty());
    Ok(declared)
}

/// Write the tails of captured stdout/stderr. Returns `false` (and writes
/// nothing) when both streams are empty.
pub fn write_error_log(path: &Path, stdout: &str, stderr: &str, max_chars: usize) -> Result<bool> {
    let mut parts = Vec::new();
    if let Some(tail) = tail_chars(stdout, max_chars) {
        parts.push(format!("## stdout\n{tail}"));
    }
    if let Some(tail) = tail_chars(stderr, max_chars) {
        parts.push(format!("## stderr\n{tail}"));
    }
    if parts.is_empty() {
        return Ok(false);
    }
    let mut contents = parts.join("\n\n");
    contents.push('\n');
    fs::write(path, contents).with_context(|| format!("write error log {}", path.display()))?;
    Ok(true)
}

fn append(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

fn now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
