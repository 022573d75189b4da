//! Append-only structured event log (`events.jsonl`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Running,
    Ok,
    Failed,
    Timeout,
    SkippedExisting,
    SkippedBeforeStart,
    HandoffAutoGenerated,
    HandoffTagAutoFixed,
    SequenceDerived,
    Stopped,
    Aborted,
    TimeoutRetry,
}

/// One JSON line. Absent fields are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: String,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed: Option<usize>,
}

impl Event {
    pub fn new(event: EventKind) -> Self {
        Self {
            ts: Local::now().to_rfc3339(),
            event,
            step: None,
            role: None,
            prompt: None,
            output: None,
            returncode: None,
            elapsed: None,
            timeout_seconds: None,
            error_log: None,
            sequence: None,
            note: None,
            executed: None,
        }
    }

    pub fn step(event: EventKind, index: usize, role: &str) -> Self {
        Self {
            step: Some(index),
            role: Some(role.to_string()),
            ..Self::new(event)
        }
    }

    pub fn with_prompt(mut self, path: &Path) -> Self {
        self.prompt = Some(path.to_path_buf());
        self
    }

    pub fn with_output(mut self, path: &Path) -> Self {
        self.output = Some(path.to_path_buf());
        self
    }

    pub fn with_returncode(mut self, code: Option<i32>) -> Self {
        self.returncode = code;
        self
    }

    pub fn with_elapsed(mut self, secs: f64) -> Self {
        self.elapsed = Some(secs);
        self
    }

    pub fn with_timeout(mut self, secs: Option<u64>) -> Self {
        self.timeout_seconds = secs;
        self
    }

    pub fn with_error_log(mut self, path: Option<&Path>) -> Self {
        self.error_log = path.map(Path::to_path_buf);
        self
    }

    pub fn with_sequence(mut self, sequence: &[String]) -> Self {
        self.sequence = Some(sequence.to_vec());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_executed(mut self, executed: usize) -> Self {
        self.executed = Some(executed);
        self
    }
}

pub fn append_event(path: &Path, event: &Event) -> Result<()> {
    let mut line = serde_json::to_string(event).context("serialize event")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open event log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append event log {}", path.display()))
}

/// Every event recorded so far, oldest first.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read event log {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_appended_as_json_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("events.jsonl");
        append_event(
            &path,
            &Event::step(EventKind::Failed, 2, "designer")
                .with_returncode(Some(1))
                .with_timeout(Some(300)),
        )
        .expect("append");
        append_event(&path, &Event::new(EventKind::Stopped).with_executed(1)).expect("append");

        let raw = fs::read_to_string(&path).expect("read");
        let first: serde_json::Value =
            serde_json::from_str(raw.lines().next().expect("line")).expect("json");
        assert_eq!(first["event"], "failed");
        assert_eq!(first["step"], 2);
        assert_eq!(first["role"], "designer");
        assert_eq!(first["returncode"], 1);
        assert!(first.get("output").is_none());

        let events = read_events(&path).expect("events");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, EventKind::Stopped);
        assert_eq!(events[1].executed, Some(1));
    }

    #[test]
    fn kinds_use_kebab_case() {
        let value = serde_json::to_value(EventKind::HandoffTagAutoFixed).expect("json");
        assert_eq!(value, "handoff-tag-auto-fixed");
        let value = serde_json::to_value(EventKind::SkippedBeforeStart).expect("json");
        assert_eq!(value, "skipped-before-start");
    }
}
