//! Shared deterministic types for the workflow core.
//!
//! These types define stable contracts between components. They do not
//! depend on external state or I/O.

use serde::{Deserialize, Serialize};

/// Recorded status of one step.
///
/// `Ok`, `Failed` and `Timeout` end an attempt. A retry after a
/// timeout is a new attempt at the same index, not a new step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Ok,
    Failed,
    Timeout,
    SkippedExisting,
    SkippedBeforeStart,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Ok => "ok",
            StepStatus::Failed => "failed",
            StepStatus::Timeout => "timeout",
            StepStatus::SkippedExisting => "skipped-existing",
            StepStatus::SkippedBeforeStart => "skipped-before-start",
        }
    }
}

/// Role identifiers with special behavior in the workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Roles {
    /// Plans the run and writes handoff packets for every other role.
    pub dispatcher: String,
    /// Receives the mandatory live-lookup instruction.
    pub researcher: String,
    /// The lightweight review is inserted right after this role.
    pub designer: String,
    /// The full review is inserted right after this role.
    pub implementer: String,
    pub lite_reviewer: String,
    pub full_reviewer: String,
}

impl Default for Roles {
    fn default() -> Self {
        Self {
            dispatcher: "orchestrator".to_string(),
            researcher: "researcher".to_string(),
            designer: "designer".to_string(),
            implementer: "implementer".to_string(),
            lite_reviewer: "reviewer-lite".to_string(),
            full_reviewer: "reviewer".to_string(),
        }
    }
}

/// Labels that mark handoff structure inside free-form agent output.
///
/// Matching is case-insensitive and treats spaces, hyphens and underscores
/// inside a label as interchangeable, so `Next assignee:` and
/// `next-assignee:` are the same marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Markers {
    /// Precedes the role a packet is addressed to.
    pub assignee: String,
    /// Precedes the prompt the addressed role should receive.
    pub prompt: String,
    /// Heading of a block of handoff packets.
    pub packet: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            assignee: "Next assignee".to_string(),
            prompt: "Next input prompt (copy-paste)".to_string(),
            packet: "Handoff packet".to_string(),
        }
    }
}

/// Default role order for a fresh run.
pub fn default_sequence() -> Vec<String> {
    ["orchestrator", "researcher", "architect", "designer", "implementer"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
