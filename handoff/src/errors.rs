//! Typed fatal errors surfaced through `anyhow` and recovered with `downcast_ref`.
//!
//! Step failures and timeouts are not errors: they are reported as stop reasons
//! so callers can map them to distinct exit codes.

use std::fmt;

/// Invalid configuration detected before (or instead of) running a step.
///
/// Covers a missing brief, an invalid start index, a gap before the start
/// index, and an unavailable agent binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

/// The dispatcher output named no next assignee, so no sequence can be derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDerivationError {
    pub dispatcher: String,
}

impl fmt::Display for SequenceDerivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sequence derivation failed: output of '{}' names no next assignee",
            self.dispatcher
        )
    }
}

impl std::error::Error for SequenceDerivationError {}

/// Why a strict handoff could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffMissingReason {
    /// No prior output carries a prompt addressed to the role.
    NoPrompt,
    /// The prompt found does not start with the `[role]` tag.
    MissingTag,
}

/// Strict mode could not find a usable handoff prompt for a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffMissingError {
    pub step: usize,
    pub role: String,
    pub reason: HandoffMissingReason,
}

impl fmt::Display for HandoffMissingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            HandoffMissingReason::NoPrompt => write!(
                f,
                "handoff prompt not found for step {} ({})",
                self.step, self.role
            ),
            HandoffMissingReason::MissingTag => write!(
                f,
                "handoff prompt for step {} is missing the [{}] tag",
                self.step, self.role
            ),
        }
    }
}

impl std::error::Error for HandoffMissingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_survive_anyhow_wrapping() {
        let err = anyhow::Error::new(SequenceDerivationError {
            dispatcher: "orchestrator".to_string(),
        })
        .context("replay step 1");
        let inner = err
            .downcast_ref::<SequenceDerivationError>()
            .expect("downcast");
        assert_eq!(inner.dispatcher, "orchestrator");
    }

    #[test]
    fn handoff_missing_messages_name_the_role() {
        let err = HandoffMissingError {
            step: 3,
            role: "designer".to_string(),
            reason: HandoffMissingReason::MissingTag,
        };
        assert_eq!(
            err.to_string(),
            "handoff prompt for step 3 is missing the [designer] tag"
        );
    }
}
