//! Role sequence policy: review insertion and derivation from dispatcher output.

use crate::core::handoff::HandoffParser;
use crate::core::types::Roles;
use crate::errors::SequenceDerivationError;

/// Insert the lightweight review after the designer and the full review after
/// the implementer.
///
/// A reviewer already present anywhere in the sequence is left alone; a
/// reviewer whose anchor role is absent is appended. Applying this twice is
/// the same as applying it once.
pub fn apply_review_insertion(sequence: &[String], roles: &Roles) -> Vec<String> {
    let mut updated = sequence.to_vec();
    insert_after(&mut updated, &roles.designer, &roles.lite_reviewer);
    insert_after(&mut updated, &roles.implementer, &roles.full_reviewer);
    updated
}

fn insert_after(sequence: &mut Vec<String>, anchor: &str, role: &str) {
    if sequence.iter().any(|existing| existing == role) {
        return;
    }
    match sequence.iter().position(|existing| existing == anchor) {
        Some(idx) => sequence.insert(idx + 1, role.to_string()),
        None => sequence.push(role.to_string()),
    }
}

/// Sequence named by the dispatcher's assignee markers.
///
/// Roles keep their first-occurrence order, repeats and self-references are
/// dropped, and the dispatcher is re-prepended as the completed first step.
pub fn derive_from_output(
    output: &str,
    dispatcher: &str,
    parser: &HandoffParser,
) -> Result<Vec<String>, SequenceDerivationError> {
    let mut derived: Vec<String> = Vec::new();
    for role in parser.assignees(output) {
        if role != dispatcher && !derived.contains(&role) {
            derived.push(role);
        }
    }
    if derived.is_empty() {
        return Err(SequenceDerivationError {
            dispatcher: dispatcher.to_string(),
        });
    }
    let mut sequence = Vec::with_capacity(derived.len() + 1);
    sequence.push(dispatcher.to_string());
    sequence.extend(derived);
    Ok(sequence)
}

/// Split a comma-separated role list, dropping blanks.
pub fn parse_sequence_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}
