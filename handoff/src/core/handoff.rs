//! Handoff packet extraction from free-form agent output.
//!
//! A packet is a section that starts at an assignee marker
//! (`Next assignee: <role>`) and runs until the next heading or the next
//! assignee marker outside a code fence. Inside the section the prompt for
//! `<role>` is read from the fenced block that follows the prompt label, or,
//! when no fence follows, from the rest of the label's line.
//!
//! Matching is structural only. Decorations such as `**bold**` labels and
//! backticked role names are tolerated; nothing else about the text is
//! interpreted.

use anyhow::{Result, anyhow};
use regex::Regex;

use crate::core::types::Markers;

/// Compiled marker patterns. Build once per run and reuse.
#[derive(Debug, Clone)]
pub struct HandoffParser {
    assignee: Regex,
    assignee_label: Regex,
    prompt_label: Regex,
    packet_label: Regex,
}

impl HandoffParser {
    pub fn new(markers: &Markers) -> Result<Self> {
        let assignee = label_pattern(&markers.assignee, "assignee")?;
        let prompt = label_pattern(&markers.prompt, "prompt")?;
        let packet = label_pattern(&markers.packet, "packet")?;

        Ok(Self {
            assignee: Regex::new(&format!(
                r"(?i){assignee}{LABEL_COLON}[ \t]*[`*]*(?P<role>[A-Za-z0-9_-]+)"
            ))?,
            assignee_label: Regex::new(&format!(r"(?i){assignee}{LABEL_COLON}"))?,
            prompt_label: Regex::new(&format!(r"(?i){prompt}{LABEL_COLON}"))?,
            packet_label: Regex::new(&format!(r"(?i){packet}"))?,
        })
    }

    /// Whether `text` carries any handoff structure at all.
    pub fn has_markers(&self, text: &str) -> bool {
        self.assignee_label.is_match(text) || self.packet_label.is_match(text)
    }

    /// Every role named by an assignee marker, in textual order (duplicates kept).
    pub fn assignees(&self, text: &str) -> Vec<String> {
        self.assignee
            .captures_iter(text)
            .map(|caps| caps["role"].to_string())
            .collect()
    }

    /// Newest well-formed prompt addressed to `role`, scanning `history` from
    /// the last document back to the first. A later document wins even when an
    /// earlier one also addresses the role.
    pub fn find_prompt<S: AsRef<str>>(&self, history: &[S], role: &str) -> Option<String> {
        history
            .iter()
            .rev()
            .find_map(|doc| self.extract_prompt(doc.as_ref(), role))
    }

    /// Prompt addressed to `role` within a single document.
    pub fn extract_prompt(&self, doc: &str, role: &str) -> Option<String> {
        self.assignee
            .captures_iter(doc)
            .filter(|caps| &caps["role"] == role)
            .filter_map(|caps| caps.get(0))
            .find_map(|marker| {
                let section = &doc[marker.end()..self.section_end(doc, marker.end())];
                self.prompt_in_section(section)
            })
    }

    /// Byte offset where the section starting at `start` ends: the next heading
    /// or assignee marker on a later line, ignoring lines inside code fences.
    fn section_end(&self, doc: &str, start: usize) -> usize {
        let Some(newline) = doc[start..].find('\n') else {
            return doc.len();
        };
        let mut offset = start + newline + 1;
        let mut open_fence: Option<usize> = None;
        for line in doc[offset..].split_inclusive('\n') {
            let trimmed = line.trim_end_matches(['\n', '\r']);
            match open_fence {
                Some(len) => {
                    if closes_fence(trimmed, len) {
                        open_fence = None;
                    }
                }
                None => {
                    if let Some(len) = fence_len(trimmed) {
                        open_fence = Some(len);
                    } else if trimmed.starts_with('#') || self.assignee_label.is_match(trimmed) {
                        return offset;
                    }
                }
            }
            offset += line.len();
        }
        doc.len()
    }

    fn prompt_in_section(&self, section: &str) -> Option<String> {
        let label = self.prompt_label.find(section)?;
        let after = &section[label.end()..];
        let (first_line, rest) = match after.find('\n') {
            Some(idx) => (&after[..idx], &after[idx + 1..]),
            None => (after, ""),
        };

        let inline = first_line.trim();
        if fence_len(inline).is_some() {
            // Fence opens on the label line itself.
            return fenced_body(first_line, rest);
        }
        if !inline.is_empty() {
            return Some(inline.to_string());
        }

        let mut remaining = rest;
        loop {
            let (line, tail) = match remaining.find('\n') {
                Some(idx) => (&remaining[..idx], &remaining[idx + 1..]),
                None => (remaining, ""),
            };
            if line.trim().is_empty() {
                if tail.is_empty() {
                    return None;
                }
                remaining = tail;
                continue;
            }
            if fence_len(line.trim_end_matches('\r')).is_some() {
                return fenced_body(line, tail);
            }
            return None;
        }
    }
}

const LABEL_COLON: &str = r"(?:\*\*|__)?\s*:(?:\*\*|__)?";

/// Regex source for a label, tolerant of separator style between words.
fn label_pattern(label: &str, name: &str) -> Result<String> {
    let words: Vec<String> = label
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|word| !word.is_empty())
        .map(regex::escape)
        .collect();
    if words.is_empty() {
        return Err(anyhow!("{name} marker label must not be empty"));
    }
    Ok(words.join(r"[\s_-]+"))
}

/// Length of the backtick run opening a fence on this line, if any.
fn fence_len(line: &str) -> Option<usize> {
    let ticks = line
        .trim_start()
        .chars()
        .take_while(|c| *c == '`')
        .count();
    (ticks >= 3).then_some(ticks)
}

fn closes_fence(line: &str, open_len: usize) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '`') && trimmed.len() >= open_len
}

/// Body of the fence opened by `opener`, dedented by the opener's indentation.
///
/// An empty body yields `None`: an empty block is treated as no prompt.
fn fenced_body(opener: &str, rest: &str) -> Option<String> {
    let opener = opener.trim_end_matches('\r');
    let indent = opener.len() - opener.trim_start().len();
    let open_len = fence_len(opener)?;

    let mut body = Vec::new();
    for line in rest.split('\n') {
        let line = line.trim_end_matches('\r');
        if closes_fence(line, open_len) {
            break;
        }
        body.push(dedent(line, indent));
    }
    let prompt = body.join("\n").trim().to_string();
    (!prompt.is_empty()).then_some(prompt)
}

fn dedent(line: &str, indent: usize) -> &str {
    let strip = line
        .bytes()
        .take(indent)
        .take_while(|b| *b == b' ' || *b == b'\t')
        .count();
    &line[strip..]
}
