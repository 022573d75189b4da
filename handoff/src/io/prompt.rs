//! Prompt builder for step input.
//!
//! Every prompt starts with a `[role]` tag line. Templates are compiled once
//! per run; the injection helpers are idempotent so a prompt re-derived on
//! resume is identical to the one written the first time.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{Markers, Roles};
use crate::io::config::RunConfig;

const INITIAL_TEMPLATE: &str = include_str!("prompts/initial.md");
const DISPATCHER_TEMPLATE: &str = include_str!("prompts/dispatcher.md");
const PACKET_TEMPLATE: &str = include_str!("prompts/packet.md");
const REQUIREMENTS_TEMPLATE: &str = include_str!("prompts/requirements.md");
const FALLBACK_TEMPLATE: &str = include_str!("prompts/fallback.md");
const APPENDIX_TEMPLATE: &str = include_str!("prompts/handoff_appendix.md");

/// One handoff packet as rendered into a template.
#[derive(Debug, Clone, Serialize)]
struct PacketContext {
    index: usize,
    role: String,
    fence: String,
    body: String,
}

pub struct PromptBuilder {
    env: Environment<'static>,
    header: String,
    research_instruction: String,
    timebox_instruction: String,
    roles: Roles,
    markers: Markers,
}

impl PromptBuilder {
    pub fn new(config: &RunConfig) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.add_template("initial", INITIAL_TEMPLATE)?;
        env.add_template("dispatcher", DISPATCHER_TEMPLATE)?;
        env.add_template("packet", PACKET_TEMPLATE)?;
        env.add_template("requirements", REQUIREMENTS_TEMPLATE)?;
        env.add_template("fallback", FALLBACK_TEMPLATE)?;
        env.add_template("appendix", APPENDIX_TEMPLATE)?;
        Ok(Self {
            env,
            header: config.prompt.header.trim().to_string(),
            research_instruction: config.prompt.research_instruction.trim().to_string(),
            timebox_instruction: config.prompt.timebox_instruction.trim().to_string(),
            roles: config.roles.clone(),
            markers: config.markers.clone(),
        })
    }

    /// Role tag, header and brief.
    pub fn initial(&self, role: &str, brief: &str) -> Result<String> {
        let rendered = self.env.get_template("initial")?.render(context! {
            role => role,
            header => &self.header,
            brief => brief.trim(),
        })?;
        Ok(finish(&rendered))
    }

    /// Dispatcher prompt with an output template holding one packet skeleton
    /// per remaining role of `sequence`.
    pub fn dispatcher(&self, brief: &str, sequence: &[String]) -> Result<String> {
        let packets: Vec<PacketContext> = self
            .targets(sequence)
            .into_iter()
            .enumerate()
            .map(|(idx, role)| PacketContext {
                index: idx + 1,
                body: format!("  [{role}]\n  ..."),
                fence: "```".to_string(),
                role,
            })
            .collect();
        let rendered = self.env.get_template("dispatcher")?.render(context! {
            role => &self.roles.dispatcher,
            header => &self.header,
            brief => brief.trim(),
            packets => packets,
            packet_label => &self.markers.packet,
            assignee_label => &self.markers.assignee,
            prompt_label => &self.markers.prompt,
        })?;
        Ok(finish(&rendered))
    }

    /// Append the additional requirements block to a dispatcher prompt.
    /// Prompts for other roles are returned unchanged.
    pub fn with_dispatcher_requirements(&self, prompt: &str, sequence: &[String]) -> Result<String> {
        if !has_role_tag(prompt, &self.roles.dispatcher) {
            return Ok(prompt.to_string());
        }
        let rendered = self.env.get_template("requirements")?.render(context! {
            researcher => present(sequence, &self.roles.researcher),
            full_reviewer => present(sequence, &self.roles.full_reviewer),
            lite_reviewer => present(sequence, &self.roles.lite_reviewer),
            designer => &self.roles.designer,
            assignee_label => &self.markers.assignee,
            prompt_label => &self.markers.prompt,
        })?;
        Ok(format!("{}\n\n{}", prompt.trim_end(), finish(&rendered)))
    }

    /// Prompt used when no handoff addressed to `role` can be found.
    pub fn fallback(&self, role: &str, brief: &str, last_output: Option<&str>) -> Result<String> {
        let rendered = self.env.get_template("fallback")?.render(context! {
            role => role,
            header => &self.header,
            brief => brief.trim(),
            last_output => last_output.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(finish(&rendered))
    }

    /// Append a fallback-prompt packet for every non-dispatcher role of
    /// `sequence` to dispatcher output that carries no handoff markers.
    pub fn synthesize_handoff(&self, content: &str, brief: &str, sequence: &[String]) -> Result<String> {
        let targets = self.targets(sequence);
        if targets.is_empty() {
            return Ok(content.to_string());
        }
        let mut packets = Vec::with_capacity(targets.len());
        for (idx, role) in targets.into_iter().enumerate() {
            let body = self.fallback(&role, brief, Some(content))?.trim().to_string();
            packets.push(PacketContext {
                index: idx + 1,
                fence: fence_for(&body),
                body,
                role,
            });
        }
        let rendered = self.env.get_template("appendix")?.render(context! {
            content => content.trim_end(),
            packets => packets,
            packet_label => &self.markers.packet,
            assignee_label => &self.markers.assignee,
            prompt_label => &self.markers.prompt,
        })?;
        Ok(finish(&rendered))
    }

    /// Insert the live-lookup instruction after the tag line of a researcher prompt.
    pub fn with_research_instruction(&self, prompt: &str) -> String {
        if !has_role_tag(prompt, &self.roles.researcher) {
            return prompt.to_string();
        }
        insert_after_tag_line(prompt, &self.research_instruction)
    }

    /// Insert the timebox instruction after the tag line of an implementer prompt.
    pub fn with_timebox_instruction(&self, prompt: &str, role: &str) -> String {
        if role != self.roles.implementer {
            return prompt.to_string();
        }
        insert_after_tag_line(prompt, &self.timebox_instruction)
    }

    fn targets(&self, sequence: &[String]) -> Vec<String> {
        sequence
            .iter()
            .filter(|role| **role != self.roles.dispatcher)
            .cloned()
            .collect()
    }
}

fn present<'a>(sequence: &[String], role: &'a str) -> Option<&'a str> {
    sequence.iter().any(|r| r == role).then_some(role)
}

pub fn has_role_tag(prompt: &str, role: &str) -> bool {
    prompt.trim().starts_with(&format!("[{role}]"))
}

pub fn prepend_role_tag(prompt: &str, role: &str) -> String {
    format!("[{role}]\n{}", prompt.trim_start())
}

fn insert_after_tag_line(prompt: &str, instruction: &str) -> String {
    if instruction.is_empty() || prompt.contains(instruction) {
        return prompt.to_string();
    }
    let trimmed = prompt.trim();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    let mut updated = format!("{first}\n{instruction}");
    let rest = rest.trim_start();
    if !rest.is_empty() {
        updated.push('\n');
        updated.push_str(rest);
    }
    updated.push('\n');
    updated
}

/// Backtick fence one longer than any run inside `body`, at least three.
fn fence_for(body: &str) -> String {
    let longest = body
        .split(|c: char| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat((longest + 1).max(3))
}

fn finish(rendered: &str) -> String {
    format!("{}\n", rendered.trim_end())
}
