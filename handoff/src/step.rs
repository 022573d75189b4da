//! Orchestration for a single step attempt.
//!
//! An attempt builds (or receives) the step's prompt, invokes the agent once
//! with a bounded timeout, classifies the outcome, and records it in both the
//! run log and the event log. Failures and timeouts are returned as statuses
//! so the caller decides whether to stop or retry.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::types::StepStatus;
use crate::errors::{HandoffMissingError, HandoffMissingReason};
use crate::io::agent::{Agent, AgentOutcome, AgentRequest};
use crate::io::events::{Event, EventKind, append_event};
use crate::io::prompt::{has_role_tag, prepend_role_tag};
use crate::io::run_dir::{materialize_output, select_output, write_text};
use crate::io::run_log::{StepEntry, append_step_entry, write_error_log};
use crate::start::RunContext;

/// Build the prompt for step `index` from the brief and the output history.
///
/// Step 1 gets the initial (or dispatcher) prompt. Later steps take the newest
/// handoff addressed to `role`, falling back to a generated prompt when
/// handoffs may be repaired. Tag enforcement and role instructions are applied
/// last. Repairs are recorded as events unless the run is a dry run.
pub fn build_step_prompt(
    ctx: &RunContext,
    index: usize,
    role: &str,
    history: &[String],
) -> Result<String> {
    let policy = &ctx.config.policy;
    let roles = &ctx.config.roles;

    let mut prompt = if index == 1 {
        let base = if role == roles.dispatcher && !ctx.config.sequence_from_output {
            ctx.prompts.dispatcher(&ctx.brief_for_prompt, &ctx.sequence)?
        } else {
            ctx.prompts.initial(role, &ctx.brief_for_prompt)?
        };
        ctx.prompts.with_dispatcher_requirements(&base, &ctx.sequence)?
    } else {
        match ctx.parser.find_prompt(history, role) {
            Some(found) => found,
            None => {
                if policy.require_handoff && !policy.auto_handoff {
                    return Err(HandoffMissingError {
                        step: index,
                        role: role.to_string(),
                        reason: HandoffMissingReason::NoPrompt,
                    }
                    .into());
                }
                warn!(step = index, role, "no handoff prompt found, using fallback");
                record(ctx, Event::step(EventKind::HandoffAutoGenerated, index, role))?;
                ctx.prompts.fallback(
                    role,
                    &ctx.brief_for_prompt,
                    history.last().map(String::as_str),
                )?
            }
        }
    };

    if policy.require_handoff && !has_role_tag(&prompt, role) {
        if !policy.auto_handoff {
            return Err(HandoffMissingError {
                step: index,
                role: role.to_string(),
                reason: HandoffMissingReason::MissingTag,
            }
            .into());
        }
        prompt = prepend_role_tag(&prompt, role);
        record(ctx, Event::step(EventKind::HandoffTagAutoFixed, index, role))?;
    }
    if policy.researcher_web_required && role == roles.researcher {
        prompt = ctx.prompts.with_research_instruction(&prompt);
    }
    if policy.avoid_timeout {
        prompt = ctx.prompts.with_timebox_instruction(&prompt, role);
    }
    Ok(prompt)
}

/// One attempt to execute.
#[derive(Debug, Clone)]
pub struct StepRequest<'a> {
    pub index: usize,
    pub role: &'a str,
    pub prompt: &'a str,
    pub timeout_secs: u64,
    /// Overwrite an existing output with the new response.
    pub force: bool,
}

/// Result of one attempt.
#[derive(Debug, Clone)]
pub struct StepAttempt {
    pub index: usize,
    pub role: String,
    /// `Ok`, `Failed` or `Timeout`.
    pub status: StepStatus,
    /// Selected output content (`Ok` only).
    pub content: Option<String>,
    pub returncode: Option<i32>,
    pub elapsed: Duration,
    pub timeout_secs: u64,
    pub error_log: Option<PathBuf>,
    pub note: Option<String>,
}

/// Execute one attempt of a step and record its outcome.
///
/// A successful exit that leaves no output artifact is a failed step. When
/// the dispatcher's output carries no handoff markers and handoffs may be
/// repaired, a packet for every remaining role is appended to its output.
pub fn execute_step<A: Agent>(
    ctx: &RunContext,
    agent: &A,
    request: &StepRequest<'_>,
) -> Result<StepAttempt> {
    let StepRequest {
        index,
        role,
        prompt,
        timeout_secs,
        force,
    } = *request;
    let files = ctx.paths.step_files(index, role);

    write_text(&files.prompt, prompt)?;
    remove_if_exists(&files.response, "stale response")?;
    record(
        ctx,
        Event::step(EventKind::Running, index, role)
            .with_prompt(&files.prompt)
            .with_timeout(Some(timeout_secs)),
    )?;

    info!(step = index, role, timeout_secs, "running step");
    let started = Instant::now();
    let outcome = match agent.run(&AgentRequest {
        role: role.to_string(),
        prompt: prompt.to_string(),
        workdir: ctx.config.agent.workdir.clone(),
        response_path: files.response.clone(),
        timeout: Some(Duration::from_secs(timeout_secs)),
        config_overrides: ctx.config.overrides_for(role),
        output_limit_bytes: ctx.config.limits.output_limit_bytes,
    }) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(step = index, role, err = %format!("{err:#}"), "agent invocation failed");
            AgentOutcome::Failed {
                code: None,
                stdout: String::new(),
                stderr: format!("{err:#}"),
            }
        }
    };
    let elapsed = started.elapsed();

    let mut attempt = StepAttempt {
        index,
        role: role.to_string(),
        status: StepStatus::Ok,
        content: None,
        returncode: None,
        elapsed,
        timeout_secs,
        error_log: None,
        note: None,
    };

    match &outcome {
        AgentOutcome::Completed { stdout, stderr } => {
            materialize_output(&files, force)?;
            match select_output(&files, &ctx.parser)? {
                Some(content) => {
                    attempt.returncode = Some(0);
                    attempt.content = Some(complete_dispatcher_handoff(ctx, index, role, content)?);
                }
                None => {
                    // Empty artifacts must not mark the step as done.
                    remove_if_exists(&files.output, "empty output")?;
                    attempt.status = StepStatus::Failed;
                    attempt.returncode = Some(0);
                    attempt.note = Some("agent exited successfully without writing output".to_string());
                    attempt.error_log = error_excerpt(ctx, &files.error_log, stdout, stderr)?;
                }
            }
        }
        AgentOutcome::Failed {
            code,
            stdout,
            stderr,
        } => {
            attempt.status = StepStatus::Failed;
            attempt.returncode = *code;
            attempt.note = Some(match code {
                Some(code) => format!("agent exited with code {code}"),
                None => "agent terminated without an exit code".to_string(),
            });
            attempt.error_log = error_excerpt(ctx, &files.error_log, stdout, stderr)?;
        }
        AgentOutcome::TimedOut { stdout, stderr } => {
            attempt.status = StepStatus::Timeout;
            attempt.note = Some(format!("timed out after {timeout_secs}s"));
            attempt.error_log = error_excerpt(ctx, &files.error_log, stdout, stderr)?;
        }
    }

    if attempt.status != StepStatus::Ok {
        // A response left by an unfinished attempt would read as a finished step.
        remove_if_exists(&files.response, "partial response")?;
    }
    record_attempt(ctx, &files.prompt, &files.output, &attempt)?;
    match attempt.status {
        StepStatus::Ok => info!(step = index, role, elapsed_secs = elapsed.as_secs_f64(), "step ok"),
        status => warn!(step = index, role, status = status.as_str(), "step did not complete"),
    }
    Ok(attempt)
}

/// Append synthesized packets to dispatcher output that has none.
fn complete_dispatcher_handoff(
    ctx: &RunContext,
    index: usize,
    role: &str,
    content: String,
) -> Result<String> {
    if role != ctx.config.roles.dispatcher
        || !ctx.config.policy.auto_handoff
        || ctx.parser.has_markers(&content)
    {
        return Ok(content);
    }
    let synthesized =
        ctx.prompts
            .synthesize_handoff(&content, &ctx.brief_for_prompt, &ctx.sequence)?;
    if synthesized == content {
        return Ok(content);
    }
    let files = ctx.paths.step_files(index, role);
    write_text(&files.output, &synthesized)?;
    warn!(step = index, role, "dispatcher output had no handoff packets, synthesized them");
    record(
        ctx,
        Event::step(EventKind::HandoffAutoGenerated, index, role).with_output(&files.output),
    )?;
    Ok(synthesized)
}

fn remove_if_exists(path: &Path, what: &str) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("remove {what} {}", path.display()))?;
    }
    Ok(())
}

fn error_excerpt(
    ctx: &RunContext,
    path: &Path,
    stdout: &str,
    stderr: &str,
) -> Result<Option<PathBuf>> {
    let written = write_error_log(path, stdout, stderr, ctx.config.limits.tail_chars)?;
    Ok(written.then(|| path.to_path_buf()))
}

fn record_attempt(
    ctx: &RunContext,
    prompt: &Path,
    output: &Path,
    attempt: &StepAttempt,
) -> Result<()> {
    let succeeded = attempt.status == StepStatus::Ok;
    let elapsed = attempt.elapsed.as_secs_f64();
    append_step_entry(
        &ctx.paths.run_log,
        &StepEntry {
            output: succeeded.then_some(output),
            error_log: attempt.error_log.as_deref(),
            elapsed_secs: Some(elapsed),
            timeout_secs: Some(attempt.timeout_secs),
            note: attempt.note.as_deref(),
            ..StepEntry::new(attempt.index, &attempt.role, attempt.status, prompt)
        },
    )?;

    let kind = match attempt.status {
        StepStatus::Ok => EventKind::Ok,
        StepStatus::Timeout => EventKind::Timeout,
        _ => EventKind::Failed,
    };
    let mut event = Event::step(kind, attempt.index, &attempt.role)
        .with_prompt(prompt)
        .with_elapsed(elapsed)
        .with_timeout(Some(attempt.timeout_secs))
        .with_returncode(attempt.returncode)
        .with_error_log(attempt.error_log.as_deref());
    if succeeded {
        event = event.with_output(output);
    }
    if let Some(note) = &attempt.note {
        event = event.with_note(note.clone());
    }
    record(ctx, event)
}

/// Append `event` unless the run is a dry run.
pub(crate) fn record(ctx: &RunContext, event: Event) -> Result<()> {
    if ctx.dry_run {
        return Ok(());
    }
    append_event(&ctx.paths.events_log, &event)
}
