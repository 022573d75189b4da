//! Orchestration for walking a run's sequence in-process.
//!
//! Steps run strictly in index order. Steps before `start_at` and, on resume,
//! steps that already have an output artifact are replayed from disk instead
//! of executed, so the handoff history is always complete before the next
//! prompt is built.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::sequence::{apply_review_insertion, derive_from_output};
use crate::core::types::StepStatus;
use crate::errors::ConfigError;
use crate::io::agent::Agent;
use crate::io::events::{Event, EventKind};
use crate::io::run_dir::{materialize_output, select_output};
use crate::io::run_log::{
    StepEntry, append_abort, append_sequence_update, append_step_entry, append_stop,
};
use crate::start::RunContext;
use crate::step::{StepRequest, build_step_prompt, execute_step, record};

/// Options for one walk.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// First step to execute (1-based). Earlier steps must already have output.
    pub start_at: usize,
    /// Stop once this many steps have executed in this walk. Zero means no limit.
    pub stop_after: Option<usize>,
    /// Re-execute steps that already have output.
    pub force: bool,
    /// Per-step timeout; the configured one when `None`.
    pub timeout_secs: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_at: 1,
            stop_after: None,
            force: false,
            timeout_secs: None,
        }
    }
}

/// Reason why [`run_steps`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Every step of the sequence has output.
    Completed,
    /// The `stop_after` budget was used up with steps still pending.
    StepBudget { executed: usize },
    Failed {
        step: usize,
        role: String,
        code: Option<i32>,
    },
    TimedOut {
        step: usize,
        role: String,
        timeout_secs: u64,
    },
}

/// Prompt that a dry run would have sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPreview {
    pub index: usize,
    pub role: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Steps executed (or previewed) by this walk; replayed steps excluded.
    pub executed: usize,
    pub stop: RunStop,
    /// Sequence at the end of the walk.
    pub sequence: Vec<String>,
    pub previews: Vec<PromptPreview>,
}

/// Walk the sequence of an opened run.
///
/// Errors (gaps before `start_at`, derivation failures, strict handoff
/// violations, I/O) abort the walk and are recorded in the run log and event
/// log before being returned. Step failures and timeouts are outcomes.
pub fn run_steps<A: Agent>(
    ctx: &mut RunContext,
    agent: &A,
    options: &RunOptions,
) -> Result<RunOutcome> {
    let result = walk(ctx, agent, options);
    if let Err(err) = &result
        && !ctx.dry_run
        && ctx.paths.dir.is_dir()
    {
        if let Err(log_err) = record_abort(ctx, &format!("{err:#}")) {
            warn!(err = %format!("{log_err:#}"), "failed to record abort");
        }
    }
    result
}

fn record_abort(ctx: &RunContext, message: &str) -> Result<()> {
    append_abort(&ctx.paths.run_log, message)?;
    record(ctx, Event::new(EventKind::Aborted).with_note(message))
}

fn walk<A: Agent>(ctx: &mut RunContext, agent: &A, options: &RunOptions) -> Result<RunOutcome> {
    if options.start_at == 0 {
        return Err(ConfigError::new("start-at must be at least 1").into());
    }
    let timeout_secs = options
        .timeout_secs
        .unwrap_or_else(|| ctx.config.effective_timeout_secs());

    let mut history: Vec<String> = Vec::new();
    let mut previews = Vec::new();
    let mut executed = 0usize;
    let mut index = 1usize;

    while index <= ctx.sequence.len() {
        let role = ctx.sequence[index - 1].clone();
        let files = ctx.paths.step_files(index, &role);

        let replay = if index < options.start_at {
            if !files.has_output() {
                return Err(ConfigError::new(format!(
                    "cannot start at step {}: step {index} ({role}) has no output",
                    options.start_at
                ))
                .into());
            }
            Some(StepStatus::SkippedBeforeStart)
        } else if ctx.resumed && !options.force && files.has_output() {
            Some(StepStatus::SkippedExisting)
        } else {
            None
        };

        if let Some(status) = replay {
            if !ctx.dry_run {
                materialize_output(&files, false)?;
            }
            let content = select_output(&files, &ctx.parser)?.unwrap_or_default();
            debug!(step = index, role = %role, status = status.as_str(), "replaying step");
            if !ctx.dry_run {
                append_step_entry(
                    &ctx.paths.run_log,
                    &StepEntry {
                        output: Some(&files.output),
                        ..StepEntry::new(index, &role, status, &files.prompt)
                    },
                )?;
                let kind = match status {
                    StepStatus::SkippedBeforeStart => EventKind::SkippedBeforeStart,
                    _ => EventKind::SkippedExisting,
                };
                record(ctx, Event::step(kind, index, &role).with_output(&files.output))?;
            }
            maybe_derive(ctx, index, &role, &content)?;
            history.push(content);
            index += 1;
            continue;
        }

        if let Some(limit) = options.stop_after.filter(|n| *n > 0)
            && executed >= limit
        {
            info!(executed, "step budget reached");
            if !ctx.dry_run {
                append_stop(&ctx.paths.run_log, executed)?;
                record(ctx, Event::new(EventKind::Stopped).with_executed(executed))?;
            }
            return Ok(outcome(ctx, executed, RunStop::StepBudget { executed }, previews));
        }

        let prompt = build_step_prompt(ctx, index, &role, &history)?;
        if ctx.dry_run {
            previews.push(PromptPreview {
                index,
                role,
                prompt,
            });
            history.push(String::new());
            executed += 1;
            index += 1;
            continue;
        }

        let attempt = execute_step(
            ctx,
            agent,
            &StepRequest {
                index,
                role: &role,
                prompt: &prompt,
                timeout_secs,
                force: options.force,
            },
        )?;
        match attempt.status {
            StepStatus::Ok => {
                executed += 1;
                let content = attempt.content.unwrap_or_default();
                maybe_derive(ctx, index, &role, &content)?;
                history.push(content);
            }
            StepStatus::Timeout => {
                let stop = RunStop::TimedOut {
                    step: index,
                    role,
                    timeout_secs,
                };
                return Ok(outcome(ctx, executed, stop, previews));
            }
            _ => {
                let stop = RunStop::Failed {
                    step: index,
                    role,
                    code: attempt.returncode,
                };
                return Ok(outcome(ctx, executed, stop, previews));
            }
        }
        index += 1;
    }

    Ok(outcome(ctx, executed, RunStop::Completed, previews))
}

fn outcome(
    ctx: &RunContext,
    executed: usize,
    stop: RunStop,
    previews: Vec<PromptPreview>,
) -> RunOutcome {
    RunOutcome {
        executed,
        stop,
        sequence: ctx.sequence.clone(),
        previews,
    }
}

/// Replace the sequence with the one derived from the dispatcher's output.
///
/// Only the first step of a run whose sequence comes from output derives.
/// Re-deriving from the same output is a no-op, and a derivation shorter than
/// the current sequence is ignored so the sequence never shrinks.
fn maybe_derive(ctx: &mut RunContext, index: usize, role: &str, content: &str) -> Result<()> {
    let roles = &ctx.config.roles;
    if index != 1 || !ctx.config.sequence_from_output || role != roles.dispatcher {
        return Ok(());
    }
    if ctx.dry_run && content.is_empty() {
        debug!("dry run: sequence not derived");
        return Ok(());
    }

    let mut derived = derive_from_output(content, &roles.dispatcher, &ctx.parser)?;
    if ctx.config.policy.auto_reviewer {
        derived = apply_review_insertion(&derived, roles);
    }
    if derived == ctx.sequence {
        return Ok(());
    }
    if derived.len() < ctx.sequence.len() {
        warn!(
            current = ?ctx.sequence,
            derived = ?derived,
            "derived sequence is shorter than the current one, keeping current"
        );
        return Ok(());
    }

    info!(sequence = ?derived, "sequence derived from dispatcher output");
    ctx.sequence = derived;
    if !ctx.dry_run {
        append_sequence_update(
            &ctx.paths.run_log,
            &ctx.sequence,
            "derived from dispatcher output",
        )?;
        record(
            ctx,
            Event::step(EventKind::SequenceDerived, index, role).with_sequence(&ctx.sequence),
        )?;
    }
    Ok(())
}
