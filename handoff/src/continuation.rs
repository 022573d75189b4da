//! Supervisory driver for `handoff continue`.
//!
//! The driver runs exactly one pending step per attempt and recomputes the
//! position from artifact presence before every attempt, so a driver that
//! crashed (or was killed) resumes by simply being started again. Timeouts
//! are retried at the same index with a doubled, capped timeout.

use anyhow::Result;
use tracing::{info, warn};

use crate::core::backoff::TimeoutBackoff;
use crate::exit_codes;
use crate::io::agent::Agent;
use crate::io::config::RunConfig;
use crate::io::events::{Event, EventKind};
use crate::io::run_log::{append_line, declared_sequence};
use crate::run::{RunOptions, RunStop, run_steps};
use crate::select::{SelectOutcome, find_next_step};
use crate::start::RunContext;
use crate::step::record;

/// Driver settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub initial_timeout_secs: u64,
    pub retry_on_timeout: bool,
    pub timeout_max_secs: u64,
    /// Stop after this many executed steps. Zero means no limit.
    pub max_steps: Option<usize>,
}

impl DriverConfig {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            initial_timeout_secs: config.effective_timeout_secs(),
            retry_on_timeout: config.retry.retry_on_timeout,
            timeout_max_secs: config.retry.timeout_max_secs,
            max_steps: None,
        }
    }
}

/// Reason why [`continue_run`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinueStop {
    Completed,
    MaxSteps {
        max_steps: usize,
    },
    Failed {
        step: usize,
        role: String,
        code: Option<i32>,
    },
    /// Timed out with retries disabled or the cap already reached.
    TimedOut {
        step: usize,
        role: String,
        timeout_secs: u64,
    },
}

/// Summary of a driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinueOutcome {
    pub steps_executed: usize,
    /// Attempts made, retries included.
    pub attempts: usize,
    pub stop: ContinueStop,
}

/// One finished attempt, reported to the caller's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverAttempt {
    pub index: usize,
    pub role: String,
    pub timeout_secs: u64,
    pub stop: RunStop,
    /// Timeout of the retry scheduled after this attempt, if any.
    pub retry_timeout_secs: Option<u64>,
}

/// Drive an opened run until it completes, fails, times out for good, or
/// uses up `max_steps`.
pub fn continue_run<A: Agent, F: FnMut(&DriverAttempt)>(
    ctx: &mut RunContext,
    agent: &A,
    driver: &DriverConfig,
    mut on_attempt: F,
) -> Result<ContinueOutcome> {
    let mut backoff = TimeoutBackoff::new(
        driver.initial_timeout_secs,
        driver.timeout_max_secs,
        driver.retry_on_timeout,
    );
    let mut steps_executed = 0usize;
    let mut attempts = 0usize;

    loop {
        if let Some(declared) = declared_sequence(&ctx.paths.run_log)? {
            ctx.sequence = declared;
        }
        let (index, role) = match find_next_step(&ctx.paths, &ctx.sequence) {
            SelectOutcome::Complete { total } => {
                info!(total, steps_executed, "run complete");
                return Ok(ContinueOutcome {
                    steps_executed,
                    attempts,
                    stop: ContinueStop::Completed,
                });
            }
            SelectOutcome::Pending { index, role, .. } => (index, role),
        };
        // Zero means no limit.
        if let Some(max_steps) = driver.max_steps.filter(|n| *n > 0)
            && steps_executed >= max_steps
        {
            return Ok(ContinueOutcome {
                steps_executed,
                attempts,
                stop: ContinueStop::MaxSteps { max_steps },
            });
        }

        let timeout_secs = backoff.current_secs();
        attempts += 1;
        append_line(
            &ctx.paths.driver_log,
            &format!("Running step {index} ({role}) with timeout {timeout_secs}s"),
        )?;
        let outcome = run_steps(
            ctx,
            agent,
            &RunOptions {
                start_at: index,
                stop_after: Some(1),
                force: false,
                timeout_secs: Some(timeout_secs),
            },
        )?;
        append_line(
            &ctx.paths.driver_log,
            &format!("Exit code: {}", exit_code(&outcome.stop)),
        )?;
        steps_executed += outcome.executed;

        let mut report = DriverAttempt {
            index,
            role: role.clone(),
            timeout_secs,
            stop: outcome.stop.clone(),
            retry_timeout_secs: None,
        };
        match outcome.stop {
            RunStop::Completed | RunStop::StepBudget { .. } => {
                on_attempt(&report);
                if outcome.executed == 0 {
                    return Ok(ContinueOutcome {
                        steps_executed,
                        attempts,
                        stop: ContinueStop::Completed,
                    });
                }
            }
            RunStop::Failed { step, role, code } => {
                on_attempt(&report);
                return Ok(ContinueOutcome {
                    steps_executed,
                    attempts,
                    stop: ContinueStop::Failed { step, role, code },
                });
            }
            RunStop::TimedOut {
                step,
                role,
                timeout_secs,
            } => match backoff.escalate() {
                Some(next) => {
                    warn!(step, role = %role, timeout_secs, next, "step timed out, retrying");
                    append_line(
                        &ctx.paths.driver_log,
                        &format!("Timeout at step {step} ({role}); retrying with timeout {next}s"),
                    )?;
                    record(
                        ctx,
                        Event::step(EventKind::TimeoutRetry, step, &role)
                            .with_timeout(Some(next))
                            .with_note(format!("previous timeout {timeout_secs}s")),
                    )?;
                    report.retry_timeout_secs = Some(next);
                    on_attempt(&report);
                }
                None => {
                    on_attempt(&report);
                    return Ok(ContinueOutcome {
                        steps_executed,
                        attempts,
                        stop: ContinueStop::TimedOut {
                            step,
                            role,
                            timeout_secs,
                        },
                    });
                }
            },
        }
    }
}

fn exit_code(stop: &RunStop) -> i32 {
    match stop {
        RunStop::Completed | RunStop::StepBudget { .. } => exit_codes::OK,
        RunStop::Failed { .. } => exit_codes::FAILED,
        RunStop::TimedOut { .. } => exit_codes::TIMEOUT,
    }
}
