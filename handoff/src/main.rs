//! Multi-role agent workflow driver.
//!
//! Walks a sequence of roles against a brief, feeding each role the handoff
//! prompt left by the roles before it. Runs live in a directory of artifacts
//! and can be resumed at any point.

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use handoff::continuation::{ContinueStop, DriverConfig, continue_run};
use handoff::core::sequence::parse_sequence_list;
use handoff::exit_codes;
use handoff::io::agent::CodexAgent;
use handoff::io::config::{DEFAULT_CONFIG_FILE, RunConfig, load_config};
use handoff::logging;
use handoff::run::{RunOptions, RunStop, run_steps};
use handoff::select::{SelectOutcome, select_from_run_dir};
use handoff::start::{OpenOptions, RunSelection, open_run};

#[derive(Parser)]
#[command(
    name = "handoff",
    version,
    about = "Drive a sequence of agent roles that hand prompts to each other"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk the sequence in this process.
    Run {
        #[command(flatten)]
        common: CommonArgs,
        /// First step to execute (1-based); earlier steps must have output.
        #[arg(long, default_value_t = 1)]
        start_at: usize,
        /// Stop after executing this many steps (0 for no limit).
        #[arg(long)]
        stop_after: Option<usize>,
        /// Re-execute steps that already have output.
        #[arg(long)]
        force: bool,
        /// Print every prompt without invoking the agent or writing files.
        #[arg(long)]
        dry_run: bool,
    },
    /// Drive the run one step at a time, retrying timeouts with a larger budget.
    Continue {
        #[command(flatten)]
        common: CommonArgs,
        /// Stop after this many executed steps (0 for no limit).
        #[arg(long)]
        max_steps: Option<usize>,
        #[arg(long, overrides_with = "no_retry_on_timeout")]
        retry_on_timeout: bool,
        #[arg(long)]
        no_retry_on_timeout: bool,
        /// Upper bound for the doubled timeout, in seconds.
        #[arg(long)]
        timeout_max: Option<u64>,
    },
    /// Print the next pending step of a run directory.
    Next {
        #[arg(long)]
        run: PathBuf,
        /// Sequence to use when the run log declares none (comma-separated).
        #[arg(long)]
        sequence: Option<String>,
    },
}

/// Flags shared by `run` and `continue`. They override the config file.
#[derive(Args)]
struct CommonArgs {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    brief: Option<PathBuf>,
    /// Comma-separated role list.
    #[arg(long)]
    sequence: Option<String>,
    /// Derive the sequence from the dispatcher's handoff packets.
    #[arg(long)]
    sequence_from_output: bool,
    #[arg(long)]
    model: Option<String>,
    /// Extra `key=value` agent config override (repeatable).
    #[arg(long = "codex-config")]
    codex_config: Vec<String>,
    #[arg(long)]
    sandbox: Option<String>,
    #[arg(long)]
    full_auto: bool,
    /// Shorter timeout, short prompts, timeboxed implementation.
    #[arg(long)]
    avoid_timeout: bool,
    #[arg(long)]
    skills_dir: Option<PathBuf>,
    /// Working directory for the agent.
    #[arg(long = "cd")]
    workdir: Option<PathBuf>,
    #[arg(long)]
    timeout_seconds: Option<u64>,
    #[arg(long)]
    short_prompt: bool,
    #[arg(long)]
    short_prompt_chars: Option<usize>,
    #[arg(long)]
    no_require_handoff: bool,
    #[arg(long)]
    no_auto_handoff: bool,
    #[arg(long)]
    no_researcher_web_required: bool,
    #[arg(long)]
    no_auto_reviewer: bool,
    /// Resume an existing run directory.
    #[arg(long, conflicts_with = "out")]
    resume: Option<PathBuf>,
    /// Directory for a fresh run (default `runs/<timestamp>`).
    #[arg(long)]
    out: Option<PathBuf>,
}

impl CommonArgs {
    fn load(&self) -> Result<RunConfig> {
        let mut config = load_config(&self.config)?;
        if let Some(brief) = &self.brief {
            config.brief = Some(brief.clone());
        }
        if let Some(sequence) = &self.sequence {
            config.sequence = parse_sequence_list(sequence);
        }
        config.sequence_from_output |= self.sequence_from_output;
        if let Some(model) = &self.model {
            config.agent.model = Some(model.clone());
        }
        config
            .agent
            .config_overrides
            .extend(self.codex_config.iter().cloned());
        if let Some(sandbox) = &self.sandbox {
            config.agent.sandbox = Some(sandbox.clone());
        }
        config.agent.full_auto |= self.full_auto;
        if let Some(workdir) = &self.workdir {
            config.agent.workdir = workdir.clone();
        }
        if let Some(dir) = &self.skills_dir {
            config.skills_dir = Some(dir.clone());
        }
        if let Some(secs) = self.timeout_seconds {
            config.timeout_secs = Some(secs);
        }
        config.prompt.short |= self.short_prompt;
        if let Some(chars) = self.short_prompt_chars {
            config.prompt.short_chars = chars;
        }
        config.policy.avoid_timeout |= self.avoid_timeout;
        if self.no_require_handoff {
            config.policy.require_handoff = false;
        }
        if self.no_auto_handoff {
            config.policy.auto_handoff = false;
        }
        if self.no_researcher_web_required {
            config.policy.researcher_web_required = false;
        }
        if self.no_auto_reviewer {
            config.policy.auto_reviewer = false;
        }
        config.validate()?;
        Ok(config)
    }

    fn selection(&self) -> RunSelection {
        RunSelection {
            resume: self.resume.clone(),
            out: self.out.clone(),
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            common,
            start_at,
            stop_after,
            force,
            dry_run,
        } => cmd_run(&common, start_at, stop_after, force, dry_run),
        Command::Continue {
            common,
            max_steps,
            retry_on_timeout,
            no_retry_on_timeout,
            timeout_max,
        } => cmd_continue(
            &common,
            max_steps,
            retry_on_timeout,
            no_retry_on_timeout,
            timeout_max,
        ),
        Command::Next { run, sequence } => cmd_next(run, sequence.as_deref()),
    }
}

fn cmd_run(
    common: &CommonArgs,
    start_at: usize,
    stop_after: Option<usize>,
    force: bool,
    dry_run: bool,
) -> Result<i32> {
    let config = common.load()?;
    let stop_after = stop_after
        .filter(|n| *n > 0)
        .or(config.policy.avoid_timeout.then_some(1));
    let agent = CodexAgent::from_config(&config.agent);
    let mut ctx = open_run(
        config,
        &agent,
        &OpenOptions {
            selection: common.selection(),
            dry_run,
            stop_after,
        },
    )?;
    let outcome = run_steps(
        &mut ctx,
        &agent,
        &RunOptions {
            start_at,
            stop_after,
            force,
            timeout_secs: None,
        },
    )?;

    for preview in &outcome.previews {
        println!("\n===== {} =====\n{}", preview.role, preview.prompt);
    }
    if dry_run {
        return Ok(exit_codes::OK);
    }
    eprintln!("Run dir: {}", ctx.paths.dir.display());
    Ok(match outcome.stop {
        RunStop::Completed => {
            eprintln!("Completed ({} step(s) executed)", outcome.executed);
            exit_codes::OK
        }
        RunStop::StepBudget { executed } => {
            eprintln!("Stopped after {executed} executed step(s)");
            exit_codes::OK
        }
        RunStop::Failed { step, role, code } => {
            eprintln!("Step {step} ({role}) failed (exit code {code:?})");
            exit_codes::FAILED
        }
        RunStop::TimedOut {
            step,
            role,
            timeout_secs,
        } => {
            eprintln!("Step {step} ({role}) timed out after {timeout_secs}s");
            exit_codes::TIMEOUT
        }
    })
}

fn cmd_continue(
    common: &CommonArgs,
    max_steps: Option<usize>,
    retry_on_timeout: bool,
    no_retry_on_timeout: bool,
    timeout_max: Option<u64>,
) -> Result<i32> {
    let mut config = common.load()?;
    if retry_on_timeout {
        config.retry.retry_on_timeout = true;
    }
    if no_retry_on_timeout {
        config.retry.retry_on_timeout = false;
    }
    if let Some(secs) = timeout_max {
        config.retry.timeout_max_secs = secs;
    }
    let driver = DriverConfig {
        max_steps: max_steps.filter(|n| *n > 0),
        ..DriverConfig::from_config(&config)
    };
    let agent = CodexAgent::from_config(&config.agent);
    let mut ctx = open_run(
        config,
        &agent,
        &OpenOptions {
            selection: common.selection(),
            ..OpenOptions::default()
        },
    )?;
    eprintln!("Run dir: {}", ctx.paths.dir.display());

    let outcome = continue_run(&mut ctx, &agent, &driver, |attempt| {
        match attempt.retry_timeout_secs {
            Some(next) => eprintln!(
                "Step {} ({}) timed out after {}s; retrying with {next}s",
                attempt.index, attempt.role, attempt.timeout_secs
            ),
            None => eprintln!("Step {} ({}) finished", attempt.index, attempt.role),
        }
    })?;

    Ok(match outcome.stop {
        ContinueStop::Completed => {
            eprintln!("Completed ({} step(s) executed)", outcome.steps_executed);
            exit_codes::OK
        }
        ContinueStop::MaxSteps { max_steps } => {
            eprintln!("Stopped after max steps ({max_steps})");
            exit_codes::OK
        }
        ContinueStop::Failed { step, role, code } => {
            eprintln!("Step {step} ({role}) failed (exit code {code:?})");
            exit_codes::FAILED
        }
        ContinueStop::TimedOut {
            step,
            role,
            timeout_secs,
        } => {
            eprintln!("Step {step} ({role}) timed out after {timeout_secs}s");
            exit_codes::TIMEOUT
        }
    })
}

fn cmd_next(run: PathBuf, sequence: Option<&str>) -> Result<i32> {
    let fallback = sequence.map(parse_sequence_list);
    match select_from_run_dir(&run, fallback.as_deref())? {
        SelectOutcome::Complete { total } => println!("complete ({total}/{total})"),
        SelectOutcome::Pending { index, role, total } => {
            println!("{index} {role} ({index}/{total})")
        }
    }
    Ok(exit_codes::OK)
}
