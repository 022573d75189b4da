//! Orchestration for opening a run.
//!
//! A "run" is one execution of a role sequence against a brief, identified by
//! its directory. Opening a run validates the configuration, resolves the
//! sequence, and creates (or resumes) the directory with its run log.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info, warn};

use crate::core::brief::summarize_brief;
use crate::core::handoff::HandoffParser;
use crate::core::sequence::apply_review_insertion;
use crate::errors::ConfigError;
use crate::io::agent::Agent;
use crate::io::config::{RunConfig, write_config};
use crate::io::prompt::PromptBuilder;
use crate::io::run_dir::{RunPaths, default_run_dir, read_text, write_text};
use crate::io::run_log::{append_resume_marker, declared_sequence, init_run_log};

/// Fresh run vs. resume.
#[derive(Debug, Clone, Default)]
pub struct RunSelection {
    /// Existing run directory to resume.
    pub resume: Option<PathBuf>,
    /// Directory for a fresh run (default `runs/<timestamp>`).
    pub out: Option<PathBuf>,
}

/// Everything a run needs after it is opened.
pub struct RunContext {
    pub paths: RunPaths,
    pub config: RunConfig,
    /// Brief as embedded in prompts (shortened when short prompts are on).
    pub brief_for_prompt: String,
    pub parser: HandoffParser,
    pub prompts: PromptBuilder,
    /// Current sequence. Grows when derived from dispatcher output.
    pub sequence: Vec<String>,
    /// Existing step artifacts are skipped instead of re-executed.
    pub resumed: bool,
    /// Nothing is written and no agent is invoked.
    pub dry_run: bool,
}

/// Options for [`open_run`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub selection: RunSelection,
    pub dry_run: bool,
    /// Recorded in the run log header.
    pub stop_after: Option<usize>,
}

/// Validate `config` and open the run directory.
///
/// Fails with a [`ConfigError`] before anything is written when the brief is
/// missing, the agent is unavailable (checked unless dry-run), or a resume
/// directory does not exist. On resume the sequence last declared in the run
/// log wins over the configured one.
pub fn open_run<A: Agent>(config: RunConfig, agent: &A, options: &OpenOptions) -> Result<RunContext> {
    config.validate()?;
    if !options.dry_run {
        agent.ensure_available()?;
    }

    let brief_path = config
        .brief
        .clone()
        .ok_or_else(|| config_error("no brief given (use --brief or set `brief` in the config file)"))?;
    if !brief_path.is_file() {
        return Err(config_error(format!(
            "brief file not found: {}",
            brief_path.display()
        )));
    }
    let brief = read_text(&brief_path)?;
    let brief_for_prompt = if config.short_prompt() {
        summarize_brief(&brief, config.prompt.short_chars)
    } else {
        brief.clone()
    };

    let mut sequence = if config.policy.auto_reviewer {
        apply_review_insertion(&config.sequence, &config.roles)
    } else {
        config.sequence.clone()
    };
    if config.sequence_from_output {
        sequence = vec![config.roles.dispatcher.clone()];
    }

    let (dir, resumed) = match &options.selection.resume {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(config_error(format!(
                    "resume directory not found: {}",
                    dir.display()
                )));
            }
            (dir.clone(), true)
        }
        None => {
            let dir = options
                .selection
                .out
                .clone()
                .unwrap_or_else(|| default_run_dir(Path::new("."), Local::now()));
            (dir, false)
        }
    };
    let paths = RunPaths::new(&dir);

    if resumed && let Some(declared) = declared_sequence(&paths.run_log)? {
        debug!(sequence = ?declared, "using sequence declared in run log");
        sequence = declared;
    }

    warn_missing_skills(config.skills_dir.as_deref(), &sequence);

    if !options.dry_run {
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create run dir {}", paths.dir.display()))?;
        if resumed && paths.run_log.exists() {
            append_resume_marker(&paths.run_log)?;
        } else {
            init_run_log(
                &paths.run_log,
                &config,
                &sequence,
                &brief_path,
                options.stop_after,
            )?;
        }
        if !paths.brief_copy.exists() {
            write_text(&paths.brief_copy, &brief)?;
        }
        if !paths.config_snapshot.exists() {
            write_config(&paths.config_snapshot, &config)?;
        }
    }

    info!(dir = %paths.dir.display(), resumed, steps = sequence.len(), "run opened");
    Ok(RunContext {
        parser: HandoffParser::new(&config.markers)?,
        prompts: PromptBuilder::new(&config)?,
        paths,
        config,
        brief_for_prompt,
        sequence,
        resumed,
        dry_run: options.dry_run,
    })
}

fn config_error(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(ConfigError::new(message))
}

/// Warn about roles without an installed skill directory. Never fails.
fn warn_missing_skills(skills_dir: Option<&Path>, sequence: &[String]) {
    let Some(dir) = skills_dir.map(Path::to_path_buf).or_else(default_skills_dir) else {
        return;
    };
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "skills directory not found");
        return;
    }
    for role in sequence {
        if !dir.join(role).exists() {
            warn!(dir = %dir.display(), role = %role, "skill not found");
        }
    }
}

fn default_skills_dir() -> Option<PathBuf> {
    let home = env::var_os("CODEX_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".codex")))?;
    Some(home.join("skills"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAgent, TestRun};

    #[test]
    fn fresh_run_writes_log_brief_and_config() {
        let run = TestRun::new().expect("run");
        let ctx = open_run(run.config(), &ScriptedAgent::new(Vec::new()), &run.fresh())
            .expect("open");
        assert!(!ctx.resumed);
        assert!(ctx.paths.run_log.is_file());
        assert!(ctx.paths.config_snapshot.is_file());
        assert_eq!(
            fs::read_to_string(&ctx.paths.brief_copy).expect("brief"),
            TestRun::BRIEF
        );
        assert_eq!(
            declared_sequence(&ctx.paths.run_log).expect("declared"),
            Some(ctx.sequence.clone())
        );
    }

    #[test]
    fn missing_brief_is_a_config_error() {
        let run = TestRun::new().expect("run");
        let mut config = run.config();
        config.brief = Some(run.root().join("nope.md"));
        let err = open_run(config, &ScriptedAgent::new(Vec::new()), &run.fresh())
            .err()
            .expect("error");
        assert!(err.downcast_ref::<ConfigError>().is_some());
        assert!(!run.run_dir().exists());
    }

    #[test]
    fn unavailable_agent_is_a_config_error() {
        let run = TestRun::new().expect("run");
        let agent = ScriptedAgent::unavailable();
        let err = open_run(run.config(), &agent, &run.fresh())
            .err()
            .expect("error");
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn sequence_from_output_starts_with_dispatcher_only() {
        let run = TestRun::new().expect("run");
        let mut config = run.config();
        config.sequence_from_output = true;
        let ctx = open_run(config, &ScriptedAgent::new(Vec::new()), &run.fresh())
            .expect("open");
        assert_eq!(ctx.sequence, vec!["orchestrator"]);
    }

    #[test]
    fn resume_prefers_declared_sequence() {
        let run = TestRun::new().expect("run");
        let agent = ScriptedAgent::new(Vec::new());
        open_run(run.config(), &agent, &run.fresh()).expect("open");

        let mut changed = run.config();
        changed.sequence = vec!["orchestrator".to_string()];
        let ctx = open_run(changed, &agent, &run.resume()).expect("resume");
        assert!(ctx.resumed);
        assert_eq!(ctx.sequence.len(), run.config().sequence.len() + 2);
        let log = fs::read_to_string(&ctx.paths.run_log).expect("log");
        assert!(log.contains("## Resume"));
    }

    #[test]
    fn missing_resume_dir_is_a_config_error() {
        let run = TestRun::new().expect("run");
        let err = open_run(run.config(), &ScriptedAgent::new(Vec::new()), &run.resume())
            .err()
            .expect("error");
        assert!(err.to_string().contains("resume directory not found"));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let run = TestRun::new().expect("run");
        let options = OpenOptions {
            dry_run: true,
            ..run.fresh()
        };
        open_run(run.config(), &ScriptedAgent::unavailable(), &options).expect("open");
        assert!(!run.run_dir().exists());
    }
}
