//! Agent abstraction for step invocation.
//!
//! The [`Agent`] trait decouples step orchestration from the actual backend
//! (currently `codex exec`). Tests use a scripted agent that replays canned
//! replies without spawning processes.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::errors::ConfigError;
use crate::io::config::AgentConfig;
use crate::io::process::run_command_with_timeout;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: String,
    /// Prompt text fed to the agent on stdin.
    pub prompt: String,
    pub workdir: PathBuf,
    /// Where the agent must write its final message.
    pub response_path: PathBuf,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// `key=value` pairs passed as `-c` overrides.
    pub config_overrides: Vec<String>,
    pub output_limit_bytes: usize,
}

/// How an invocation ended. Failures and timeouts are outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Completed {
        stdout: String,
        stderr: String,
    },
    Failed {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        stdout: String,
        stderr: String,
    },
}

/// Abstraction over agent backends.
pub trait Agent {
    /// Fail with a [`ConfigError`] when the backend cannot be invoked at all.
    fn ensure_available(&self) -> Result<()>;

    /// Run the agent. On success the final message is at `request.response_path`.
    fn run(&self, request: &AgentRequest) -> Result<AgentOutcome>;
}

/// Agent that spawns `codex exec`.
#[derive(Debug, Clone)]
pub struct CodexAgent {
    binary: String,
    model: Option<String>,
    sandbox: Option<String>,
    full_auto: bool,
}

impl CodexAgent {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            model: config.model.clone(),
            sandbox: config.sandbox.clone(),
            full_auto: config.full_auto,
        }
    }

    fn command(&self, request: &AgentRequest) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("exec")
            .arg("-C")
            .arg(&request.workdir)
            .arg("--output-last-message")
            .arg(&request.response_path);
        for item in &request.config_overrides {
            cmd.arg("-c").arg(item);
        }
        if let Some(model) = &self.model {
            cmd.arg("-m").arg(model);
        }
        if let Some(sandbox) = &self.sandbox {
            cmd.arg("-s").arg(sandbox);
        }
        if self.full_auto {
            cmd.arg("--full-auto");
        }
        cmd.arg("-");
        cmd
    }
}

impl Agent for CodexAgent {
    fn ensure_available(&self) -> Result<()> {
        if find_executable(&self.binary).is_none() {
            return Err(anyhow::Error::new(ConfigError::new(format!(
                "{} CLI not found in PATH",
                self.binary
            ))));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(role = %request.role, timeout_secs = request.timeout.map(|t| t.as_secs())))]
    fn run(&self, request: &AgentRequest) -> Result<AgentOutcome> {
        info!(workdir = %request.workdir.display(), "starting codex exec");
        if let Some(parent) = request.response_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create response dir {}", parent.display()))?;
        }

        let output = run_command_with_timeout(
            self.command(request),
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run codex exec")?;

        let stdout = output.stdout_text();
        let stderr = output.stderr_text();
        if output.timed_out {
            warn!("codex exec timed out");
            return Ok(AgentOutcome::TimedOut { stdout, stderr });
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "codex exec failed");
            return Ok(AgentOutcome::Failed {
                code: output.status.code(),
                stdout,
                stderr,
            });
        }
        debug!("codex exec completed successfully");
        Ok(AgentOutcome::Completed { stdout, stderr })
    }
}

/// Resolve `binary` the way a shell would: paths are checked directly, bare
/// names are searched on `PATH`.
fn find_executable(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|full| full.is_file())
}
