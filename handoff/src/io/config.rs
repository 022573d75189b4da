//! Run configuration stored in `handoff.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::{Markers, Roles, default_sequence};
use crate::errors::ConfigError;

/// Default config file name, resolved against the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "handoff.toml";

/// Per-step timeout when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Per-step timeout under avoid-timeout mode when none is configured.
pub const AVOID_TIMEOUT_SECS: u64 = 180;

/// Configuration override added for the implementer under avoid-timeout mode.
pub const LOW_EFFORT_OVERRIDE: &str = "model_reasoning_effort=low";

/// Run configuration (TOML).
///
/// Loaded once, overridden by CLI flags, validated, and then treated as
/// immutable for the lifetime of the process. Missing fields take defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Brief document handed to the first role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brief: Option<PathBuf>,

    /// Role order for a fresh run.
    pub sequence: Vec<String>,

    /// Start with the dispatcher alone and derive the rest from its output.
    pub sequence_from_output: bool,

    /// Explicit per-step timeout. When unset the default depends on avoid-timeout mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Installed skills directory (default: `$CODEX_HOME/skills` or `~/.codex/skills`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills_dir: Option<PathBuf>,

    pub roles: Roles,
    pub agent: AgentConfig,
    pub markers: Markers,
    pub prompt: PromptConfig,
    pub policy: PolicyConfig,
    pub retry: RetryConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable, looked up on `PATH` unless it contains a separator.
    pub binary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
    pub full_auto: bool,
    /// `key=value` pairs passed through as `-c` overrides.
    pub config_overrides: Vec<String>,
    /// Working directory handed to the agent.
    pub workdir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "codex".to_string(),
            model: None,
            sandbox: None,
            full_auto: false,
            config_overrides: Vec::new(),
            workdir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Opening paragraph placed after the role tag of every built prompt.
    pub header: String,
    /// Embed a shortened brief instead of the full text.
    pub short: bool,
    /// Character budget for the shortened brief.
    pub short_chars: usize,
    /// Injected into researcher prompts when web lookup is required.
    pub research_instruction: String,
    /// Injected into implementer prompts under avoid-timeout mode.
    pub timebox_instruction: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            header: "Write the instructions and the handoff for the request below.".to_string(),
            short: false,
            short_chars: 2000,
            research_instruction: "Always run a live web search and cite every source with its date. \
If web search is unavailable, state why, and still produce the handoff packet and the next input prompt."
                .to_string(),
            timebox_instruction: "[Timebox] Do not run long commands (dependency installs, builds, heavy tests). \
Build the smallest working skeleton, record unfinished work as TODO items, and finish."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Prompts must start with the `[role]` tag.
    pub require_handoff: bool,
    /// Repair missing handoffs (fallback prompts, tag fixes, dispatcher synthesis)
    /// instead of aborting.
    pub auto_handoff: bool,
    pub researcher_web_required: bool,
    pub auto_reviewer: bool,
    /// Conservative settings: short prompts, one step per `run`, shorter
    /// default timeout, timeboxed implementer.
    pub avoid_timeout: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            require_handoff: true,
            auto_handoff: true,
            researcher_web_required: true,
            auto_reviewer: true,
            avoid_timeout: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub retry_on_timeout: bool,
    /// Upper bound for the doubled timeout.
    pub timeout_max_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_on_timeout: true,
            timeout_max_secs: 1200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Characters of stdout/stderr kept in a step's error log.
    pub tail_chars: usize,
    /// Bytes of agent stdout/stderr kept in memory while it runs.
    pub output_limit_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            tail_chars: 4000,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            brief: None,
            sequence: default_sequence(),
            sequence_from_output: false,
            timeout_secs: None,
            skills_dir: None,
            roles: Roles::default(),
            agent: AgentConfig::default(),
            markers: Markers::default(),
            prompt: PromptConfig::default(),
            policy: PolicyConfig::default(),
            retry: RetryConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sequence.is_empty() {
            return Err(invalid("sequence must name at least one role"));
        }
        for role in &self.sequence {
            check_role(role, "sequence entry")?;
        }
        for (name, role) in [
            ("roles.dispatcher", &self.roles.dispatcher),
            ("roles.researcher", &self.roles.researcher),
            ("roles.designer", &self.roles.designer),
            ("roles.implementer", &self.roles.implementer),
            ("roles.lite_reviewer", &self.roles.lite_reviewer),
            ("roles.full_reviewer", &self.roles.full_reviewer),
        ] {
            check_role(role, name)?;
        }
        if self.sequence_from_output && !self.sequence.contains(&self.roles.dispatcher) {
            return Err(invalid(format!(
                "sequence_from_output requires '{}' in the sequence",
                self.roles.dispatcher
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(invalid("timeout_secs must be > 0"));
        }
        if self.retry.timeout_max_secs == 0 {
            return Err(invalid("retry.timeout_max_secs must be > 0"));
        }
        if self.prompt.short_chars == 0 {
            return Err(invalid("prompt.short_chars must be > 0"));
        }
        if self.limits.tail_chars == 0 {
            return Err(invalid("limits.tail_chars must be > 0"));
        }
        if self.limits.output_limit_bytes == 0 {
            return Err(invalid("limits.output_limit_bytes must be > 0"));
        }
        if self.agent.binary.trim().is_empty() {
            return Err(invalid("agent.binary must not be empty"));
        }
        for (name, label) in [
            ("markers.assignee", &self.markers.assignee),
            ("markers.prompt", &self.markers.prompt),
            ("markers.packet", &self.markers.packet),
        ] {
            if label.trim().is_empty() {
                return Err(invalid(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    /// Timeout for the first attempt of each step.
    pub fn effective_timeout_secs(&self) -> u64 {
        match self.timeout_secs {
            Some(secs) => secs,
            None if self.policy.avoid_timeout => AVOID_TIMEOUT_SECS,
            None => DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Avoid-timeout mode forces short prompts.
    pub fn short_prompt(&self) -> bool {
        self.prompt.short || self.policy.avoid_timeout
    }

    /// Agent `-c` overrides for `role`.
    pub fn overrides_for(&self, role: &str) -> Vec<String> {
        let mut overrides = self.agent.config_overrides.clone();
        if self.policy.avoid_timeout && role == self.roles.implementer {
            overrides.push(LOW_EFFORT_OVERRIDE.to_string());
        }
        overrides
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(ConfigError::new(message))
}

fn check_role(role: &str, name: &str) -> Result<()> {
    let valid = !role.is_empty()
        && role
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(invalid(format!(
            "{name} '{role}' must be non-empty and use only letters, digits, '-' or '_'"
        )));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`. Validation is left
/// to the caller so CLI overrides can be applied first.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        return Ok(RunConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
