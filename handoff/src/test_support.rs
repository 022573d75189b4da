//! Test-only helpers: a scripted agent and a throwaway run workspace.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::errors::ConfigError;
use crate::io::agent::{Agent, AgentOutcome, AgentRequest};
use crate::io::config::RunConfig;
use crate::start::{OpenOptions, RunSelection};

/// One canned agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Exit 0 after writing the text as the final message.
    Respond(String),
    /// Exit 0 without writing a final message.
    Nothing,
    Fail { code: i32, stderr: String },
    Timeout,
    /// Write the text as the final message, then get killed by the timeout.
    TimeoutAfterWriting(String),
}

impl Reply {
    pub fn respond(text: impl Into<String>) -> Self {
        Reply::Respond(text.into())
    }

    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Reply::Fail {
            code,
            stderr: stderr.into(),
        }
    }
}

/// Agent that replays canned replies in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    replies: RefCell<VecDeque<Reply>>,
    requests: RefCell<Vec<AgentRequest>>,
    unavailable: bool,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            ..Self::default()
        }
    }

    /// An agent whose backend cannot be found.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    /// Roles invoked so far, in order.
    pub fn roles(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.role.clone())
            .collect()
    }

    pub fn assert_drained(&self) {
        let left = self.replies.borrow();
        assert!(left.is_empty(), "unused scripted replies: {left:?}");
    }
}

impl Agent for ScriptedAgent {
    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(ConfigError::new("scripted agent is unavailable").into());
        }
        Ok(())
    }

    fn run(&self, request: &AgentRequest) -> Result<AgentOutcome> {
        self.requests.borrow_mut().push(request.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .with_context(|| format!("no scripted reply left for {}", request.role))?;
        Ok(match reply {
            Reply::Respond(text) => {
                fs::write(&request.response_path, text).with_context(|| {
                    format!("write response {}", request.response_path.display())
                })?;
                AgentOutcome::Completed {
                    stdout: String::new(),
                    stderr: String::new(),
                }
            }
            Reply::Nothing => AgentOutcome::Completed {
                stdout: "done".to_string(),
                stderr: String::new(),
            },
            Reply::Fail { code, stderr } => AgentOutcome::Failed {
                code: Some(code),
                stdout: String::new(),
                stderr,
            },
            Reply::Timeout => AgentOutcome::TimedOut {
                stdout: "partial work".to_string(),
                stderr: String::new(),
            },
            Reply::TimeoutAfterWriting(text) => {
                fs::write(&request.response_path, text).with_context(|| {
                    format!("write response {}", request.response_path.display())
                })?;
                AgentOutcome::TimedOut {
                    stdout: "partial work".to_string(),
                    stderr: String::new(),
                }
            }
        })
    }
}

/// A temp workspace holding a brief and a run directory path.
pub struct TestRun {
    temp: TempDir,
}

impl TestRun {
    pub const BRIEF: &'static str = "# Todo app\nBuild a small todo app with a web UI.\n";

    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        fs::write(temp.path().join("brief.md"), Self::BRIEF).context("write brief")?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn brief_path(&self) -> PathBuf {
        self.root().join("brief.md")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root().join("run")
    }

    /// Default configuration pointed at this workspace. Skills are looked up
    /// in the workspace so nothing outside it is touched.
    pub fn config(&self) -> RunConfig {
        RunConfig {
            brief: Some(self.brief_path()),
            skills_dir: Some(self.root().join("skills")),
            agent: crate::io::config::AgentConfig {
                workdir: self.root().to_path_buf(),
                ..Default::default()
            },
            ..RunConfig::default()
        }
    }

    pub fn fresh(&self) -> OpenOptions {
        OpenOptions {
            selection: RunSelection {
                resume: None,
                out: Some(self.run_dir()),
            },
            ..OpenOptions::default()
        }
    }

    pub fn resume(&self) -> OpenOptions {
        OpenOptions {
            selection: RunSelection {
                resume: Some(self.run_dir()),
                out: None,
            },
            ..OpenOptions::default()
        }
    }
}

/// A handoff packet addressed to `role` carrying `prompt` in a fenced block.
pub fn packet(role: &str, prompt: &str) -> String {
    let body: Vec<String> = prompt.lines().map(|line| format!("  {line}")).collect();
    format!(
        "- Next assignee: {role}\n- Next input prompt (copy-paste):\n  ```\n{}\n  ```\n",
        body.join("\n")
    )
}

/// A dispatcher deliverable with one packet per role, each prompt tagged.
pub fn dispatch_plan(roles: &[&str]) -> String {
    let mut doc = String::from("# Plan\nSplit the work across roles.\n\n## Handoff packets\n");
    for (idx, role) in roles.iter().enumerate() {
        doc.push_str(&format!("\n### {}) {role}\n", idx + 1));
        doc.push_str(&packet(role, &format!("[{role}]\nDo the {role} part.")));
    }
    doc
}
