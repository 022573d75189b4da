//! CLI tests for the `handoff` binary.
//!
//! Spawns the binary and verifies exit codes for configuration errors, dry
//! runs, next-step selection, and a fake agent on `PATH`-independent paths.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use handoff::exit_codes;

fn handoff(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_handoff"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn handoff")
}

fn write_brief(dir: &Path) -> PathBuf {
    let brief = dir.join("brief.md");
    fs::write(&brief, "# Todo app\nBuild a todo app.\n").expect("write brief");
    brief
}

#[test]
fn missing_brief_exits_with_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = handoff(temp.path(), &["run", "--brief", "nope.md", "--dry-run"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("brief file not found"), "stderr: {stderr}");
}

#[test]
fn invalid_start_at_exits_with_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_brief(temp.path());
    let output = handoff(
        temp.path(),
        &["run", "--brief", "brief.md", "--dry-run", "--start-at", "0"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
}

#[test]
fn dry_run_prints_prompts_and_writes_nothing() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_brief(temp.path());
    let output = handoff(
        temp.path(),
        &[
            "run",
            "--brief",
            "brief.md",
            "--sequence",
            "orchestrator,designer",
            "--no-auto-reviewer",
            "--dry-run",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("===== orchestrator =====\n[orchestrator]"));
    assert!(stdout.contains("===== designer =====\n[designer]"));
    assert!(!temp.path().join("runs").exists());
}

#[test]
fn next_reports_pending_step() {
    let temp = tempfile::tempdir().expect("tempdir");
    let run_dir = temp.path().join("run");
    fs::create_dir_all(&run_dir).expect("mkdir");
    fs::write(run_dir.join("01-orchestrator.md"), "plan").expect("write");

    let output = handoff(
        temp.path(),
        &["next", "--run", "run", "--sequence", "orchestrator,designer"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "2 designer (2/2)\n");

    let output = handoff(temp.path(), &["next", "--run", "run"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
}

#[cfg(unix)]
mod fake_agent {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable fake agent and a config file pointing at it.
    fn install(dir: &Path, body: &str) {
        let script = dir.join("fake-codex");
        fs::write(&script, format!("#!/bin/sh\n{body}")).expect("write script");
        let mut perms = fs::metadata(&script).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).expect("chmod");
        fs::write(
            dir.join("handoff.toml"),
            format!("[agent]\nbinary = \"{}\"\n", script.display()),
        )
        .expect("write config");
    }

    const RESPOND: &str = r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output-last-message" ]; then out="$2"; shift; fi
  shift
done
cat > /dev/null
printf 'Next assignee: designer\n' > "$out"
"#;

    #[test]
    fn step_budget_exits_ok_and_leaves_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_brief(temp.path());
        install(temp.path(), RESPOND);
        let output = handoff(
            temp.path(),
            &[
                "run",
                "--brief",
                "brief.md",
                "--sequence",
                "orchestrator,designer",
                "--out",
                "run",
                "--stop-after",
                "1",
            ],
        );
        assert_eq!(
            output.status.code(),
            Some(exit_codes::OK),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        let run_dir = temp.path().join("run");
        assert_eq!(
            fs::read_to_string(run_dir.join("01-orchestrator.md")).expect("output"),
            "Next assignee: designer\n"
        );
        assert!(run_dir.join("runlog.md").is_file());
        assert!(run_dir.join("events.jsonl").is_file());
    }

    #[test]
    fn timeout_exits_with_timeout_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_brief(temp.path());
        install(temp.path(), "exec sleep 5\n");
        let output = handoff(
            temp.path(),
            &[
                "continue",
                "--brief",
                "brief.md",
                "--out",
                "run",
                "--timeout-seconds",
                "1",
                "--no-retry-on-timeout",
            ],
        );
        assert_eq!(output.status.code(), Some(exit_codes::TIMEOUT));
        let driver_log = fs::read_to_string(temp.path().join("run/continue.log")).expect("log");
        assert!(driver_log.contains("Exit code: 2"));
    }

    #[test]
    fn agent_failure_exits_with_failure_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_brief(temp.path());
        install(temp.path(), "cat > /dev/null\necho broken >&2\nexit 3\n");
        let output = handoff(
            temp.path(),
            &["run", "--brief", "brief.md", "--out", "run"],
        );
        assert_eq!(output.status.code(), Some(exit_codes::FAILED));
        let error_log =
            fs::read_to_string(temp.path().join("run/01-orchestrator.error.log")).expect("log");
        assert!(error_log.contains("broken"));
    }
}
