//! Run-level harness tests for full workflow scenarios.
//!
//! These tests open real run directories in temp workspaces and drive them
//! with a scripted agent: end-to-end ordering, idempotent resume, gap
//! detection, handoff repair, strict mode, and the timeout driver.

use std::fs;

use handoff::continuation::{ContinueStop, DriverConfig, continue_run};
use handoff::errors::{ConfigError, HandoffMissingError, HandoffMissingReason};
use handoff::io::config::RunConfig;
use handoff::io::events::{EventKind, read_events};
use handoff::run::{RunOptions, RunStop, run_steps};
use handoff::start::open_run;
use handoff::test_support::{Reply, ScriptedAgent, TestRun, dispatch_plan};

fn seq(roles: &[&str]) -> Vec<String> {
    roles.iter().map(|r| r.to_string()).collect()
}

fn four_role_config(run: &TestRun) -> RunConfig {
    RunConfig {
        sequence: seq(&["orchestrator", "researcher", "designer", "implementer"]),
        ..run.config()
    }
}

/// Full lifecycle: reviewers are inserted, every role gets its packet, and a
/// second invocation on the same directory executes nothing.
///
/// Executed order:
/// ```text
/// orchestrator → researcher → designer → reviewer-lite → implementer → reviewer
/// ```
#[test]
fn full_run_inserts_reviewers_and_resumes_idempotently() {
    let run = TestRun::new().expect("run");
    let expected = seq(&[
        "orchestrator",
        "researcher",
        "designer",
        "reviewer-lite",
        "implementer",
        "reviewer",
    ]);
    let agent = ScriptedAgent::new(vec![
        Reply::respond(dispatch_plan(&[
            "researcher",
            "designer",
            "reviewer-lite",
            "implementer",
            "reviewer",
        ])),
        Reply::respond("findings"),
        Reply::respond("screens"),
        Reply::respond("lite review ok"),
        Reply::respond("code"),
        Reply::respond("full review ok"),
    ]);

    let mut ctx = open_run(four_role_config(&run), &agent, &run.fresh()).expect("open");
    assert_eq!(ctx.sequence, expected);
    let outcome = run_steps(&mut ctx, &agent, &RunOptions::default()).expect("run");
    assert_eq!(outcome.stop, RunStop::Completed);
    assert_eq!(outcome.executed, 6);
    assert_eq!(agent.roles(), expected);
    agent.assert_drained();

    for (idx, role) in expected.iter().enumerate() {
        let files = ctx.paths.step_files(idx + 1, role);
        assert!(files.prompt.is_file(), "missing prompt for {role}");
        assert!(files.output.is_file(), "missing output for {role}");
        assert!(files.response.is_file(), "missing response for {role}");
    }
    let requests = agent.requests();
    assert_eq!(
        requests[2].prompt,
        "[designer]\nDo the designer part."
    );
    assert!(requests[1].prompt.starts_with("[researcher]\nAlways run a live web search"));

    // Second invocation on the same run directory.
    let idle = ScriptedAgent::new(Vec::new());
    let mut resumed = open_run(four_role_config(&run), &idle, &run.resume()).expect("resume");
    let outcome = run_steps(&mut resumed, &idle, &RunOptions::default()).expect("resume run");
    assert_eq!(outcome.stop, RunStop::Completed);
    assert_eq!(outcome.executed, 0);
    assert!(idle.requests().is_empty());

    let skipped = read_events(&resumed.paths.events_log)
        .expect("events")
        .into_iter()
        .filter(|e| e.event == EventKind::SkippedExisting)
        .count();
    assert_eq!(skipped, 6);
}

#[test]
fn resume_past_unexecuted_step_is_rejected() {
    let run = TestRun::new().expect("run");
    let agent = ScriptedAgent::new(vec![Reply::respond(dispatch_plan(&["researcher"]))]);
    let mut ctx = open_run(four_role_config(&run), &agent, &run.fresh()).expect("open");
    run_steps(
        &mut ctx,
        &agent,
        &RunOptions {
            stop_after: Some(1),
            ..RunOptions::default()
        },
    )
    .expect("first step");

    let idle = ScriptedAgent::new(Vec::new());
    let mut resumed = open_run(four_role_config(&run), &idle, &run.resume()).expect("resume");
    let err = run_steps(
        &mut resumed,
        &idle,
        &RunOptions {
            start_at: 3,
            ..RunOptions::default()
        },
    )
    .unwrap_err();
    let config_err = err.downcast_ref::<ConfigError>().expect("config error");
    assert!(config_err.message.contains("step 2 (researcher) has no output"));
    assert!(idle.requests().is_empty());
}

#[test]
fn start_at_replays_earlier_outputs_into_the_history() {
    let run = TestRun::new().expect("run");
    let agent = ScriptedAgent::new(vec![Reply::respond(dispatch_plan(&[
        "researcher",
        "designer",
    ]))]);
    let mut ctx = open_run(four_role_config(&run), &agent, &run.fresh()).expect("open");
    run_steps(
        &mut ctx,
        &agent,
        &RunOptions {
            stop_after: Some(1),
            ..RunOptions::default()
        },
    )
    .expect("dispatcher");

    let next = ScriptedAgent::new(vec![Reply::respond("findings")]);
    let mut resumed = open_run(four_role_config(&run), &next, &run.resume()).expect("resume");
    let outcome = run_steps(
        &mut resumed,
        &next,
        &RunOptions {
            start_at: 2,
            stop_after: Some(1),
            ..RunOptions::default()
        },
    )
    .expect("researcher");
    assert_eq!(outcome.stop, RunStop::StepBudget { executed: 1 });
    assert!(next.requests()[0].prompt.contains("Do the researcher part."));

    let events = read_events(&resumed.paths.events_log).expect("events");
    assert!(
        events
            .iter()
            .any(|e| e.event == EventKind::SkippedBeforeStart && e.step == Some(1))
    );
}

#[test]
fn dispatcher_prose_gets_synthesized_packets() {
    let run = TestRun::new().expect("run");
    let agent = ScriptedAgent::new(vec![
        Reply::respond("# Plan\nResearch first, then design.\n"),
        Reply::respond("findings"),
    ]);
    let mut ctx = open_run(four_role_config(&run), &agent, &run.fresh()).expect("open");
    let outcome = run_steps(
        &mut ctx,
        &agent,
        &RunOptions {
            stop_after: Some(2),
            ..RunOptions::default()
        },
    )
    .expect("run");
    assert_eq!(outcome.executed, 2);

    let researcher_prompt = &agent.requests()[1].prompt;
    assert!(researcher_prompt.starts_with("[researcher]\n"));
    assert!(researcher_prompt.contains("# Previous deliverable\n# Plan\nResearch first, then design."));

    let output = fs::read_to_string(ctx.paths.step_files(1, "orchestrator").output).expect("output");
    assert!(output.contains("Next assignee: implementer"));
    let generated = read_events(&ctx.paths.events_log)
        .expect("events")
        .into_iter()
        .filter(|e| e.event == EventKind::HandoffAutoGenerated)
        .count();
    assert_eq!(generated, 1);
}

#[test]
fn strict_mode_aborts_when_no_handoff_exists() {
    let run = TestRun::new().expect("run");
    let mut config = four_role_config(&run);
    config.policy.auto_handoff = false;
    let agent = ScriptedAgent::new(vec![Reply::respond("# Plan\nNo packets here.\n")]);
    let mut ctx = open_run(config, &agent, &run.fresh()).expect("open");

    let err = run_steps(&mut ctx, &agent, &RunOptions::default()).unwrap_err();
    let missing = err.downcast_ref::<HandoffMissingError>().expect("handoff error");
    assert_eq!(missing.step, 2);
    assert_eq!(missing.role, "researcher");
    assert_eq!(missing.reason, HandoffMissingReason::NoPrompt);

    let log = fs::read_to_string(&ctx.paths.run_log).expect("log");
    assert!(log.contains("## Abort"));
    let events = read_events(&ctx.paths.events_log).expect("events");
    assert_eq!(events.last().map(|e| e.event), Some(EventKind::Aborted));
}

#[test]
fn timeout_and_failure_are_distinct_stops() {
    let run = TestRun::new().expect("run");
    let agent = ScriptedAgent::new(vec![Reply::Timeout]);
    let mut ctx = open_run(four_role_config(&run), &agent, &run.fresh()).expect("open");
    let outcome = run_steps(&mut ctx, &agent, &RunOptions::default()).expect("run");
    assert_eq!(
        outcome.stop,
        RunStop::TimedOut {
            step: 1,
            role: "orchestrator".to_string(),
            timeout_secs: 300,
        }
    );
    let error_log = ctx.paths.step_files(1, "orchestrator").error_log;
    assert!(
        fs::read_to_string(error_log)
            .expect("error log")
            .contains("partial work")
    );

    let failing = ScriptedAgent::new(vec![Reply::fail(9, "segfault")]);
    let mut resumed = open_run(four_role_config(&run), &failing, &run.resume()).expect("resume");
    let outcome = run_steps(&mut resumed, &failing, &RunOptions::default()).expect("run");
    assert!(matches!(outcome.stop, RunStop::Failed { step: 1, code: Some(9), .. }));
}

/// Driver backoff across the whole run: 180 → 360 → 720 → 1200 on one step,
/// then the remaining steps keep the escalated timeout.
#[test]
fn driver_completes_run_through_repeated_timeouts() {
    let run = TestRun::new().expect("run");
    let mut config = four_role_config(&run);
    config.policy.auto_reviewer = false;
    config.policy.avoid_timeout = true;
    let driver = DriverConfig::from_config(&config);
    assert_eq!(driver.initial_timeout_secs, 180);

    let agent = ScriptedAgent::new(vec![
        Reply::respond(dispatch_plan(&["researcher", "designer", "implementer"])),
        Reply::Timeout,
        Reply::Timeout,
        Reply::Timeout,
        Reply::respond("findings"),
        Reply::respond("screens"),
        Reply::respond("code"),
    ]);
    let mut ctx = open_run(config, &agent, &run.fresh()).expect("open");
    let outcome = continue_run(&mut ctx, &agent, &driver, |_| {}).expect("continue");

    assert_eq!(outcome.stop, ContinueStop::Completed);
    assert_eq!(outcome.steps_executed, 4);
    let timeouts: Vec<u64> = agent
        .requests()
        .iter()
        .filter_map(|r| r.timeout.map(|t| t.as_secs()))
        .collect();
    assert_eq!(timeouts, vec![180, 180, 360, 720, 1200, 1200, 1200]);

    let implementer = agent.requests().pop().expect("request");
    assert_eq!(implementer.role, "implementer");
    assert!(implementer.prompt.lines().nth(1).expect("line").starts_with("[Timebox]"));
    assert!(
        implementer
            .config_overrides
            .contains(&"model_reasoning_effort=low".to_string())
    );
    agent.assert_drained();
}

/// A response written before the timeout kill is not a finished step: the
/// next invocation on the same directory executes that step again.
#[test]
fn timed_out_step_is_re_executed_on_resume() {
    let run = TestRun::new().expect("run");
    let agent = ScriptedAgent::new(vec![
        Reply::respond(dispatch_plan(&["researcher", "designer"])),
        Reply::TimeoutAfterWriting("half the findings".to_string()),
    ]);
    let mut ctx = open_run(four_role_config(&run), &agent, &run.fresh()).expect("open");
    let outcome = run_steps(&mut ctx, &agent, &RunOptions::default()).expect("run");
    assert!(matches!(outcome.stop, RunStop::TimedOut { step: 2, .. }));
    let researcher = ctx.paths.step_files(2, "researcher");
    assert!(!researcher.has_output());
    assert!(researcher.error_log.is_file());

    let next = ScriptedAgent::new(vec![Reply::respond("findings")]);
    let mut resumed = open_run(four_role_config(&run), &next, &run.resume()).expect("resume");
    let outcome = run_steps(
        &mut resumed,
        &next,
        &RunOptions {
            stop_after: Some(1),
            ..RunOptions::default()
        },
    )
    .expect("resume run");
    assert_eq!(outcome.executed, 1);
    assert_eq!(next.roles(), vec!["researcher"]);
    assert_eq!(
        fs::read_to_string(&researcher.output).expect("output"),
        "findings"
    );
}
