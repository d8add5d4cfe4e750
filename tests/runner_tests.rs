//! Resumability tests for the step runner against the on-disk ledger
//!
//! Each test uses a fresh temporary marker directory and re-opens it to
//! simulate separate invocations of the provisioner.

use std::cell::Cell;
use std::rc::Rc;

use deskstrap::{
    schedule_restart_if_needed, ActionContext, ActionOutcome, CompletionLedger, DirLedger,
    FailurePolicy, MarkerKey, RecordingReporter, RestartCommand, RestartDecision, Step,
    StepOutcome, StepRunner,
};

fn key(s: &str) -> MarkerKey {
    MarkerKey::new(s).unwrap()
}

/// Step that counts its invocations and fails while `fail` is set
fn counted_step(name: &str, calls: &Rc<Cell<u32>>, fail: &Rc<Cell<bool>>) -> Step {
    let calls = Rc::clone(calls);
    let fail = Rc::clone(fail);
    let message = format!("{} broke", name);
    Step::from_fn(name, key(&name.to_lowercase()), move |_ctx: &ActionContext| {
        calls.set(calls.get() + 1);
        if fail.get() {
            anyhow::bail!("{}", message);
        }
        Ok(ActionOutcome::Completed)
    })
}

fn runner(dir: &std::path::Path) -> StepRunner<DirLedger, RecordingReporter> {
    StepRunner::new(
        DirLedger::open(dir).unwrap(),
        RecordingReporter::new(),
        ActionContext::default(),
    )
}

#[test]
fn test_successful_step_writes_marker_and_logs_ok() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner(dir.path());
    let step = Step::from_fn("A", key("a"), |_ctx: &ActionContext| Ok(ActionOutcome::Completed));

    let outcome = runner.run_step(&step);

    assert_eq!(outcome, StepOutcome::Succeeded { reboot_required: false });
    assert!(dir.path().join("a").is_file());
    assert_eq!(runner.reporter().lines, vec!["---- A ----", "A : OK"]);
}

#[test]
fn test_existing_marker_skips_without_invoking() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"").unwrap();
    let calls = Rc::new(Cell::new(0));
    let step = counted_step("A", &calls, &Rc::new(Cell::new(false)));
    let mut runner = runner(dir.path());

    assert_eq!(runner.run_step(&step), StepOutcome::Skipped);
    assert_eq!(calls.get(), 0);
    assert_eq!(runner.reporter().lines, vec!["A : already completed, skipping"]);
}

#[test]
fn test_failure_halts_and_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let after = Rc::new(Cell::new(0));
    let steps = vec![
        Step::from_fn("A", key("a"), |_ctx: &ActionContext| Ok(ActionOutcome::Completed)),
        Step::from_fn("B", key("b"), |_ctx: &ActionContext| anyhow::bail!("disk full")),
        counted_step("C", &after, &Rc::new(Cell::new(false))),
    ];
    let mut runner = runner(dir.path());

    let report = runner.run_catalog(&steps, FailurePolicy::Halt);

    assert!(!report.is_success());
    assert_eq!(report.halted_at.as_deref(), Some("B"));
    assert_eq!(report.records.len(), 2);
    assert_eq!(after.get(), 0);
    assert!(runner.reporter().contains("B : FAILED - disk full"));
    assert_eq!(runner.ledger().keys().unwrap(), vec![key("a")]);
}

#[test]
fn test_rerun_after_failure_resumes_at_failed_step() {
    let dir = tempfile::tempdir().unwrap();
    let counters: Vec<Rc<Cell<u32>>> = (0..4).map(|_| Rc::new(Cell::new(0))).collect();
    let ok = Rc::new(Cell::new(false));
    let broken = Rc::new(Cell::new(true));
    let steps = vec![
        counted_step("One", &counters[0], &ok),
        counted_step("Two", &counters[1], &ok),
        counted_step("Three", &counters[2], &broken),
        counted_step("Four", &counters[3], &ok),
    ];

    // First invocation stops at step three
    let first = runner(dir.path()).run_catalog(&steps, FailurePolicy::Halt);
    assert_eq!(first.halted_at.as_deref(), Some("Three"));

    // Operator fixes the problem and runs again with a fresh process
    broken.set(false);
    let mut second_runner = runner(dir.path());
    let second = second_runner.run_catalog(&steps, FailurePolicy::Halt);

    assert!(second.is_success());
    let outcomes: Vec<&StepOutcome> = second.records.iter().map(|r| &r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            &StepOutcome::Skipped,
            &StepOutcome::Skipped,
            &StepOutcome::Succeeded { reboot_required: false },
            &StepOutcome::Succeeded { reboot_required: false },
        ]
    );
    let calls: Vec<u32> = counters.iter().map(|c| c.get()).collect();
    assert_eq!(calls, vec![1, 1, 2, 1]);
}

#[test]
fn test_markers_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Rc::new(Cell::new(0));
    let step = counted_step("Fonts", &calls, &Rc::new(Cell::new(false)));

    runner(dir.path()).run_step(&step);
    runner(dir.path()).run_step(&step);
    runner(dir.path()).run_step(&step);

    assert_eq!(calls.get(), 1);
}

#[test]
fn test_reboot_request_schedules_restart_only_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let flag = dir.path().join("restart-requested");
    let restart = RestartCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), format!("touch '{}'", flag.display())],
    };

    let quiet = vec![Step::from_fn("Fonts", key("fonts"), |_ctx: &ActionContext| {
        Ok(ActionOutcome::Completed)
    })];
    let report = runner(&dir.path().join("m1")).run_catalog(&quiet, FailurePolicy::Halt);
    assert!(!report.reboot_requested);
    assert_eq!(
        schedule_restart_if_needed(&report, &restart, false).unwrap(),
        RestartDecision::NotNeeded
    );
    assert!(!flag.exists());

    let needy = vec![
        Step::from_fn("Runtime", key("runtime"), |_ctx: &ActionContext| {
            Ok(ActionOutcome::RebootRequired)
        }),
        Step::from_fn("Fonts", key("fonts"), |_ctx: &ActionContext| Ok(ActionOutcome::Completed)),
    ];
    let report = runner(&dir.path().join("m2")).run_catalog(&needy, FailurePolicy::Halt);
    assert!(report.reboot_requested);
    assert_eq!(
        schedule_restart_if_needed(&report, &restart, false).unwrap(),
        RestartDecision::Scheduled
    );
    assert!(flag.exists());
}

#[test]
fn test_continue_policy_reports_every_failure() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![
        Step::from_fn("A", key("a"), |_ctx: &ActionContext| anyhow::bail!("first")),
        Step::from_fn("B", key("b"), |_ctx: &ActionContext| Ok(ActionOutcome::Completed)),
        Step::from_fn("C", key("c"), |_ctx: &ActionContext| anyhow::bail!("second")),
    ];
    let mut runner = runner(dir.path());

    let report = runner.run_catalog(&steps, FailurePolicy::Continue);

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.halted_at, None);
    let failed: Vec<&str> = report.failures().map(|r| r.name.as_str()).collect();
    assert_eq!(failed, vec!["A", "C"]);
    assert_eq!(runner.ledger().keys().unwrap(), vec![key("b")]);
}
