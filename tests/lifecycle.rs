//! Lifecycle and contract tests for proc_pipeline.
//!
//! These probe the state machine at its edges: duplicate execution,
//! configuration while running, re-execution after completion, destruction
//! mid-run, and the user-timeout accounting law.

use std::time::{Duration, Instant};

use proc_pipeline::{Outcome, Pipeline, State, Wait, PIPE_STDOUT};

// =============================================================================
// EXECUTION GUARDS
// =============================================================================

#[test]
fn test_execute_without_commands_is_an_error() {
    let mut pipeline = Pipeline::new();
    pipeline.execute();
    assert_eq!(pipeline.state(), State::Error);
    assert_eq!(pipeline.error_string(), Some("no command has been configured"));
}

#[test]
fn test_duplicate_execute_is_a_no_op() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["sleep", "1"]));
    pipeline.execute();
    assert_eq!(pipeline.state(), State::Executing);

    // A second execute must not disturb the running pipeline.
    pipeline.execute();
    assert_eq!(pipeline.state(), State::Executing);

    pipeline.kill();
    assert!(pipeline.wait_for_exit(None));
    assert_eq!(pipeline.state(), State::Killed);
}

#[test]
fn test_configuration_is_frozen_while_executing() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["sleep", "1"]));
    pipeline.execute();

    assert!(!pipeline.add_command(&["true"]));
    assert!(!pipeline.set_command(&["true"]));
    pipeline.set_timeout(0.001); // ignored while executing

    pipeline.kill();
    assert!(pipeline.wait_for_exit(None));
    assert_eq!(pipeline.state(), State::Killed);
}

#[test]
fn test_kill_before_execute_is_a_no_op() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["true"]));
    pipeline.kill();
    assert_eq!(pipeline.state(), State::Starting);
}

#[test]
fn test_wait_for_exit_when_not_executing_succeeds() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.wait_for_exit(None));
    assert_eq!(pipeline.state(), State::Starting);
}

// =============================================================================
// RE-EXECUTION
// =============================================================================

#[test]
fn test_pipeline_can_be_executed_again() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["sh", "-c", "exit 3"]));
    pipeline.execute();
    assert!(pipeline.wait_for_exit(None));
    assert_eq!(pipeline.exit_value(), 3);

    // Same configuration, fresh run.
    pipeline.execute();
    assert!(pipeline.wait_for_exit(None));
    assert_eq!(pipeline.state(), State::Exited);
    assert_eq!(pipeline.exit_value(), 3);
}

#[test]
fn test_reconfiguration_between_runs() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["sh", "-c", "exit 5"]));
    let first = pipeline.run();
    assert_eq!(first.outcome, Outcome::Exited(5));

    assert!(pipeline.set_command(&["sh", "-c", "exit 2"]));
    let second = pipeline.run();
    assert_eq!(second.outcome, Outcome::Exited(2));
}

#[test]
fn test_error_state_clears_on_the_next_run() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["/no/such/program"]));
    pipeline.execute();
    assert_eq!(pipeline.state(), State::Error);

    assert!(pipeline.set_command(&["true"]));
    let output = pipeline.run();
    assert!(output.success(), "run failed: {:?}", output.outcome);
    assert!(pipeline.error_string().is_none());
}

// =============================================================================
// DESTRUCTION
// =============================================================================

#[test]
fn test_drop_waits_for_the_children() {
    let start = Instant::now();
    {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.add_command(&["sleep", "5"]));
        pipeline.set_timeout(0.2);
        pipeline.execute();
        // Dropped while executing: must reap, not leak.
    }
    assert!(
        start.elapsed() < Duration::from_secs(4),
        "drop took {:?}",
        start.elapsed()
    );
}

#[test]
fn test_drop_after_kill_reaps_quickly() {
    let start = Instant::now();
    {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.add_command(&["sleep", "5"]));
        pipeline.execute();
        pipeline.kill();
    }
    assert!(
        start.elapsed() < Duration::from_secs(4),
        "drop took {:?}",
        start.elapsed()
    );
}

// =============================================================================
// TIMEOUT ACCOUNTING
// =============================================================================

#[test]
fn test_user_timeout_decrement_law() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["sleep", "2"]));
    pipeline.execute();

    let initial = 0.3_f64;
    let mut remaining = initial;
    let start = Instant::now();
    let mut turns = 0;
    while turns < 50 {
        match pipeline.wait_for_data(PIPE_STDOUT, Some(&mut remaining)) {
            Wait::Timeout | Wait::Done => break,
            _ => {}
        }
        turns += 1;
    }
    let elapsed = start.elapsed().as_secs_f64();

    assert!(remaining >= 0.0);
    let consumed = initial - remaining;
    assert!(
        (consumed - elapsed).abs() < 0.1,
        "consumed {consumed}, wall clock {elapsed}"
    );

    pipeline.kill();
    assert!(pipeline.wait_for_exit(None));
}

#[test]
fn test_wait_for_exit_honours_the_user_budget() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["sleep", "2"]));
    pipeline.execute();

    let mut budget = 0.1_f64;
    // Budget expires long before the child exits.
    assert!(!pipeline.wait_for_exit(Some(&mut budget)));
    assert_eq!(pipeline.state(), State::Executing);

    pipeline.kill();
    assert!(pipeline.wait_for_exit(None));
    assert_eq!(pipeline.state(), State::Killed);
}

// =============================================================================
// OUTCOME PROJECTION
// =============================================================================

#[test]
fn test_outcome_projection_matches_the_legacy_fields() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["sh", "-c", "exit 9"]));
    assert_eq!(pipeline.outcome(), None);
    pipeline.execute();
    assert!(pipeline.wait_for_exit(None));
    assert_eq!(pipeline.outcome(), Some(Outcome::Exited(9)));
    assert_eq!(pipeline.exit_value(), 9);
    assert!(!pipeline.outcome().is_some_and(|outcome| outcome.success()));
}

#[test]
fn test_failed_outcome_carries_the_error_message() {
    let mut pipeline = Pipeline::new();
    assert!(pipeline.add_command(&["/no/such/program"]));
    pipeline.execute();
    let Some(Outcome::Failed(message)) = pipeline.outcome() else {
        panic!("expected a failed outcome, got {:?}", pipeline.outcome());
    };
    assert_eq!(Some(message.as_str()), pipeline.error_string());
}
