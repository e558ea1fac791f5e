// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use std::{num::NonZeroU32, time::Duration};
use testrun_runner::{
    config::elements::{RepeatMode, RepeatPolicy},
    reporter::events::{TestStatus, TimeoutSource},
    runner::{FinishOutcome, RunPhase, StartOutcome},
    signal::InterruptSignal,
    test_spec::TestSpec,
};
use test_case::test_case;

fn policy(mode: RepeatMode, count: u32) -> RepeatPolicy {
    RepeatPolicy::new(mode, NonZeroU32::new(count).expect("count is nonzero"))
}

/// A test that appends a line to `runs` on every launch, then exits with
/// `code`.
fn counting_test(dir: &camino::Utf8Path, code: i32) -> TestSpec {
    let runs = dir.join("runs");
    sh_test("counting", &format!("echo run >> '{runs}'; exit {code}"))
}

#[test_case(RepeatMode::UntilFail, 1, 1, TestStatus::Failed; "until-fail stops on first failure")]
#[test_case(RepeatMode::UntilFail, 0, 3, TestStatus::Passed; "until-fail runs all when passing")]
#[test_case(RepeatMode::Count, 1, 3, TestStatus::Failed; "count ignores failures")]
#[test_case(RepeatMode::Count, 0, 3, TestStatus::Passed; "count runs exactly count times")]
#[test_case(RepeatMode::UntilPass, 0, 1, TestStatus::Passed; "until-pass stops on first pass")]
#[test_case(RepeatMode::UntilPass, 1, 3, TestStatus::Failed; "until-pass gives up after count")]
#[tokio::test]
async fn attempts_per_mode(
    mode: RepeatMode,
    code: i32,
    expected_runs: usize,
    expected: TestStatus,
) -> Result<()> {
    test_init();
    let dir = temp_dir()?;
    let harness = Harness::new();
    let spec = counting_test(dir.path(), code);

    assert_eq!(harness.execute(&spec, policy(mode, 3)).await, expected);
    assert_eq!(count_lines(&dir.path().join("runs")), expected_runs);

    let finalized = harness.sink.get("counting").expect("result committed");
    assert_eq!(finalized.history.attempts() as usize, expected_runs);
    assert_eq!(finalized.last.attempt as usize, expected_runs);

    // One result and one slot release, however many attempts were made.
    assert_eq!(harness.sink.len(), 1);
    assert_eq!(harness.coordinator.released().len(), 1);
    assert_eq!(harness.coordinator.completed(), 1);
    Ok(())
}

#[tokio::test]
async fn count_runs_every_attempt_with_mixed_outcomes() -> Result<()> {
    test_init();
    let dir = temp_dir()?;
    let harness = Harness::new();
    let runs = dir.path().join("runs");
    let spec = sh_test(
        "mixed",
        &format!("echo run >> '{runs}'; [ \"$TESTRUN_ATTEMPT\" != 2 ]"),
    );

    assert_eq!(
        harness.execute(&spec, policy(RepeatMode::Count, 3)).await,
        TestStatus::Passed
    );
    assert_eq!(count_lines(&runs), 3);
    let finalized = harness.sink.get("mixed").expect("result committed");
    assert_eq!(
        finalized.history.statuses(),
        [TestStatus::Passed, TestStatus::Failed, TestStatus::Passed]
    );
    assert!(finalized.history.is_flaky());
    Ok(())
}

#[tokio::test]
async fn until_pass_flaky_test() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("flaky", "[ \"$TESTRUN_ATTEMPT\" -ge 2 ]");

    assert_eq!(
        harness.execute(&spec, policy(RepeatMode::UntilPass, 5)).await,
        TestStatus::Passed
    );
    let finalized = harness.sink.get("flaky").expect("result committed");
    assert_eq!(
        finalized.history.statuses(),
        [TestStatus::Failed, TestStatus::Passed]
    );
    assert!(finalized.history.is_flaky());
    assert_eq!(finalized.history.failures(), 1);
    Ok(())
}

#[tokio::test]
async fn after_timeout_retries_only_timeouts() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test(
        "slow-once",
        "if [ \"$TESTRUN_ATTEMPT\" = 1 ]; then sleep 30; fi; exit 0",
    )
    .with_timeout(Duration::from_millis(500));

    assert_eq!(
        harness
            .execute(&spec, policy(RepeatMode::AfterTimeout, 3))
            .await,
        TestStatus::Passed
    );
    let finalized = harness.sink.get("slow-once").expect("result committed");
    assert_eq!(
        finalized.history.statuses(),
        [TestStatus::Timeout(TimeoutSource::Explicit), TestStatus::Passed]
    );
    Ok(())
}

#[tokio::test]
async fn stepwise_retry() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("twice", "echo attempt $TESTRUN_ATTEMPT");
    let mut run = harness.run(&spec).with_repeat(policy(RepeatMode::Count, 2));
    let mut interrupt = InterruptSignal::never();

    assert_eq!(run.start(1), StartOutcome::Launched);
    run.wait_for_exit(&mut interrupt).await;
    assert_eq!(run.finish(1, 1, true), FinishOutcome::RetryPending);
    assert_eq!(run.phase(), RunPhase::Retrying);
    assert_eq!(run.remaining_runs(), 1);
    assert_eq!(
        run.result().map(|result| result.output.lossy().into_owned()),
        Some("attempt 1\n".to_owned())
    );
    assert!(harness.sink.is_empty(), "nothing is committed before the last attempt");

    assert_eq!(run.start_again().await, StartOutcome::Launched);
    run.wait_for_exit(&mut interrupt).await;
    assert_eq!(
        run.finish(1, 1, true),
        FinishOutcome::Finished(TestStatus::Passed)
    );
    assert_eq!(run.remaining_runs(), 0);
    assert_eq!(
        run.result().map(|result| result.output.lossy().into_owned()),
        Some("attempt 2\n".to_owned())
    );
    drop(run);

    assert_eq!(harness.sink.len(), 1);
    assert_eq!(harness.coordinator.released().len(), 1);
    Ok(())
}

#[tokio::test]
async fn passing_attempts_update_cost() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("cheap", "exit 0");

    harness.execute(&spec, policy(RepeatMode::Count, 2)).await;
    let finalized = harness.sink.get("cheap").expect("result committed");
    let hint = finalized.cost.hint().expect("passing runs produce a hint");
    assert_eq!(hint.previous_runs, 2);
    assert!(
        finalized.cost.value() < 1.0,
        "measured duration replaces the 1s default: {}",
        finalized.cost.value()
    );
    Ok(())
}
