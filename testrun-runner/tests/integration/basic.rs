// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use testrun_runner::{
    config::elements::RepeatPolicy,
    post_process::DefectScanHook,
    reporter::events::{AbortStatus, ExitDetail, TestStatus},
    runner::{FeedControl, FinishOutcome, RunPhase, StartOutcome, TestRun},
    signal::InterruptSignal,
    test_command::{ATTEMPT_ENV, INDEX_ENV, TEST_NAME_ENV, TOTAL_ATTEMPTS_ENV},
    test_spec::{ExpressionSet, TestSpec},
};
use test_case::test_case;

#[tokio::test]
async fn passing_test_is_reported_once() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("passes", "echo hello; exit 0");

    let status = harness.execute(&spec, RepeatPolicy::once()).await;
    assert_eq!(status, TestStatus::Passed);

    let finalized = harness.sink.get("passes").expect("result committed");
    assert_eq!(finalized.last.attempt, 1);
    assert_eq!(finalized.last.exit, ExitDetail::Code(0));
    assert_eq!(finalized.last.output.raw().as_ref(), b"hello\n");
    assert_eq!(finalized.last.diagnostic, None);
    let command_line = finalized.last.command_line.as_deref().unwrap_or_default();
    ensure!(
        command_line.ends_with("sh -c 'echo hello; exit 0'"),
        "unexpected command line: {command_line}"
    );

    assert_eq!(harness.sink.len(), 1);
    assert_eq!(harness.coordinator.completed(), 1);
    assert_eq!(harness.coordinator.released().len(), 1);
    Ok(())
}

#[test_case("exit 0", TestStatus::Passed, ExitDetail::Code(0); "exit zero")]
#[test_case("exit 3", TestStatus::Failed, ExitDetail::Code(3); "exit nonzero")]
#[test_case("kill -SEGV $$", TestStatus::Crashed, ExitDetail::Abort(AbortStatus::UnixSignal(11)); "signal")]
#[tokio::test]
async fn exit_classification(script: &str, expected: TestStatus, exit: ExitDetail) -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("exit", script);

    assert_eq!(harness.execute(&spec, RepeatPolicy::once()).await, expected);
    let finalized = harness.sink.get("exit").expect("result committed");
    assert_eq!(finalized.last.exit, exit);
    Ok(())
}

#[tokio::test]
async fn stdout_and_stderr_are_interleaved() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test(
        "streams",
        "echo out; sleep 0.1; echo err >&2; sleep 0.1; printf 'no newline'",
    );

    harness.execute(&spec, RepeatPolicy::once()).await;
    let finalized = harness.sink.get("streams").expect("result committed");
    let output = finalized.last.output.lossy();
    for line in ["out\n", "err\n"] {
        ensure!(output.contains(line), "missing {line:?} in {output:?}");
    }
    ensure!(output.ends_with("no newline"), "partial line lost: {output:?}");
    Ok(())
}

#[tokio::test]
async fn fail_expression_overrides_exit_code() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let mut spec = sh_test("fail-expr", "echo 'ERROR: disk full'; exit 0");
    spec.fail_expressions = ExpressionSet::new(["^ERROR"])?;

    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::Failed
    );
    let finalized = harness.sink.get("fail-expr").expect("result committed");
    assert_eq!(finalized.last.matched_expression.as_deref(), Some("^ERROR"));
    Ok(())
}

#[tokio::test]
async fn pass_expression_overrides_exit_code() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let mut spec = sh_test("pass-expr", "echo 'all 3 checks passed'; exit 1");
    spec.pass_expressions = ExpressionSet::new(["all [0-9]+ checks passed"])?;

    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::Passed
    );

    spec.pass_expressions = ExpressionSet::new(["^never printed$"])?;
    spec.name = "pass-expr-missing".to_owned();
    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::Failed
    );
    Ok(())
}

#[tokio::test]
async fn will_fail_and_skip_code() -> Result<()> {
    test_init();
    let harness = Harness::new();

    let mut spec = sh_test("expected-failure", "exit 1");
    spec.will_fail = true;
    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::Passed
    );

    let mut spec = sh_test("skipped", "echo 'no gpu available'; exit 77");
    spec.skip_return_code = Some(77);
    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::Skipped
    );
    Ok(())
}

#[tokio::test]
async fn attempt_environment() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let script = format!(
        "echo \"${TEST_NAME_ENV} ${INDEX_ENV} ${ATTEMPT_ENV} ${TOTAL_ATTEMPTS_ENV} $GREETING\""
    );
    let spec = sh_test("env-check", &script).with_env("GREETING", "hello world");

    harness.execute(&spec, RepeatPolicy::once()).await;
    let finalized = harness.sink.get("env-check").expect("result committed");
    assert_eq!(finalized.last.output.lossy(), "env-check 1 1 1 hello world\n");
    Ok(())
}

#[tokio::test]
async fn failed_dependency_never_spawns() -> Result<()> {
    test_init();
    let dir = temp_dir()?;
    write_script(dir.path(), "touch-marker.sh", "touch marker")?;
    let harness = Harness::new();
    let mut spec = TestSpec::new("dependent", "./touch-marker.sh");
    spec.cwd = Some(dir.path().to_owned());

    let mut run = harness.run(&spec);
    run.add_failed_dependency("setup");
    assert_eq!(
        run.execute(1, InterruptSignal::never()).await,
        TestStatus::DependencySkip
    );
    drop(run);

    ensure!(
        !dir.path().join("marker").exists(),
        "test was launched despite a failed dependency"
    );
    assert_eq!(harness.coordinator.released().len(), 1);
    Ok(())
}

#[tokio::test]
async fn relative_working_directory() -> Result<()> {
    test_init();
    let (dir, relative) = relative_temp_dir()?;
    write_script(dir.path(), "where.sh", "basename \"$PWD\"")?;
    let harness = Harness::new();
    let mut spec = TestSpec::new("relative-cwd", "./where.sh");
    spec.cwd = Some(relative.clone());

    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::Passed
    );
    let finalized = harness.sink.get("relative-cwd").expect("result committed");
    assert_eq!(finalized.last.output.lossy(), format!("{relative}\n"));
    Ok(())
}

#[tokio::test]
async fn missing_executable_and_working_directory() -> Result<()> {
    test_init();
    let dir = temp_dir()?;
    let harness = Harness::new();

    let mut spec = TestSpec::new("missing", "./not-there.sh");
    spec.cwd = Some(dir.path().to_owned());
    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::ExecutableNotFound
    );
    let finalized = harness.sink.get("missing").expect("result committed");
    assert_eq!(finalized.last.command_line, None);
    assert!(finalized.last.output.raw().is_empty());

    let mut spec = sh_test("bad-cwd", "exit 0");
    spec.cwd = Some(dir.path().join("does-not-exist"));
    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::LaunchFailed
    );
    let finalized = harness.sink.get("bad-cwd").expect("result committed");
    let diagnostic = finalized.last.diagnostic.unwrap_or_default();
    ensure!(
        diagnostic.contains("does-not-exist"),
        "unexpected diagnostic: {diagnostic}"
    );
    assert_eq!(harness.coordinator.released().len(), 2);
    Ok(())
}

#[tokio::test]
async fn stepwise_driving() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("stepwise", "for i in 1 2 3; do echo line $i; done");
    let mut run = harness.run(&spec);

    assert_eq!(run.start(12), StartOutcome::Launched);
    assert_eq!(run.phase(), RunPhase::Running);
    run.wait_for_exit(&mut InterruptSignal::never()).await;

    let first = run.compress_output().cloned().expect("live attempt");
    let second = run.compress_output().cloned().expect("live attempt");
    assert_eq!(first, second, "compression is idempotent");
    ensure!(
        first.ratio() > 0.0 && first.ratio() <= 1.0,
        "ratio out of range: {}",
        first.ratio()
    );

    assert_eq!(
        run.finish(1, 12, true),
        FinishOutcome::Finished(TestStatus::Passed)
    );
    assert_eq!(run.phase(), RunPhase::Finalized);
    assert_eq!(run.feed(b"too late\n"), FeedControl::Stop);

    let result = run.result().expect("result recorded");
    assert_eq!(result.output.raw().as_ref(), b"line 1\nline 2\nline 3\n");
    assert_eq!(result.output.compressed(), Some(&first));
    Ok(())
}

#[tokio::test]
async fn fed_output_is_chunking_independent() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("fed", "sleep 1");

    let line_wise: &[&[u8]] = &[b"alpha\n", b"beta\n", b"gamma"];
    let block: &[&[u8]] = &[b"alpha\nbeta\ngamma"];
    let mut outputs = Vec::new();
    for chunks in [line_wise, block] {
        let mut run = harness.run(&spec);
        assert_eq!(run.start(1), StartOutcome::Launched);
        for chunk in chunks {
            assert_eq!(run.feed(chunk), FeedControl::Continue);
        }
        run.wait_for_exit(&mut InterruptSignal::never()).await;
        run.finish(1, 1, true);
        outputs.push(run.result().expect("result recorded").output.raw().clone());
    }

    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0].as_ref(), b"alpha\nbeta\ngamma");
    Ok(())
}

#[tokio::test]
async fn post_process_hook_fails_clean_exit() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let hook = DefectScanHook::new(ExpressionSet::new(["ERROR SUMMARY: [1-9]"])?);
    let spec = sh_test(
        "leaky",
        "echo '==42== ERROR SUMMARY: 2 errors from 2 contexts'; exit 0",
    );

    let mut run = harness.run(&spec).with_post_process(&hook);
    assert_eq!(
        run.execute(1, InterruptSignal::never()).await,
        TestStatus::Failed
    );
    let diagnostic = run
        .result()
        .and_then(|result| result.diagnostic.clone())
        .unwrap_or_default();
    assert_eq!(diagnostic, "==42== ERROR SUMMARY: 2 errors from 2 contexts");
    Ok(())
}

#[tokio::test]
async fn concurrent_runs_share_sink_and_coordinator() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let specs: Vec<TestSpec> = (1..=4)
        .map(|i| sh_test(&format!("parallel-{i}"), &format!("sleep 0.2; exit {}", i % 2)))
        .collect();
    let mut runs: Vec<_> = specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            TestRun::new(
                spec,
                i + 1,
                &harness.config,
                &harness.coordinator,
                &harness.sink,
            )
        })
        .collect();

    let statuses = futures::future::join_all(
        runs.iter_mut()
            .map(|run| run.execute(specs.len(), InterruptSignal::never())),
    )
    .await;
    assert_eq!(
        statuses,
        [
            TestStatus::Failed,
            TestStatus::Passed,
            TestStatus::Failed,
            TestStatus::Passed
        ]
    );
    drop(runs);

    assert_eq!(harness.sink.len(), 4);
    assert_eq!(harness.coordinator.completed(), 4);
    let mut released: Vec<usize> = harness
        .coordinator
        .released()
        .into_iter()
        .map(|(index, _)| index)
        .collect();
    released.sort_unstable();
    assert_eq!(released, [1, 2, 3, 4]);
    Ok(())
}
