// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::{
    num::NonZeroU32,
    time::{Duration, Instant},
};
use testrun_runner::{
    config::{
        core::RunnerConfig,
        elements::{RepeatMode, RepeatPolicy},
    },
    reporter::events::{ExitDetail, TestStatus, TimeoutSource},
    signal::{InterruptSignal, interrupt_channel},
    test_spec::ExpressionSet,
};

#[tokio::test]
async fn timeout_beats_pass_expression() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let mut spec = sh_test("hangs-after-ok", "echo ok; sleep 30").with_timeout(Duration::from_millis(500));
    spec.pass_expressions = ExpressionSet::new(["^ok$"])?;

    let start = Instant::now();
    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::Timeout(TimeoutSource::Explicit)
    );
    ensure!(
        start.elapsed() < Duration::from_secs(20),
        "timeout took too long: {:?}",
        start.elapsed()
    );

    let finalized = harness.sink.get("hangs-after-ok").expect("result committed");
    assert_eq!(finalized.last.output.raw().as_ref(), b"ok\n");
    assert_eq!(finalized.last.matched_expression, None);
    let diagnostic = finalized.last.diagnostic.unwrap_or_default();
    ensure!(
        diagnostic.contains("exceeded its timeout of 0.50 sec"),
        "unexpected diagnostic: {diagnostic}"
    );
    Ok(())
}

#[tokio::test]
async fn default_timeout_from_config() -> Result<()> {
    test_init();
    let config = RunnerConfig::from_toml_str(indoc! {r#"
        [run]
        default-timeout = "500ms"
        grace-period = "200ms"
    "#})?;
    let harness = Harness::with_config(config);
    let spec = sh_test("hangs", "sleep 30");

    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::Timeout(TimeoutSource::Default)
    );
    let finalized = harness.sink.get("hangs").expect("result committed");
    ensure!(
        finalized.last.duration < Duration::from_secs(20),
        "duration: {:?}",
        finalized.last.duration
    );
    Ok(())
}

#[tokio::test]
async fn timed_out_test_can_clean_up() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test(
        "cleans-up",
        "trap 'echo cleaning up; exit 0' TERM; echo ready; while true; do sleep 0.1; done",
    )
    .with_timeout(Duration::from_millis(500));

    assert_eq!(
        harness.execute(&spec, RepeatPolicy::once()).await,
        TestStatus::Timeout(TimeoutSource::Explicit)
    );
    let finalized = harness.sink.get("cleans-up").expect("result committed");
    let output = finalized.last.output.lossy();
    ensure!(
        output.contains("cleaning up"),
        "SIGTERM handler did not run: {output:?}"
    );
    assert_eq!(finalized.last.exit, ExitDetail::Code(0));
    Ok(())
}

#[tokio::test]
async fn interrupt_stops_attempt_and_retries() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("interrupted", "echo started; sleep 30");
    let repeat = RepeatPolicy::new(RepeatMode::Count, NonZeroU32::new(3).expect("nonzero"));
    let mut run = harness.run(&spec).with_repeat(repeat);
    let (sender, interrupt) = interrupt_channel();

    let trigger = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        sender.interrupt();
    };
    let (status, ()) = tokio::time::timeout(
        Duration::from_secs(30),
        async { tokio::join!(run.execute(1, interrupt), trigger) },
    )
    .await?;
    assert_eq!(status, TestStatus::Interrupted);
    assert_eq!(run.history().attempts(), 1);
    drop(run);

    assert_eq!(harness.sink.len(), 1);
    assert_eq!(harness.coordinator.released().len(), 1);
    Ok(())
}

#[tokio::test]
async fn interrupt_during_repeat_delay() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("delayed", "exit 0");
    let mut repeat = RepeatPolicy::new(RepeatMode::Count, NonZeroU32::new(3).expect("nonzero"));
    repeat.delay = Duration::from_secs(30);
    let mut run = harness.run(&spec).with_repeat(repeat);
    let (sender, interrupt) = interrupt_channel();

    let trigger = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        sender.interrupt();
    };
    let (status, ()) = tokio::time::timeout(
        Duration::from_secs(20),
        async { tokio::join!(run.execute(1, interrupt), trigger) },
    )
    .await?;

    // The completed attempt stands; no further attempts are made.
    assert_eq!(status, TestStatus::Passed);
    assert_eq!(run.history().attempts(), 1);
    assert_eq!(run.remaining_runs(), 2);
    Ok(())
}

#[tokio::test]
async fn leaked_output_handle_is_cut_off() -> Result<()> {
    test_init();
    let harness = Harness::new();
    let spec = sh_test("leaks", "sleep 30 & echo started; exit 0");

    let start = Instant::now();
    let mut run = harness.run(&spec);
    let status = tokio::time::timeout(
        Duration::from_secs(20),
        run.execute(1, InterruptSignal::never()),
    )
    .await?;
    assert_eq!(status, TestStatus::Passed);
    ensure!(
        start.elapsed() < Duration::from_secs(20),
        "waited for the leaked subprocess"
    );

    let result = run.result().expect("result recorded");
    assert_eq!(result.output.raw().as_ref(), b"started\n");
    let diagnostic = result.diagnostic.as_deref().unwrap_or_default();
    ensure!(
        diagnostic.contains("held open by a subprocess"),
        "unexpected diagnostic: {diagnostic}"
    );
    Ok(())
}
