// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    attempt::{AttemptState, FeedControl, display_error_chain},
    classify::{Classification, classify},
};
use crate::{
    config::{core::RunnerConfig, elements::RepeatPolicy},
    coordinator::RunCoordinator,
    cost::{CostEstimator, WeightedCost},
    errors::ExecutableNotFoundError,
    helpers::format_secs,
    post_process::PostProcessHook,
    reporter::{
        AttemptDisplayer,
        events::{
            AttemptHistory, ExitDetail, FinalizedTest, TestResult, TestStatus, TimeoutSource,
        },
        sink::ResultSink,
    },
    signal::InterruptSignal,
    test_command::{TestCommand, resolve_executable},
    test_output::{CapturedOutput, CompressedOutput},
    test_spec::TestSpec,
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use debug_ignore::DebugIgnore;
use std::{collections::BTreeSet, time::Duration};
use swrite::{SWrite, swrite};
use tracing::{debug, info, instrument, warn};

/// Where a [`TestRun`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Created, not yet started.
    Idle,

    /// Checking dependencies, resolving the executable and spawning it.
    Launching,

    /// An attempt is running.
    Running,

    /// The attempt has ended and is being classified.
    Classifying,

    /// The repeat policy asked for another attempt, which hasn't started yet.
    Retrying,

    /// The final result was committed and the slot released.
    Finalized,
}

/// The outcome of [`TestRun::start`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// The test process is running.
    Launched,

    /// The test could not run and has been finalized with this status.
    Finalized(TestStatus),
}

/// The outcome of [`TestRun::finish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The test has been finalized with this status.
    Finished(TestStatus),

    /// The repeat policy asked for another attempt: call
    /// [`TestRun::start_again`].
    RetryPending,
}

/// Drives every attempt of one test.
///
/// A `TestRun` borrows its test, config, coordinator and sink from the
/// scheduler for its whole lifetime. It holds at most one live process at a
/// time, commits exactly one [`FinalizedTest`] to the sink, and releases its
/// slot exactly once, including when it is dropped early.
#[derive(Debug)]
pub struct TestRun<'a> {
    spec: &'a TestSpec,
    index: usize,
    config: &'a RunnerConfig,
    coordinator: DebugIgnore<&'a dyn RunCoordinator>,
    sink: DebugIgnore<&'a dyn ResultSink>,
    post_process: Option<&'a dyn PostProcessHook>,
    colorize: bool,
    total: usize,
    failed_dependencies: BTreeSet<String>,
    // Transient, replaced on every attempt.
    attempt: Option<AttemptState>,
    // Cumulative, survives retries.
    state: RunState,
    phase: RunPhase,
    slot_released: bool,
}

#[derive(Debug)]
struct RunState {
    history: AttemptHistory,
    current: Option<TestResult>,
    remaining_runs: u32,
    attempt: u32,
    repeat: RepeatPolicy,
    command_line: Option<String>,
    cost: CostEstimator,
    completed: Option<usize>,
    abort_requested: bool,
}

impl<'a> TestRun<'a> {
    /// Creates a new run for the test at `index` (starting at 1).
    ///
    /// The repeat policy comes from `config` unless overridden with
    /// [`with_repeat`](Self::with_repeat).
    pub fn new(
        spec: &'a TestSpec,
        index: usize,
        config: &'a RunnerConfig,
        coordinator: &'a dyn RunCoordinator,
        sink: &'a dyn ResultSink,
    ) -> Self {
        let repeat = config.run().repeat();
        Self {
            spec,
            index,
            config,
            coordinator: DebugIgnore(coordinator),
            sink: DebugIgnore(sink),
            post_process: None,
            colorize: false,
            total: 0,
            failed_dependencies: BTreeSet::new(),
            attempt: None,
            state: RunState {
                history: AttemptHistory::default(),
                current: None,
                remaining_runs: repeat.count(),
                attempt: 0,
                repeat,
                command_line: None,
                cost: CostEstimator::new(
                    spec.cost_hint,
                    spec.weight,
                    config.cost().default_duration(),
                ),
                completed: None,
                abort_requested: false,
            },
            phase: RunPhase::Idle,
            slot_released: false,
        }
    }

    /// Consults `hook` after every classified attempt.
    pub fn with_post_process(mut self, hook: &'a dyn PostProcessHook) -> Self {
        self.post_process = Some(hook);
        self
    }

    /// Overrides the repeat policy for this test.
    pub fn with_repeat(mut self, repeat: RepeatPolicy) -> Self {
        self.state.repeat = repeat;
        self.state.remaining_runs = repeat.count();
        self
    }

    /// Enables ANSI colors in the logged start and result lines.
    pub fn colorize(&mut self) {
        self.colorize = true;
    }

    /// Records that a prerequisite of this test failed.
    ///
    /// Must be called before [`start`](Self::start). Any failed prerequisite
    /// means the test is never launched.
    pub fn add_failed_dependency(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.spec.depends_on.contains(&name) {
            warn!(
                test = %self.spec.name,
                dependency = %name,
                "failed test is not a declared prerequisite"
            );
        }
        self.failed_dependencies.insert(name);
    }

    /// Prerequisites reported as failed that the test doesn't declare in
    /// [`TestSpec::depends_on`].
    pub fn undeclared_failed_dependencies(&self) -> impl Iterator<Item = &str> {
        self.failed_dependencies
            .iter()
            .filter(|name| !self.spec.depends_on.contains(*name))
            .map(String::as_str)
    }

    /// Starts the next attempt.
    ///
    /// `total` is the number of tests in the batch, used to align log lines.
    /// If the test can't run, it is finalized immediately and the reason is
    /// returned as the status.
    pub fn start(&mut self, total: usize) -> StartOutcome {
        match self.phase {
            RunPhase::Idle | RunPhase::Retrying => {}
            RunPhase::Finalized => {
                return StartOutcome::Finalized(self.final_status());
            }
            RunPhase::Launching | RunPhase::Running | RunPhase::Classifying => {
                debug!(phase = ?self.phase, "start called on a live run, ignoring");
                return StartOutcome::Launched;
            }
        }

        self.phase = RunPhase::Launching;
        self.total = total;
        self.state.attempt += 1;
        self.state.remaining_runs = self.state.remaining_runs.saturating_sub(1);
        info!(
            "{}",
            self.displayer().start_line(
                self.index,
                &self.spec.name,
                &self.spec.labels,
                self.state.attempt,
                self.state.repeat.count()
            )
        );

        if !self.failed_dependencies.is_empty() {
            let mut diagnostic = String::from("required tests failed:");
            for name in &self.failed_dependencies {
                swrite!(diagnostic, " {name}");
            }
            debug!(failed = ?self.failed_dependencies, "not running test");
            return StartOutcome::Finalized(
                self.finalize_not_run(TestStatus::DependencySkip, diagnostic),
            );
        }

        let program = match resolve_executable(&self.spec.program, self.cwd()) {
            Ok(program) => program,
            Err(error) => {
                let diagnostic = describe_not_found(&error);
                return StartOutcome::Finalized(
                    self.finalize_not_run(TestStatus::ExecutableNotFound, diagnostic),
                );
            }
        };

        let command = self.build_command(program);
        let command_line = command.command_line();
        debug!(%command_line, attempt = self.state.attempt, "launching test");
        self.state.command_line = Some(command_line);

        match command.spawn() {
            Ok(process) => {
                let timeout = self.config.run().timeout_for(self.spec.timeout);
                self.attempt = Some(AttemptState::new(
                    process,
                    timeout,
                    self.config.output().max_size(),
                ));
                self.phase = RunPhase::Running;
                StartOutcome::Launched
            }
            Err(error) => {
                let diagnostic = display_error_chain(&error);
                StartOutcome::Finalized(self.finalize_not_run(TestStatus::LaunchFailed, diagnostic))
            }
        }
    }

    /// Appends a chunk of output to the live attempt.
    ///
    /// Returns [`FeedControl::Stop`] once nothing more should be fed: the
    /// output limit was reached, the process exited and its output was
    /// drained, or there is no live attempt.
    pub fn feed(&mut self, bytes: &[u8]) -> FeedControl {
        match &mut self.attempt {
            Some(attempt) => attempt.feed(bytes),
            None => FeedControl::Stop,
        }
    }

    /// Waits for the live attempt to end, capturing its output, enforcing its
    /// timeout and terminating it if `interrupt` is raised.
    ///
    /// Returns immediately if there is no live attempt. Cancelling this
    /// future leaves the process running; it is killed when the run is
    /// finished or dropped.
    #[instrument(level = "debug", skip_all, fields(test = %self.spec.name, attempt = self.state.attempt))]
    pub async fn wait_for_exit(&mut self, interrupt: &mut InterruptSignal) {
        let run = *self.config.run();
        let Some(attempt) = &mut self.attempt else {
            return;
        };
        attempt
            .drive(run.grace_period(), run.leak_timeout(), interrupt)
            .await;
        if attempt.end().interrupted {
            self.state.abort_requested = true;
        }
    }

    /// Prevents any further attempts once the current one ends.
    pub fn request_abort(&mut self) {
        self.state.abort_requested = true;
    }

    /// Classifies the attempt that just ended and decides whether to try
    /// again.
    ///
    /// `completed` is the number of completed tests in the batch, shown in
    /// the result line. `started` is false if the process never got going,
    /// in which case the test is finalized as
    /// [`LaunchFailed`](TestStatus::LaunchFailed).
    pub fn finish(&mut self, completed: usize, total: usize, started: bool) -> FinishOutcome {
        self.total = total;
        self.state.completed = Some(completed);
        let Some(attempt) = self.attempt.take() else {
            return FinishOutcome::Finished(self.final_status());
        };

        if !started {
            drop(attempt);
            let status = self.finalize_not_run(
                TestStatus::LaunchFailed,
                "test process did not start".to_owned(),
            );
            return FinishOutcome::Finished(status);
        }

        self.phase = RunPhase::Classifying;
        let status = self.classify_attempt(attempt);

        if !self.state.abort_requested
            && self.state.remaining_runs > 0
            && self.state.repeat.wants_another_attempt(status)
        {
            debug!(
                %status,
                remaining = self.state.remaining_runs,
                mode = ?self.state.repeat.mode,
                "scheduling another attempt"
            );
            self.phase = RunPhase::Retrying;
            FinishOutcome::RetryPending
        } else {
            self.finalize();
            FinishOutcome::Finished(status)
        }
    }

    /// Starts the attempt requested by [`finish`](Self::finish), after the
    /// repeat policy's delay.
    ///
    /// Cancel-safe: dropping the future during the delay leaves the run
    /// waiting to be retried.
    pub async fn start_again(&mut self) -> StartOutcome {
        if self.phase != RunPhase::Retrying {
            return self.start(self.total);
        }
        let delay = self.state.repeat.next_delay();
        if !delay.is_zero() {
            debug!(?delay, "waiting before the next attempt");
            tokio::time::sleep(delay).await;
        }
        self.start(self.total)
    }

    /// Drives every attempt of the test to completion, returning the final
    /// status.
    ///
    /// If `interrupt` is raised, the running attempt is terminated and no
    /// further attempts are made.
    pub async fn execute(&mut self, total: usize, mut interrupt: InterruptSignal) -> TestStatus {
        let mut outcome = self.start(total);
        loop {
            if let StartOutcome::Finalized(status) = outcome {
                return status;
            }

            self.wait_for_exit(&mut interrupt).await;
            if interrupt.is_interrupted() {
                self.request_abort();
            }
            let completed = self.completed();
            match self.finish(completed, total, true) {
                FinishOutcome::Finished(status) => return status,
                FinishOutcome::RetryPending => {}
            }

            let next = tokio::select! {
                outcome = self.start_again() => Some(outcome),
                () = interrupt.interrupted() => None,
            };
            match next {
                Some(next) => outcome = next,
                None => {
                    debug!("interrupted between attempts");
                    self.finalize();
                    return self.final_status();
                }
            }
        }
    }

    /// Compresses the output of the live attempt, or of the last result if
    /// no attempt is live.
    ///
    /// Repeated calls return the same bytes without recompressing. Returns
    /// `None` before the first attempt.
    pub fn compress_output(&mut self) -> Option<&CompressedOutput> {
        let level = self.config.output().compression_level();
        if let Some(attempt) = &mut self.attempt {
            return Some(attempt.output_mut().compress(level));
        }
        self.state
            .current
            .as_mut()
            .map(|result| result.output.compress(level))
    }

    /// The scheduling cost of this test, based on its latest measured
    /// duration.
    pub fn weighted_cost(&self) -> WeightedCost {
        self.state.cost.estimate()
    }

    /// The command line of the latest attempt, with the executable resolved.
    ///
    /// `None` if the executable has never been resolved.
    pub fn command_line(&self) -> Option<&str> {
        self.state.command_line.as_deref()
    }

    /// Builds the command the next attempt would run, without running it.
    pub fn compute_arguments(&self) -> Result<TestCommand, ExecutableNotFoundError> {
        let program = resolve_executable(&self.spec.program, self.cwd())?;
        let mut command = TestCommand::new(self.spec, program);
        command.set_attempt_env(
            &self.spec.name,
            self.index,
            self.state.attempt + 1,
            self.state.repeat.count(),
        );
        Ok(command)
    }

    /// The test this run belongs to.
    pub fn spec(&self) -> &'a TestSpec {
        self.spec
    }

    /// The current phase.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// The result of the latest classified attempt.
    pub fn result(&self) -> Option<&TestResult> {
        self.state.current.as_ref()
    }

    /// Statistics across every attempt so far.
    pub fn history(&self) -> &AttemptHistory {
        &self.state.history
    }

    /// The number of attempts the repeat policy still allows.
    pub fn remaining_runs(&self) -> u32 {
        self.state.remaining_runs
    }

    fn cwd(&self) -> &Utf8Path {
        self.spec.cwd.as_deref().unwrap_or(Utf8Path::new("."))
    }

    fn build_command(&self, program: Utf8PathBuf) -> TestCommand {
        let mut command = TestCommand::new(self.spec, program);
        command.set_attempt_env(
            &self.spec.name,
            self.index,
            self.state.attempt,
            self.state.repeat.count(),
        );
        command
    }

    fn displayer(&self) -> AttemptDisplayer {
        let mut displayer = AttemptDisplayer::new(self.total);
        if self.colorize {
            displayer.colorize();
        }
        displayer
    }

    fn completed(&mut self) -> usize {
        *self
            .state
            .completed
            .get_or_insert_with(|| self.coordinator.mark_completed())
    }

    fn final_status(&self) -> TestStatus {
        // A run that never recorded a result can only have been cut short.
        self.state
            .current
            .as_ref()
            .map_or(TestStatus::Interrupted, |result| result.status)
    }

    fn classify_attempt(&mut self, attempt: AttemptState) -> TestStatus {
        let end = attempt.end();
        let raw = attempt.output().raw();
        let Classification {
            mut status,
            matched_expression,
        } = classify(self.spec, end, raw);

        let mut diagnostics = attempt.notes();
        if let TestStatus::Timeout(source) = status {
            if let Some(period) = attempt.timeout().period {
                let which = match source {
                    TimeoutSource::Explicit => "its",
                    TimeoutSource::Default => "the default",
                };
                diagnostics.push(format!(
                    "test exceeded {which} timeout of {} sec",
                    format_secs(period)
                ));
            }
        }
        if let Some(hook) = self.post_process {
            if status != TestStatus::Interrupted && !status.is_not_run() {
                let outcome = hook.post_process(raw, status);
                if let Some(new_status) = outcome.status_override {
                    debug!(from = %status, to = %new_status, "post-process hook overrode status");
                    status = new_status;
                }
                if !outcome.diagnostics.is_empty() {
                    diagnostics.push(outcome.diagnostics);
                }
            }
        }

        let duration = attempt.duration();
        let start_time = attempt.start_time().fixed_offset();
        let output = attempt.into_output(self.config.output());
        let result = TestResult {
            name: self.spec.name.clone(),
            index: self.index,
            attempt: self.state.attempt,
            status,
            start_time,
            duration,
            exit: end.exit,
            matched_expression,
            diagnostic: (!diagnostics.is_empty()).then(|| diagnostics.join("\n")),
            output,
            command_line: self.state.command_line.clone(),
        };
        self.record(result);
        status
    }

    /// Records a result for an attempt that never launched and finalizes.
    fn finalize_not_run(&mut self, status: TestStatus, diagnostic: String) -> TestStatus {
        debug!(%status, %diagnostic, "test did not run");
        let result = TestResult {
            name: self.spec.name.clone(),
            index: self.index,
            attempt: self.state.attempt,
            status,
            start_time: Local::now().fixed_offset(),
            duration: Duration::ZERO,
            exit: ExitDetail::None,
            matched_expression: None,
            diagnostic: Some(diagnostic),
            output: CapturedOutput::empty(),
            command_line: self.state.command_line.clone(),
        };
        self.record(result);
        self.finalize();
        status
    }

    fn record(&mut self, result: TestResult) {
        self.state.history.record(result.status, result.duration);
        if !result.status.is_not_run() {
            self.state
                .cost
                .record(result.duration, result.status == TestStatus::Passed);
        }
        let completed = self.completed();
        info!(
            "{}",
            self.displayer()
                .result_line(completed, &result, &self.state.history)
        );
        if !result.status.is_success() && !result.output.raw().is_empty() {
            let excerpt = result
                .output
                .tail_excerpt(self.config.output().excerpt_size());
            info!(
                "output of {} (last {} bytes):\n{}",
                result.name,
                excerpt.len(),
                String::from_utf8_lossy(excerpt)
            );
        }
        self.state.current = Some(result);
    }

    fn finalize(&mut self) {
        if self.phase == RunPhase::Finalized {
            return;
        }
        self.phase = RunPhase::Finalized;
        // Kills anything left of a live attempt.
        self.attempt = None;

        if let Some(last) = &self.state.current {
            self.sink.record(FinalizedTest {
                last: last.clone(),
                history: self.state.history.clone(),
                cost: self.state.cost.estimate(),
            });
        }
        self.release_slot();
    }

    fn release_slot(&mut self) {
        if !self.slot_released {
            self.slot_released = true;
            self.coordinator
                .release_slot(self.index, &self.state.cost.estimate());
        }
    }
}

impl Drop for TestRun<'_> {
    fn drop(&mut self) {
        if !self.slot_released {
            debug!(test = %self.spec.name, phase = ?self.phase, "run dropped before finalizing");
            self.release_slot();
        }
    }
}

fn describe_not_found(error: &ExecutableNotFoundError) -> String {
    let mut out = error.to_string();
    if !error.searched().is_empty() {
        out.push_str("\nsearched:");
        for path in error.searched() {
            swrite!(out, "\n  {path}");
        }
    }
    out
}
