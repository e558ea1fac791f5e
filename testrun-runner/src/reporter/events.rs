// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Results produced by a [`TestRun`](crate::runner::TestRun).

use crate::{cost::WeightedCost, test_output::CapturedOutput};
use chrono::{DateTime, FixedOffset};
use std::{fmt, process::ExitStatus, time::Duration};

/// Whether a timeout was set by the test itself or came from the runner default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeoutSource {
    /// The test set its own timeout.
    Explicit,

    /// The runner's default timeout applied.
    Default,
}

/// The outcome of a single attempt.
///
/// Every way a test can end is a status, including the ones where it never
/// launched: run operations don't return errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TestStatus {
    /// The test passed.
    Passed,

    /// The test exited cleanly with a failing code, or a fail expression
    /// matched its output.
    Failed,

    /// The test was terminated abnormally, e.g. by a signal.
    Crashed,

    /// The test ran past its timeout and was killed.
    Timeout(TimeoutSource),

    /// The whole run was interrupted while the test was running.
    Interrupted,

    /// The test asked to be skipped, through its skip return code or a skip
    /// expression.
    Skipped,

    /// A prerequisite test failed, so this one never launched.
    DependencySkip,

    /// The executable could not be found, so the test never launched.
    ExecutableNotFound,

    /// The process could not be spawned.
    LaunchFailed,
}

impl TestStatus {
    /// Returns true if the attempt counts as a success.
    pub fn is_success(self) -> bool {
        match self {
            Self::Passed | Self::Skipped => true,
            Self::Failed
            | Self::Crashed
            | Self::Timeout(_)
            | Self::Interrupted
            | Self::DependencySkip
            | Self::ExecutableNotFound
            | Self::LaunchFailed => false,
        }
    }

    /// Returns true if the test never launched.
    pub fn is_not_run(self) -> bool {
        matches!(
            self,
            Self::DependencySkip | Self::ExecutableNotFound | Self::LaunchFailed
        )
    }

    /// Returns true if a repeat policy may schedule another attempt after this
    /// one.
    pub fn is_repeatable(self) -> bool {
        !self.is_not_run() && self != Self::Interrupted
    }

    /// Swaps pass and fail for tests that are expected to fail.
    pub(crate) fn invert(self) -> Self {
        match self {
            Self::Passed => Self::Failed,
            Self::Failed | Self::Crashed => Self::Passed,
            other => other,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "Passed"),
            Self::Failed => write!(f, "***Failed"),
            Self::Crashed => write!(f, "***Exception"),
            Self::Timeout(_) => write!(f, "***Timeout"),
            Self::Interrupted => write!(f, "***Interrupted"),
            Self::Skipped => write!(f, "***Skipped"),
            Self::DependencySkip | Self::ExecutableNotFound | Self::LaunchFailed => {
                write!(f, "***Not Run")
            }
        }
    }
}

/// How the test process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitDetail {
    /// The process exited with a code.
    Code(i32),

    /// The process was aborted.
    Abort(AbortStatus),

    /// There is no exit information: the test never launched.
    None,
}

impl ExitDetail {
    /// Extracts the exit detail from an [`ExitStatus`].
    pub fn extract(exit_status: ExitStatus) -> Self {
        if let Some(abort_status) = AbortStatus::extract(exit_status) {
            Self::Abort(abort_status)
        } else if let Some(code) = exit_status.code() {
            Self::Code(code)
        } else {
            Self::None
        }
    }

    /// Returns the exit code, if the process exited normally.
    pub fn code(self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(code),
            Self::Abort(_) | Self::None => None,
        }
    }
}

/// An abnormal termination of the test process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortStatus {
    /// The test was terminated by a signal on Unix.
    #[cfg(unix)]
    UnixSignal(i32),

    /// The test exited with an NTSTATUS error code on Windows (high bit set).
    #[cfg(windows)]
    WindowsNtStatus(i32),
}

impl AbortStatus {
    /// Returns the abort status if the process was terminated abnormally.
    #[cfg(unix)]
    pub fn extract(exit_status: ExitStatus) -> Option<Self> {
        use std::os::unix::process::ExitStatusExt;
        exit_status.signal().map(Self::UnixSignal)
    }

    /// Returns the abort status if the process was terminated abnormally.
    #[cfg(windows)]
    pub fn extract(exit_status: ExitStatus) -> Option<Self> {
        exit_status
            .code()
            .and_then(|code| (code < 0).then_some(Self::WindowsNtStatus(code)))
    }
}

impl fmt::Display for AbortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Self::UnixSignal(signal) => match crate::helpers::signal_str(*signal) {
                Some(name) => write!(f, "SIG{name}"),
                None => write!(f, "signal {signal}"),
            },
            #[cfg(windows)]
            Self::WindowsNtStatus(code) => write!(f, "code {:#010x}", *code as u32),
        }
    }
}

/// The immutable record of one attempt.
#[derive(Clone, Debug)]
pub struct TestResult {
    /// The test's name.
    pub name: String,

    /// The test's position within the batch, starting at 1.
    pub index: usize,

    /// The attempt this result describes, starting at 1.
    pub attempt: u32,

    /// The outcome.
    pub status: TestStatus,

    /// When the attempt started.
    pub start_time: DateTime<FixedOffset>,

    /// How long the attempt took. Zero for tests that never launched.
    pub duration: Duration,

    /// How the process ended.
    pub exit: ExitDetail,

    /// The pass, fail or skip expression that decided the outcome, if any.
    pub matched_expression: Option<String>,

    /// Extra explanation: why a test didn't run, or what a post-processing
    /// hook reported.
    pub diagnostic: Option<String>,

    /// Combined stdout and stderr.
    pub output: CapturedOutput,

    /// The command line that was run, with the executable resolved. `None` if
    /// the executable was never resolved.
    pub command_line: Option<String>,
}

/// Statistics across every attempt of a test.
///
/// Unlike [`TestResult`], which is replaced on each attempt, this persists
/// across retries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptHistory {
    statuses: Vec<TestStatus>,
    failures: u32,
    worst_duration: Duration,
}

impl AttemptHistory {
    pub(crate) fn record(&mut self, status: TestStatus, duration: Duration) {
        self.statuses.push(status);
        if !status.is_success() {
            self.failures += 1;
        }
        self.worst_duration = self.worst_duration.max(duration);
    }

    /// The number of attempts made.
    pub fn attempts(&self) -> u32 {
        self.statuses.len() as u32
    }

    /// The number of attempts that did not succeed.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The longest duration of any attempt.
    pub fn worst_duration(&self) -> Duration {
        self.worst_duration
    }

    /// Every attempt's status, in order.
    pub fn statuses(&self) -> &[TestStatus] {
        &self.statuses
    }

    /// Returns true if the test both succeeded and failed across attempts.
    pub fn is_flaky(&self) -> bool {
        self.failures > 0 && (self.failures as usize) < self.statuses.len()
    }
}

/// The final record of a test, committed once to the
/// [`ResultSink`](crate::reporter::sink::ResultSink).
#[derive(Clone, Debug)]
pub struct FinalizedTest {
    /// The result of the last attempt.
    pub last: TestResult,

    /// Statistics across all attempts.
    pub history: AttemptHistory,

    /// The scheduling cost for the next run of this test.
    pub cost: WeightedCost,
}

impl FinalizedTest {
    /// The final status.
    pub fn status(&self) -> TestStatus {
        self.last.status
    }
}
