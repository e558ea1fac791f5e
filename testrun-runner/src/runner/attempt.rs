// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::classify::AttemptEnd;
use crate::{
    config::elements::{OutputSettings, TestTimeout},
    errors::ChildFdError,
    reporter::events::ExitDetail,
    signal::InterruptSignal,
    test_command::{ProcessHandle, TerminateMethod},
    test_output::{CapturedOutput, OutputBuffer},
};
use chrono::{DateTime, Local};
use std::{pin::pin, time::Duration};
use tracing::{debug, warn};

/// Whether the caller should keep feeding output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedControl {
    /// Keep feeding.
    Continue,

    /// Stop feeding: the output limit was reached, or the process has exited
    /// and all of its output was consumed.
    Stop,
}

/// Per-attempt state, replaced wholesale on every attempt.
#[derive(Debug)]
pub(super) struct AttemptState {
    process: ProcessHandle,
    output: OutputBuffer,
    timeout: TestTimeout,
    start_time: DateTime<Local>,
    duration: Option<Duration>,
    timed_out: bool,
    interrupted: bool,
    leaked: bool,
    fd_errors: Vec<ChildFdError>,
}

impl AttemptState {
    pub(super) fn new(process: ProcessHandle, timeout: TestTimeout, max_output: usize) -> Self {
        let start_time = process.stopwatch().start_time();
        Self {
            process,
            output: OutputBuffer::new(max_output),
            timeout,
            start_time,
            duration: None,
            timed_out: false,
            interrupted: false,
            leaked: false,
            fd_errors: Vec::new(),
        }
    }

    pub(super) fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    pub(super) fn timeout(&self) -> TestTimeout {
        self.timeout
    }

    pub(super) fn output(&self) -> &OutputBuffer {
        &self.output
    }

    pub(super) fn output_mut(&mut self) -> &mut OutputBuffer {
        &mut self.output
    }

    pub(super) fn feed(&mut self, line: &[u8]) -> FeedControl {
        let stored = self.output.append(line);
        if !stored || (self.process.exit_status().is_some() && self.process.output_done()) {
            FeedControl::Stop
        } else {
            FeedControl::Continue
        }
    }

    /// Drives the process until it has exited and its output is drained,
    /// enforcing the timeout and reacting to interrupts.
    pub(super) async fn drive(
        &mut self,
        grace_period: Duration,
        leak_timeout: Duration,
        interrupt: &mut InterruptSignal,
    ) {
        let period = self.timeout.period;
        let elapsed = self.process.elapsed();
        let stopwatch = self.process.stopwatch().clone();
        let (child, lines) = self.process.split_mut();

        let mut timeout_sleep = pin!(tokio::time::sleep(
            period.map_or(Duration::ZERO, |p| p.saturating_sub(elapsed))
        ));
        let mut grace_sleep = pin!(tokio::time::sleep(Duration::ZERO));
        let mut leak_sleep = pin!(tokio::time::sleep(Duration::ZERO));
        let mut grace_armed = false;
        let mut leak_armed = false;
        let mut output_full = false;

        loop {
            let exited = child.exit_status().is_some();
            if exited && lines.is_done() {
                break;
            }

            tokio::select! {
                line = lines.next_line(), if !lines.is_done() => {
                    match line {
                        Ok(Some(line)) => {
                            if !self.output.append(&line) && !output_full {
                                output_full = true;
                                debug!(
                                    max_size = self.output.len(),
                                    "output limit reached, discarding further output"
                                );
                            }
                        }
                        Ok(None) => {}
                        Err(error) => {
                            warn!(%error, "error reading test output");
                            self.fd_errors.push(error);
                        }
                    }
                }
                res = child.wait(), if !exited => {
                    match res {
                        Ok(exit_status) => {
                            debug!(%exit_status, "test process exited");
                            self.duration = Some(stopwatch.snapshot().active);
                            // Give leaked grandchildren a moment to close the pipes.
                            leak_sleep.as_mut().reset(tokio::time::Instant::now() + leak_timeout);
                            leak_armed = true;
                        }
                        Err(error) => {
                            warn!(%error, "error waiting for test process");
                            self.fd_errors.push(error);
                            child.kill();
                            break;
                        }
                    }
                }
                () = &mut timeout_sleep, if period.is_some() && !self.timed_out && !self.interrupted && !exited => {
                    self.timed_out = true;
                    let method = child.start_terminate(grace_period);
                    debug!(?method, "test timed out, terminating");
                    if method == TerminateMethod::Graceful {
                        grace_sleep.as_mut().reset(tokio::time::Instant::now() + grace_period);
                        grace_armed = true;
                    }
                }
                () = interrupt.interrupted(), if !self.interrupted => {
                    if exited {
                        // The outcome is known and only leaked output is left.
                        child.kill();
                        break;
                    }
                    self.interrupted = true;
                    if grace_armed {
                        // Already terminating: an interrupt means kill now.
                        child.kill();
                        grace_armed = false;
                    } else {
                        let method = child.start_terminate(grace_period);
                        debug!(?method, "test interrupted, terminating");
                        if method == TerminateMethod::Graceful {
                            grace_sleep.as_mut().reset(tokio::time::Instant::now() + grace_period);
                            grace_armed = true;
                        }
                    }
                }
                () = &mut grace_sleep, if grace_armed && !exited => {
                    debug!("grace period elapsed, killing test process");
                    child.kill();
                    grace_armed = false;
                }
                () = &mut leak_sleep, if leak_armed => {
                    debug!(?leak_timeout, "test process leaked handles, killing process group");
                    self.leaked = true;
                    child.kill();
                    // A subprocess that left the process group can keep the
                    // pipes open indefinitely.
                    break;
                }
            }
        }
    }

    /// The end state of the attempt. Must be called after [`drive`](Self::drive).
    pub(super) fn end(&self) -> AttemptEnd {
        let exit = self
            .process
            .exit_status()
            .map_or(ExitDetail::None, ExitDetail::extract);
        AttemptEnd {
            timed_out: self.timed_out.then_some(self.timeout.source),
            interrupted: self.interrupted,
            exit,
        }
    }

    pub(super) fn duration(&self) -> Duration {
        self.duration.unwrap_or_else(|| self.process.elapsed())
    }

    /// Notes about the attempt that belong in the result's diagnostic.
    pub(super) fn notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.process.exit_status().is_none() && self.fd_errors.is_empty() {
            notes.push("test process was still running when the attempt ended".to_owned());
        }
        if self.leaked {
            notes.push(
                "test process exited, but its output was still held open by a subprocess"
                    .to_owned(),
            );
        }
        if self.output.dropped_bytes() > 0 {
            notes.push(format!(
                "output exceeded the size limit, {} bytes discarded",
                self.output.dropped_bytes()
            ));
        }
        for error in &self.fd_errors {
            notes.push(display_error_chain(error));
        }
        notes
    }

    /// Consumes the attempt, compressing the output if it crossed the threshold.
    ///
    /// Dropping the process handle here kills anything left of the process
    /// tree.
    pub(super) fn into_output(mut self, settings: &OutputSettings) -> CapturedOutput {
        if self.output.len() > settings.compress_threshold() {
            let ratio = self.output.compress(settings.compression_level()).ratio();
            debug!(raw = self.output.len(), ratio, "compressed test output");
        }
        self.output.freeze()
    }
}

pub(super) fn display_error_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}
