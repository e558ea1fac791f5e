// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::ChildFdError,
    time::{StopwatchStart, stopwatch},
};
use bytes::{Bytes, BytesMut};
use debug_ignore::DebugIgnore;
use std::{collections::VecDeque, io, process::ExitStatus, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, ChildStderr, ChildStdout},
};
use tracing::{debug, warn};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        #[path = "unix.rs"]
        mod unix;
        use unix as os;
    } else if #[cfg(windows)] {
        #[path = "windows.rs"]
        mod windows;
        use windows as os;
    } else {
        compile_error!("unsupported target platform");
    }
}

/// The size of each buffered reader's buffer.
///
/// This size is not totally arbitrary, but rather the (normal) page size on most systems.
const CHUNK_SIZE: usize = 4 * 1024;

/// The longest run of output without a newline that is held back as one line.
///
/// Anything longer is delivered in pieces of at least this size.
const MAX_LINE_LEN: usize = 64 * 1024;

/// How a running process is being terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminateMethod {
    /// The process group was sent SIGTERM and has a grace period to exit.
    /// Unix only.
    Graceful,

    /// The process group (Unix) or job object (Windows) was killed outright.
    Kill,
}

/// A live test process.
///
/// Dropping the handle kills the whole process group (or job object on
/// Windows), so a process never outlives the attempt that spawned it.
#[derive(Debug)]
pub struct ProcessHandle {
    process: ChildProcess,
    lines: ChildLines,
    stopwatch: StopwatchStart,
}

impl ProcessHandle {
    pub(super) fn spawn(mut cmd: std::process::Command) -> io::Result<Self> {
        os::set_process_group(&mut cmd);

        // A missing job object only means grandchildren may survive a kill.
        let job = match os::create_job() {
            Ok(job) => Some(job),
            Err(error) => {
                warn!(%error, "failed to create job object");
                None
            }
        };

        let mut cmd: tokio::process::Command = cmd.into();
        cmd.kill_on_drop(true);
        let stopwatch = stopwatch();
        let mut child = cmd.spawn()?;

        if let Err(error) = os::assign_process_to_job(&child, job.as_ref()) {
            warn!(%error, "failed to assign process to job object");
        }

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(io::Error::other("child stdout and stderr must be piped"));
        };
        let pid = child.id();
        debug!(?pid, "spawned test process");

        Ok(Self {
            process: ChildProcess {
                child,
                pid,
                job: DebugIgnore(job),
                exit_status: None,
            },
            lines: ChildLines {
                stdout: LineReader::new(stdout),
                stderr: LineReader::new(stderr),
                ready: VecDeque::new(),
            },
            stopwatch,
        })
    }

    /// The OS process ID.
    pub fn pid(&self) -> Option<u32> {
        self.process.pid
    }

    /// The time since the process was spawned.
    pub fn elapsed(&self) -> Duration {
        self.stopwatch.snapshot().active
    }

    pub(crate) fn stopwatch(&self) -> &StopwatchStart {
        &self.stopwatch
    }

    /// Returns the exit status, if the process has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.process.exit_status
    }

    /// Returns true once both stdout and stderr are closed and every line has
    /// been delivered.
    pub fn output_done(&self) -> bool {
        self.lines.is_done()
    }

    /// Returns the next complete line of output, terminator included, from
    /// either stdout or stderr, in order of arrival.
    ///
    /// A trailing partial line is delivered once its stream closes. Returns
    /// `Ok(None)` once both streams are closed. Cancel-safe: if the future is
    /// dropped, no output is lost.
    pub async fn next_line(&mut self) -> Result<Option<Bytes>, ChildFdError> {
        self.lines.next_line().await
    }

    /// Waits for the process to exit. Cancel-safe.
    ///
    /// Output may still be pending afterwards, e.g. if the test spawned a
    /// grandchild that holds stdout open.
    pub async fn wait(&mut self) -> Result<ExitStatus, ChildFdError> {
        self.process.wait().await
    }

    /// Starts terminating the process.
    ///
    /// With a zero grace period, or on Windows, the process is killed
    /// immediately. Otherwise it is asked to exit, and the caller should
    /// [`kill`](Self::kill) it if it's still around once the grace period is
    /// over.
    pub fn start_terminate(&mut self, grace_period: Duration) -> TerminateMethod {
        self.process.start_terminate(grace_period)
    }

    /// Kills the process and everything it spawned.
    pub fn kill(&mut self) {
        self.process.kill();
    }

    /// Borrows the process and its output separately, so that both can be
    /// waited on at once.
    pub(crate) fn split_mut(&mut self) -> (&mut ChildProcess, &mut ChildLines) {
        (&mut self.process, &mut self.lines)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.process.exit_status.is_none() || !self.lines.is_done() {
            // Also catches grandchildren still holding the output pipes.
            os::kill_tree(self.process.pid, self.process.job.0.as_ref());
        }
    }
}

/// The process half of a [`ProcessHandle`].
#[derive(Debug)]
pub(crate) struct ChildProcess {
    child: Child,
    pid: Option<u32>,
    job: DebugIgnore<Option<os::Job>>,
    exit_status: Option<ExitStatus>,
}

impl ChildProcess {
    pub(crate) fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub(crate) async fn wait(&mut self) -> Result<ExitStatus, ChildFdError> {
        if let Some(exit_status) = self.exit_status {
            return Ok(exit_status);
        }
        let exit_status = self
            .child
            .wait()
            .await
            .map_err(|error| ChildFdError::Wait(Arc::new(error)))?;
        self.exit_status = Some(exit_status);
        Ok(exit_status)
    }

    pub(crate) fn start_terminate(&mut self, grace_period: Duration) -> TerminateMethod {
        if !grace_period.is_zero() && os::request_exit(self.pid) {
            TerminateMethod::Graceful
        } else {
            self.kill();
            TerminateMethod::Kill
        }
    }

    pub(crate) fn kill(&mut self) {
        os::kill_tree(self.pid, self.job.0.as_ref());
        if self.exit_status.is_none() {
            // The process may have exited in the meantime; nothing to do then.
            let _ = self.child.start_kill();
        }
    }
}

/// The output half of a [`ProcessHandle`].
#[derive(Debug)]
pub(crate) struct ChildLines {
    stdout: LineReader<ChildStdout>,
    stderr: LineReader<ChildStderr>,
    // Complete lines from either stream, in the order they arrived.
    ready: VecDeque<Bytes>,
}

impl ChildLines {
    pub(crate) fn is_done(&self) -> bool {
        self.ready.is_empty() && self.stdout.is_done() && self.stderr.is_done()
    }

    pub(crate) async fn next_line(&mut self) -> Result<Option<Bytes>, ChildFdError> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }

            // Wait until either stream makes progress.
            tokio::select! {
                res = self.stdout.fill(), if !self.stdout.is_done() => {
                    self.stdout.drain_lines(&mut self.ready);
                    res.map_err(|error| ChildFdError::ReadStdout(Arc::new(error)))?;
                }
                res = self.stderr.fill(), if !self.stderr.is_done() => {
                    self.stderr.drain_lines(&mut self.ready);
                    res.map_err(|error| ChildFdError::ReadStderr(Arc::new(error)))?;
                }
                else => return Ok(None),
            }
        }
    }
}

/// A line splitter over one of the child's output streams.
#[derive(Debug)]
struct LineReader<R> {
    reader: FusedBufReader<R>,
    // Bytes after the last newline seen so far.
    partial: BytesMut,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: FusedBufReader::new(reader),
            partial: BytesMut::with_capacity(CHUNK_SIZE),
        }
    }

    fn is_done(&self) -> bool {
        self.reader.is_done()
    }

    async fn fill(&mut self) -> io::Result<()> {
        self.reader.fill_buf(&mut self.partial).await
    }

    /// Moves every complete line into `ready`, plus the trailing partial line
    /// if the stream is closed or it has grown past [`MAX_LINE_LEN`].
    fn drain_lines(&mut self, ready: &mut VecDeque<Bytes>) {
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            ready.push_back(self.partial.split_to(pos + 1).freeze());
        }
        if (self.reader.is_done() && !self.partial.is_empty())
            || self.partial.len() >= MAX_LINE_LEN
        {
            ready.push_back(self.partial.split().freeze());
        }
    }
}

/// A `BufReader` over an `AsyncRead` that tracks whether it has hit EOF or an
/// error.
#[derive(Debug)]
struct FusedBufReader<R> {
    reader: DebugIgnore<BufReader<R>>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FusedBufReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: DebugIgnore(BufReader::with_capacity(CHUNK_SIZE, reader)),
            done: false,
        }
    }

    /// Appends whatever is available to `acc`.
    ///
    /// Cancel-safe, since the underlying [`AsyncBufReadExt::fill_buf`] is
    /// cancel-safe and data is only consumed after it is copied.
    async fn fill_buf(&mut self, acc: &mut BytesMut) -> io::Result<()> {
        if self.done {
            return Ok(());
        }

        match self.reader.fill_buf().await {
            Ok(buf) => {
                acc.extend_from_slice(buf);
                if buf.is_empty() {
                    self.done = true;
                }
                let len = buf.len();
                self.reader.consume(len);
                Ok(())
            }
            Err(error) => {
                self.done = true;
                Err(error)
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
