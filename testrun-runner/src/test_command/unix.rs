// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use libc::{SIGKILL, SIGTERM};
use std::{convert::Infallible, os::unix::process::CommandExt};
use tracing::warn;

/// Puts the child in a new process group whose ID is the child's PID, so that
/// the whole tree can be signaled at once.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

/// Process groups take the place of job objects on Unix.
#[derive(Debug)]
pub(super) struct Job(());

pub(super) fn create_job() -> Result<Job, Infallible> {
    Ok(Job(()))
}

pub(super) fn assign_process_to_job(
    _child: &tokio::process::Child,
    _job: Option<&Job>,
) -> Result<(), Infallible> {
    Ok(())
}

/// Sends SIGTERM to the process group. Returns true: the group gets a grace
/// period to exit.
pub(super) fn request_exit(pid: Option<u32>) -> bool {
    signal_group(pid, SIGTERM);
    true
}

pub(super) fn kill_tree(pid: Option<u32>, _job: Option<&Job>) {
    signal_group(pid, SIGKILL);
}

fn signal_group(pid: Option<u32>, signal: libc::c_int) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // Negative PIDs address the process group.
    let res = unsafe { libc::kill(-pgid, signal) };
    if res == -1 {
        let error = std::io::Error::last_os_error();
        // ESRCH: the group is already gone.
        if error.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, signal, %error, "failed to signal process group");
        }
    }
}
