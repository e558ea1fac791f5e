// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

pub(super) use win32job::Job;
use win32job::JobError;
use windows_sys::Win32::System::JobObjects::TerminateJobObject;

pub(super) fn set_process_group(_cmd: &mut std::process::Command) {
    // Windows has no process groups: the job object covers the process tree.
}

pub(super) fn create_job() -> Result<Job, JobError> {
    Job::create_with_limit_info(win32job::ExtendedLimitInfo::new().limit_breakaway_ok())
}

pub(super) fn assign_process_to_job(
    child: &tokio::process::Child,
    job: Option<&Job>,
) -> Result<(), JobError> {
    if let Some(job) = job {
        let Some(handle) = child.raw_handle() else {
            // The child has already exited.
            return Ok(());
        };
        job.assign_process(handle as isize)?;
    }
    Ok(())
}

pub(super) fn request_exit(_pid: Option<u32>) -> bool {
    // There is no equivalent of SIGTERM for console processes that aren't
    // attached to our console, so the job object is terminated right away.
    false
}

pub(super) fn kill_tree(_pid: Option<u32>, job: Option<&Job>) {
    if let Some(job) = job {
        let handle = job.handle();
        unsafe {
            // Ignore the error here: it's likely due to the process exiting.
            // 1 is the exit code the processes will see.
            _ = TerminateJobObject(handle as _, 1);
        }
    }
}
