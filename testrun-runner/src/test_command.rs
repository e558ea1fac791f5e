// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolving, building and spawning test processes.

use crate::{
    errors::{ChildStartError, ExecutableNotFoundError},
    test_spec::TestSpec,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{process::Stdio, sync::Arc};
use tracing::debug;

mod imp;

pub use imp::{ProcessHandle, TerminateMethod};

/// Environment variable set to the 1-based attempt number.
pub const ATTEMPT_ENV: &str = "TESTRUN_ATTEMPT";

/// Environment variable set to the maximum number of attempts.
pub const TOTAL_ATTEMPTS_ENV: &str = "TESTRUN_TOTAL_ATTEMPTS";

/// Environment variable set to the test's name.
pub const TEST_NAME_ENV: &str = "TESTRUN_TEST_NAME";

/// Environment variable set to the test's index within the batch.
pub const INDEX_ENV: &str = "TESTRUN_INDEX";

/// Resolves the program of a test to an executable on the file system.
///
/// Programs containing a path separator are resolved against `cwd`; bare names
/// are looked up on `PATH`. The returned path is absolute, so it names the same
/// file once the child has changed into `cwd`.
pub fn resolve_executable(
    program: &str,
    cwd: &Utf8Path,
) -> Result<Utf8PathBuf, ExecutableNotFoundError> {
    let candidates = if is_path_like(program) {
        vec![absolute(cwd).join(program)]
    } else {
        path_candidates(program)
    };

    for candidate in &candidates {
        if is_executable(candidate) {
            debug!(%program, resolved = %candidate, "resolved executable");
            return Ok(candidate.clone());
        }
    }
    Err(ExecutableNotFoundError::new(program, candidates))
}

fn absolute(path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        return path.to_owned();
    }
    match std::path::absolute(path).map(Utf8PathBuf::try_from) {
        Ok(Ok(path)) => path,
        // The current directory is gone or not UTF-8; spawning will report it.
        _ => path.to_owned(),
    }
}

fn is_path_like(program: &str) -> bool {
    program.contains('/') || (cfg!(windows) && program.contains('\\'))
}

fn path_candidates(program: &str) -> Vec<Utf8PathBuf> {
    let Some(path) = std::env::var_os("PATH") else {
        return Vec::new();
    };
    std::env::split_paths(&path)
        // Non-UTF-8 PATH entries can't hold a test we could name.
        .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
        .flat_map(|dir| {
            let mut names = vec![dir.join(program)];
            if cfg!(windows) && Utf8Path::new(program).extension().is_none() {
                names.push(dir.join(format!("{program}.exe")));
            }
            names
        })
        .collect()
}

fn is_executable(path: &Utf8Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    metadata.is_file() && has_execute_permission(&metadata)
}

#[cfg(unix)]
fn has_execute_permission(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_execute_permission(_metadata: &std::fs::Metadata) -> bool {
    true
}

/// A to-be-run command for one attempt of a test.
#[derive(Clone, Debug)]
pub struct TestCommand {
    program: Utf8PathBuf,
    args: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    env: Vec<(String, String)>,
}

impl TestCommand {
    /// Creates a new command running the resolved `program` with the test's
    /// arguments, working directory and environment overrides.
    pub fn new(spec: &TestSpec, program: Utf8PathBuf) -> Self {
        Self {
            program,
            args: spec.args.clone(),
            cwd: spec.cwd.clone(),
            env: spec
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Sets the per-attempt environment variables.
    ///
    /// These are applied after the test's own overrides, so they always win.
    pub(crate) fn set_attempt_env(
        &mut self,
        name: &str,
        index: usize,
        attempt: u32,
        total_attempts: u32,
    ) {
        self.env.extend([
            (TEST_NAME_ENV.to_owned(), name.to_owned()),
            (INDEX_ENV.to_owned(), index.to_string()),
            (ATTEMPT_ENV.to_owned(), attempt.to_string()),
            (TOTAL_ATTEMPTS_ENV.to_owned(), total_attempts.to_string()),
        ]);
    }

    /// The resolved program.
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// The value an environment variable will have in the test process, if
    /// the command sets it.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The program followed by its arguments, each shell-quoted.
    pub fn command_line(&self) -> String {
        shell_words::join(
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)),
        )
    }

    /// Spawns the command as a new process group, capturing stdout and stderr.
    pub(crate) fn spawn(self) -> Result<ProcessHandle, ChildStartError> {
        if let Some(cwd) = &self.cwd {
            if !cwd.is_dir() {
                return Err(ChildStartError::WorkingDirectory { path: cwd.clone() });
            }
        }

        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        // Later entries override earlier ones.
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        ProcessHandle::spawn(cmd).map_err(|error| ChildStartError::Spawn(Arc::new(error)))
    }
}
