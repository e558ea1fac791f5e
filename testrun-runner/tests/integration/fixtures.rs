// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, eyre};
use std::{os::unix::fs::PermissionsExt, sync::Once, time::Duration};
use testrun_runner::{
    config::{core::RunnerConfig, elements::RepeatPolicy},
    coordinator::SimpleCoordinator,
    reporter::{events::TestStatus, sink::MemorySink},
    runner::TestRun,
    signal::InterruptSignal,
    test_spec::TestSpec,
};

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Either may already have been installed.
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// A test running `script` through `sh -c`.
pub(crate) fn sh_test(name: &str, script: &str) -> TestSpec {
    TestSpec::new(name, "sh").with_args(["-c", script])
}

/// Runner config with a short grace period, so that timeouts resolve quickly.
pub(crate) fn test_config() -> RunnerConfig {
    RunnerConfig::default_config().with_timeouts(Duration::from_secs(60), Duration::from_millis(500))
}

/// Writes an executable shell script into `dir`.
pub(crate) fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

pub(crate) fn temp_dir() -> Result<Utf8TempDir> {
    Ok(camino_tempfile::Builder::new()
        .prefix("testrun-runner-")
        .tempdir()?)
}

/// A temporary directory under the current directory, along with its path
/// relative to it.
pub(crate) fn relative_temp_dir() -> Result<(Utf8TempDir, Utf8PathBuf)> {
    let dir = camino_tempfile::Builder::new()
        .prefix("testrun-runner-")
        .tempdir_in(".")?;
    let relative = dir
        .path()
        .file_name()
        .map(Utf8PathBuf::from)
        .ok_or_else(|| eyre!("temp dir {} has no name", dir.path()))?;
    Ok((dir, relative))
}

/// Number of lines in a file, or 0 if it doesn't exist.
pub(crate) fn count_lines(path: &Utf8Path) -> usize {
    std::fs::read_to_string(path).map_or(0, |contents| contents.lines().count())
}

/// Everything a run borrows from its scheduler.
pub(crate) struct Harness {
    pub(crate) config: RunnerConfig,
    pub(crate) coordinator: SimpleCoordinator,
    pub(crate) sink: MemorySink,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(test_config())
    }

    pub(crate) fn with_config(config: RunnerConfig) -> Self {
        Self {
            config,
            coordinator: SimpleCoordinator::new(),
            sink: MemorySink::new(),
        }
    }

    pub(crate) fn run<'a>(&'a self, spec: &'a TestSpec) -> TestRun<'a> {
        TestRun::new(spec, 1, &self.config, &self.coordinator, &self.sink)
    }

    /// Runs `spec` to completion with the given repeat policy.
    pub(crate) async fn execute(&self, spec: &TestSpec, repeat: RepeatPolicy) -> TestStatus {
        let mut run = self.run(spec).with_repeat(repeat);
        tokio::time::timeout(
            Duration::from_secs(60),
            run.execute(1, InterruptSignal::never()),
        )
        .await
        .expect("test run completed within 60 seconds")
    }
}
