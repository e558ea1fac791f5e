// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testrun-runner.
//!
//! None of these are returned from the run operations themselves: a test that
//! fails to launch is still a test with a result. They show up as the
//! diagnostic attached to a [`TestResult`](crate::reporter::events::TestResult),
//! or as errors from configuration and test definitions.

use camino::Utf8PathBuf;
use config::ConfigError;
use std::{io, sync::Arc};
use thiserror::Error;

/// An error that occurred while parsing the runner config.
#[derive(Debug, Error)]
#[error("failed to parse testrun config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &camino::Utf8Path {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<ConfigError>),
}

/// A pass, fail or skip expression failed to compile.
#[derive(Clone, Debug, Error)]
#[error("invalid output expression `{expression}`")]
pub struct ExpressionParseError {
    expression: String,
    #[source]
    error: regex::Error,
}

impl ExpressionParseError {
    pub(crate) fn new(expression: impl Into<String>, error: regex::Error) -> Self {
        Self {
            expression: expression.into(),
            error,
        }
    }

    /// Returns the expression that failed to compile.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

/// The test's executable could not be resolved on the file system.
#[derive(Clone, Debug, Error)]
#[error("unable to find executable `{program}`")]
pub struct ExecutableNotFoundError {
    program: String,
    searched: Vec<Utf8PathBuf>,
}

impl ExecutableNotFoundError {
    pub(crate) fn new(program: impl Into<String>, searched: Vec<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            searched,
        }
    }

    /// The program that was looked up, as written in the test spec.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The candidate paths that were checked, in order.
    pub fn searched(&self) -> &[Utf8PathBuf] {
        &self.searched
    }
}

/// An error that occurred while starting a child process.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ChildStartError {
    /// The working directory for the test does not exist.
    #[error("working directory `{path}` does not exist")]
    WorkingDirectory {
        /// The working directory.
        path: Utf8PathBuf,
    },

    /// An error occurred while spawning the child process.
    #[error("error spawning child process")]
    Spawn(#[source] Arc<io::Error>),
}

/// An error that occurred while reading the output of, or waiting on, a
/// child process.
#[derive(Clone, Debug, Error)]
pub enum ChildFdError {
    /// An error occurred while reading standard output.
    #[error("error reading standard output")]
    ReadStdout(#[source] Arc<io::Error>),

    /// An error occurred while reading standard error.
    #[error("error reading standard error")]
    ReadStderr(#[source] Arc<io::Error>),

    /// An error occurred while waiting for the child process to exit.
    #[error("error waiting for child process to exit")]
    Wait(#[source] Arc<io::Error>),
}

/// An error that occurred while setting up the interrupt handler.
#[derive(Debug, Error)]
#[error("error setting up interrupt handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);
