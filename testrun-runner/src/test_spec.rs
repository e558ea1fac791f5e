// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static description of a test.
//!
//! A [`TestSpec`] is owned by the scheduler and is immutable while the test
//! runs. A [`TestRun`](crate::runner::TestRun) only ever borrows it.

use crate::errors::ExpressionParseError;
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use regex::bytes::Regex;
use std::{fmt, time::Duration};

/// Everything needed to run one test.
#[derive(Clone, Debug)]
pub struct TestSpec {
    /// The test's name, unique within a batch.
    pub name: String,

    /// The program to run. Either a path (relative paths are resolved
    /// against [`cwd`](Self::cwd)) or a bare name looked up on `PATH`.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// The working directory. Defaults to the current directory.
    pub cwd: Option<Utf8PathBuf>,

    /// The test's own timeout. `None` means the runner's default applies;
    /// `Some(Duration::ZERO)` disables the timeout.
    pub timeout: Option<Duration>,

    /// Environment variables layered onto the runner's environment, in order.
    pub env: IndexMap<String, String>,

    /// Output expressions that force a failure when matched.
    pub fail_expressions: ExpressionSet,

    /// Output expressions of which at least one must match for the test to
    /// pass. Empty means the exit code decides.
    pub pass_expressions: ExpressionSet,

    /// Output expressions that mark the test as skipped.
    pub skip_expressions: ExpressionSet,

    /// An exit code that marks the test as skipped.
    pub skip_return_code: Option<i32>,

    /// Inverts the outcome: the test is expected to fail.
    pub will_fail: bool,

    /// Names of tests that must have succeeded before this one runs.
    pub depends_on: Vec<String>,

    /// Resources the test occupies while running.
    pub weight: ResourceWeight,

    /// Historical duration data, if any.
    pub cost_hint: Option<CostHint>,

    /// Free-form labels. Only used for display.
    pub labels: Vec<String>,
}

impl TestSpec {
    /// Creates a new spec running `program` with no arguments and default settings.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
            env: IndexMap::new(),
            fail_expressions: ExpressionSet::default(),
            pass_expressions: ExpressionSet::default(),
            skip_expressions: ExpressionSet::default(),
            skip_return_code: None,
            will_fail: false,
            depends_on: Vec::new(),
            weight: ResourceWeight::default(),
            cost_hint: None,
            labels: Vec::new(),
        }
    }

    /// Sets the arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets an explicit timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an environment variable override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A set of compiled output expressions, matched against raw output bytes.
#[derive(Clone, Default)]
pub struct ExpressionSet {
    expressions: Vec<Regex>,
}

impl ExpressionSet {
    /// Compiles a set of expressions.
    pub fn new<I, S>(expressions: I) -> Result<Self, ExpressionParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let expressions = expressions
            .into_iter()
            .map(|expr| {
                let expr = expr.as_ref();
                Regex::new(expr).map_err(|error| ExpressionParseError::new(expr, error))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { expressions })
    }

    /// Returns true if there are no expressions.
    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// Returns the first expression that matches `output`, as written.
    pub fn first_match(&self, output: &[u8]) -> Option<&str> {
        self.expressions
            .iter()
            .find(|expr| expr.is_match(output))
            .map(|expr| expr.as_str())
    }
}

impl fmt::Debug for ExpressionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.expressions.iter().map(|expr| expr.as_str()))
            .finish()
    }
}

/// Resources a test occupies while it runs.
///
/// Only used as a scheduling hint: the scheduler allocates the resources, the
/// runner folds them into the [weighted cost](crate::cost).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceWeight {
    /// Number of processors the test uses.
    pub processors: u32,

    /// Additional resource units (e.g. GPUs or devices) the test occupies.
    pub resource_units: u32,
}

impl Default for ResourceWeight {
    fn default() -> Self {
        Self {
            processors: 1,
            resource_units: 0,
        }
    }
}

impl ResourceWeight {
    /// The multiplier applied to a duration to get a weighted cost. Always at least 1.
    pub fn factor(&self) -> f64 {
        f64::from(self.processors.max(1)) + f64::from(self.resource_units)
    }
}

/// Historical timing data for a test, as persisted by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostHint {
    /// Running average of passing durations.
    pub average: Duration,

    /// Number of passing runs folded into `average`.
    pub previous_runs: u32,
}
