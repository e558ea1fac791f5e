// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hooks that inspect a finished attempt and may override its status.
//!
//! Memory checkers and sanitizers report defects in the test's output while
//! the test itself exits successfully. A [`PostProcessHook`] sees the
//! captured output after classification and can turn such an attempt into a
//! failure.

use crate::{reporter::events::TestStatus, test_spec::ExpressionSet};
use std::fmt;

/// Inspects the output of a classified attempt.
///
/// Hooks are not consulted for attempts that were interrupted or never
/// launched.
pub trait PostProcessHook: Send + Sync + fmt::Debug {
    /// Called with the attempt's combined output and its status so far.
    fn post_process(&self, output: &[u8], status: TestStatus) -> PostProcessOutcome;
}

/// The result of a [`PostProcessHook`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostProcessOutcome {
    /// If set, replaces the attempt's status.
    pub status_override: Option<TestStatus>,

    /// Text appended to the attempt's diagnostic. Empty means nothing to add.
    pub diagnostics: String,
}

/// A hook that fails attempts whose output contains defect reports.
///
/// Each line matching any of the defect expressions is copied into the
/// diagnostics.
#[derive(Clone, Debug)]
pub struct DefectScanHook {
    defect_expressions: ExpressionSet,
}

impl DefectScanHook {
    /// Creates a new hook from a set of defect expressions.
    pub fn new(defect_expressions: ExpressionSet) -> Self {
        Self { defect_expressions }
    }
}

impl PostProcessHook for DefectScanHook {
    fn post_process(&self, output: &[u8], _status: TestStatus) -> PostProcessOutcome {
        let mut diagnostics = String::new();
        for line in output.split(|&b| b == b'\n') {
            if self.defect_expressions.first_match(line).is_some() {
                if !diagnostics.is_empty() {
                    diagnostics.push('\n');
                }
                diagnostics.push_str(String::from_utf8_lossy(line).trim_end());
            }
        }

        if diagnostics.is_empty() {
            PostProcessOutcome::default()
        } else {
            PostProcessOutcome {
                status_override: Some(TestStatus::Failed),
                diagnostics,
            }
        }
    }
}
