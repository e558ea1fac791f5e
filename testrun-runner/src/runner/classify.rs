// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    reporter::events::{ExitDetail, TestStatus, TimeoutSource},
    test_spec::TestSpec,
};

/// What happened to an attempt's process, before looking at its output.
#[derive(Clone, Copy, Debug)]
pub(super) struct AttemptEnd {
    pub(super) timed_out: Option<TimeoutSource>,
    pub(super) interrupted: bool,
    pub(super) exit: ExitDetail,
}

/// The classification of an attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct Classification {
    pub(super) status: TestStatus,
    pub(super) matched_expression: Option<String>,
}

impl Classification {
    fn new(status: TestStatus) -> Self {
        Self {
            status,
            matched_expression: None,
        }
    }

    fn matched(status: TestStatus, expression: &str) -> Self {
        Self {
            status,
            matched_expression: Some(expression.to_owned()),
        }
    }
}

/// Classifies a finished attempt.
///
/// Precedence, highest first: timeout, interrupt, fail expressions, abnormal
/// termination, skip code and skip expressions, pass expressions, exit code.
/// `will_fail` then swaps pass and fail.
pub(super) fn classify(spec: &TestSpec, end: AttemptEnd, output: &[u8]) -> Classification {
    if let Some(source) = end.timed_out {
        return Classification::new(TestStatus::Timeout(source));
    }
    if end.interrupted {
        return Classification::new(TestStatus::Interrupted);
    }

    let mut classification = classify_output(spec, end.exit, output);
    if spec.will_fail {
        classification.status = classification.status.invert();
    }
    classification
}

fn classify_output(spec: &TestSpec, exit: ExitDetail, output: &[u8]) -> Classification {
    if let Some(expression) = spec.fail_expressions.first_match(output) {
        return Classification::matched(TestStatus::Failed, expression);
    }
    if matches!(exit, ExitDetail::Abort(_)) {
        return Classification::new(TestStatus::Crashed);
    }
    if spec.skip_return_code.is_some() && exit.code() == spec.skip_return_code {
        return Classification::new(TestStatus::Skipped);
    }
    if let Some(expression) = spec.skip_expressions.first_match(output) {
        return Classification::matched(TestStatus::Skipped, expression);
    }
    if !spec.pass_expressions.is_empty() {
        return match spec.pass_expressions.first_match(output) {
            Some(expression) => Classification::matched(TestStatus::Passed, expression),
            None => Classification::new(TestStatus::Failed),
        };
    }
    match exit {
        ExitDetail::Code(0) => Classification::new(TestStatus::Passed),
        // No exit information means the process could not be waited on.
        ExitDetail::Code(_) | ExitDetail::Abort(_) | ExitDetail::None => {
            Classification::new(TestStatus::Failed)
        }
    }
}
