// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    helpers::{format_secs, plural},
    num_width,
    reporter::events::{AttemptHistory, ExitDetail, TestResult, TestStatus},
};
use owo_colors::{OwoColorize, Style};
use swrite::{SWrite, swrite};

/// The column at which the status of a result line starts, for names short
/// enough to fit.
const STATUS_COLUMN: usize = 40;

/// Formats the per-attempt start and result lines.
///
/// Indexes are left-padded to the width of the total test count so that lines
/// for a whole batch stay aligned.
#[derive(Clone, Debug)]
pub struct AttemptDisplayer {
    total: usize,
    width: usize,
    styles: Styles,
}

impl AttemptDisplayer {
    /// Creates a displayer for a batch of `total` tests.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            width: num_width(total),
            styles: Styles::default(),
        }
    }

    /// Enables ANSI colors in the output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// The line logged when an attempt starts.
    ///
    /// ```text
    ///     Start  7: parser_roundtrip [fast, parser]
    /// ```
    pub fn start_line(
        &self,
        index: usize,
        name: &str,
        labels: &[String],
        attempt: u32,
        total_attempts: u32,
    ) -> String {
        let mut out = format!(
            "    Start {:>width$}: {}",
            index.style(self.styles.count),
            name,
            width = self.width
        );
        if !labels.is_empty() {
            swrite!(out, " [{}]", labels.join(", "));
        }
        if total_attempts > 1 {
            swrite!(out, " (attempt {attempt} of {total_attempts})");
        }
        out
    }

    /// The line logged when an attempt has been classified.
    ///
    /// ```text
    ///  3/12 Test  #7: parser_roundtrip .............   Passed    0.42 sec
    /// ```
    pub fn result_line(
        &self,
        completed: usize,
        result: &TestResult,
        history: &AttemptHistory,
    ) -> String {
        let mut out = format!(
            "{:>width$}/{} Test #{:>width$}: {} ",
            completed.style(self.styles.count),
            self.total.style(self.styles.count),
            result.index.style(self.styles.count),
            result.name,
            width = self.width,
        );

        let used = 2 * self.width + 1 + self.total.to_string().len() + 9 + result.name.len();
        let dots = STATUS_COLUMN.saturating_sub(used).max(3);
        out.push_str(&".".repeat(dots));

        let status = result.status.to_string();
        swrite!(
            out,
            "{:>15}  {:>6} sec",
            status.style(self.status_style(result.status)),
            format_secs(result.duration),
        );

        if let Some(detail) = self.detail(result, history) {
            swrite!(out, "\n{detail}");
        }
        out
    }

    fn status_style(&self, status: TestStatus) -> Style {
        match status {
            TestStatus::Passed => self.styles.pass,
            TestStatus::Skipped | TestStatus::DependencySkip => self.styles.skip,
            _ => self.styles.fail,
        }
    }

    fn detail(&self, result: &TestResult, history: &AttemptHistory) -> Option<String> {
        let mut parts = Vec::new();

        match result.status {
            TestStatus::Crashed => {
                if let ExitDetail::Abort(abort_status) = result.exit {
                    parts.push(format!("terminated by {abort_status}"));
                }
            }
            TestStatus::Failed => {
                if let Some(code) = result.exit.code() {
                    parts.push(format!("exit code {code}"));
                }
            }
            _ => {}
        }
        if let Some(expression) = &result.matched_expression {
            parts.push(format!("matched `{expression}`"));
        }
        if history.attempts() > 1 {
            let failures = history.failures();
            parts.push(format!(
                "{} {}, {} {}",
                history.attempts(),
                plural::attempts_str(history.attempts()),
                failures,
                plural::failures_str(failures),
            ));
            if history.is_flaky() {
                parts.push(format!("{}", "flaky".style(self.styles.retry)));
            }
        }
        if let Some(compressed) = result.output.compressed() {
            parts.push(format!(
                "output compressed to {:.1}%",
                compressed.ratio() * 100.0
            ));
        }

        let mut detail = String::new();
        if !parts.is_empty() {
            swrite!(detail, "        ({})", parts.join(", "));
        }
        if let Some(diagnostic) = &result.diagnostic {
            if !detail.is_empty() {
                detail.push('\n');
            }
            for (i, line) in diagnostic.lines().enumerate() {
                if i > 0 {
                    detail.push('\n');
                }
                swrite!(detail, "        {line}");
            }
        }
        (!detail.is_empty()).then_some(detail)
    }
}

#[derive(Clone, Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    retry: Style,
    fail: Style,
    skip: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.retry = Style::new().magenta().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
    }
}
