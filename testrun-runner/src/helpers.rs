// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for testrun-runner.

use std::time::Duration;

/// Returns the number of decimal digits needed to print any index up to `n`.
///
/// Used to left-pad per-test log lines so that they stay aligned across a
/// batch: counts below 10 need one digit, counts below 100 need two, and so
/// on.
pub fn num_width(n: usize) -> usize {
    let mut width = 1;
    let mut rest = n / 10;
    while rest > 0 {
        width += 1;
        rest /= 10;
    }
    width
}

/// Utilities for pluralizing various words based on count or plurality.
pub(crate) mod plural {
    /// Returns "attempt" if `count` is 1, otherwise "attempts".
    pub(crate) fn attempts_str(count: u32) -> &'static str {
        if count == 1 { "attempt" } else { "attempts" }
    }

    /// Returns "failure" if `count` is 1, otherwise "failures".
    pub(crate) fn failures_str(count: u32) -> &'static str {
        if count == 1 { "failure" } else { "failures" }
    }
}

/// Formats a duration as fractional seconds with two decimal places, the way
/// result lines print it.
pub(crate) fn format_secs(duration: Duration) -> String {
    format!("{:.2}", duration.as_secs_f64())
}

/// Returns the name of a Unix signal, if known.
#[cfg(unix)]
pub(crate) fn signal_str(signal: i32) -> Option<&'static str> {
    // Signal numbers shared by Linux, macOS, FreeBSD and illumos.
    match signal {
        1 => Some("HUP"),
        2 => Some("INT"),
        3 => Some("QUIT"),
        4 => Some("ILL"),
        5 => Some("TRAP"),
        6 => Some("ABRT"),
        8 => Some("FPE"),
        9 => Some("KILL"),
        11 => Some("SEGV"),
        13 => Some("PIPE"),
        14 => Some("ALRM"),
        15 => Some("TERM"),
        _ => None,
    }
}
