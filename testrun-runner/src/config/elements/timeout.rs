// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::reporter::events::TimeoutSource;
use std::time::Duration;

/// The timeout that applies to a single attempt.
///
/// Produced by [`TestTimeout::resolve`] from the test's own timeout (if any)
/// and the runner default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TestTimeout {
    /// How long the attempt may run. `None` means no timeout at all.
    pub period: Option<Duration>,

    /// Whether the timeout was set explicitly by the test or is the runner
    /// default. Only affects how a timeout is reported.
    pub source: TimeoutSource,
}

impl TestTimeout {
    /// Resolves the effective timeout for a test.
    ///
    /// A zero duration, either explicit or default, disables the timeout.
    pub fn resolve(explicit: Option<Duration>, default: Duration) -> Self {
        let (period, source) = match explicit {
            Some(period) => (period, TimeoutSource::Explicit),
            None => (default, TimeoutSource::Default),
        };
        Self {
            period: (!period.is_zero()).then_some(period),
            source,
        }
    }

    /// Returns true if the timeout was set explicitly.
    pub fn is_explicit(&self) -> bool {
        self.source == TimeoutSource::Explicit
    }
}
