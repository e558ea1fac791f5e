// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Weighted cost: the scheduling hint derived from a test's duration and the
//! resources it occupies.
//!
//! Schedulers use the cost to start expensive tests first so that they don't
//! end up as stragglers at the end of a batch.

use crate::test_spec::{CostHint, ResourceWeight};
use std::time::Duration;

/// Tracks the duration history of one test and turns it into a
/// [`WeightedCost`].
#[derive(Clone, Debug)]
pub struct CostEstimator {
    weight: ResourceWeight,
    default_duration: Duration,
    average: Option<Duration>,
    previous_runs: u32,
    latest: Option<Duration>,
}

impl CostEstimator {
    /// Creates a new estimator from the persisted hint, if any.
    pub fn new(hint: Option<CostHint>, weight: ResourceWeight, default_duration: Duration) -> Self {
        let (average, previous_runs) = match hint {
            Some(hint) if hint.previous_runs > 0 => (Some(hint.average), hint.previous_runs),
            _ => (None, 0),
        };
        Self {
            weight,
            default_duration,
            average,
            previous_runs,
            latest: None,
        }
    }

    /// Records the duration of an attempt.
    ///
    /// Only passing attempts update the running average, so that early
    /// failures don't make a test look cheap.
    pub fn record(&mut self, duration: Duration, passed: bool) {
        self.latest = Some(duration);
        if passed {
            let runs = f64::from(self.previous_runs);
            let average = self.average.map_or(0.0, |avg| avg.as_secs_f64());
            let updated = (runs * average + duration.as_secs_f64()) / (runs + 1.0);
            self.average = Some(Duration::from_secs_f64(updated));
            self.previous_runs = self.previous_runs.saturating_add(1);
        }
    }

    /// The duration the estimate is based on: the latest measurement, then
    /// the historical average, then the configured default.
    pub fn basis(&self) -> Duration {
        self.latest.or(self.average).unwrap_or(self.default_duration)
    }

    /// Computes the current weighted cost.
    pub fn estimate(&self) -> WeightedCost {
        WeightedCost {
            value: weighted_cost(self.basis(), self.weight),
            hint: self.average.map(|average| CostHint {
                average,
                previous_runs: self.previous_runs,
            }),
        }
    }
}

/// The cost of a test, as reported to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedCost {
    value: f64,
    hint: Option<CostHint>,
}

impl WeightedCost {
    /// The scalar cost, in weighted seconds.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The updated duration history to persist for the next run, if the test
    /// has ever passed.
    pub fn hint(&self) -> Option<CostHint> {
        self.hint
    }
}

/// Computes the weighted cost of a duration.
///
/// Non-decreasing in `duration` for a fixed `weight`.
pub fn weighted_cost(duration: Duration, weight: ResourceWeight) -> f64 {
    duration.as_secs_f64() * weight.factor()
}
