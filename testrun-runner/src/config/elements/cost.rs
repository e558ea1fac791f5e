// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Deserialize;
use std::time::Duration;

/// Settings for the weighted-cost estimate: the `[cost]` table.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CostSettings {
    #[serde(with = "humantime_serde")]
    default_duration: Duration,
}

impl CostSettings {
    /// The duration assumed for a test that has never run.
    pub fn default_duration(&self) -> Duration {
        self.default_duration
    }
}
