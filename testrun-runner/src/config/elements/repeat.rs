// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::reporter::events::TestStatus;
use rand::{RngExt, distr::OpenClosed01};
use serde::Deserialize;
use std::{fmt, num::NonZeroU32, time::Duration};

/// Type for the `repeat` config key.
///
/// Controls how many attempts of a test are made, and which attempt outcomes
/// end the sequence early. Exactly one [`RepeatMode`] is active per run.
#[derive(Debug, Copy, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RepeatPolicy {
    /// Which attempt outcomes end the sequence early.
    pub mode: RepeatMode,

    /// Maximum number of attempts, including the first one.
    pub count: NonZeroU32,

    /// Delay between attempts.
    #[serde(default, with = "humantime_serde")]
    pub delay: Duration,

    /// If set to true, randomness will be added to the delay on each attempt.
    #[serde(default)]
    pub jitter: bool,
}

/// The mode of a [`RepeatPolicy`].
#[derive(Debug, Copy, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum RepeatMode {
    /// Run exactly `count` times, irrespective of individual outcomes. Used to
    /// detect flakiness.
    Count,

    /// Stop on the first failing attempt, or after `count` passing attempts.
    UntilFail,

    /// Stop on the first passing attempt, or after `count` failing attempts.
    UntilPass,

    /// Make another attempt only if the previous one timed out.
    AfterTimeout,
}

impl Default for RepeatPolicy {
    #[inline]
    fn default() -> Self {
        Self::once()
    }
}

impl RepeatPolicy {
    /// A policy that runs a test exactly once.
    pub const fn once() -> Self {
        Self {
            mode: RepeatMode::Count,
            count: NonZeroU32::MIN,
            delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Creates a new policy with no delay between attempts.
    pub fn new(mode: RepeatMode, count: NonZeroU32) -> Self {
        Self {
            mode,
            count,
            delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Returns the maximum number of attempts.
    pub fn count(&self) -> u32 {
        self.count.get()
    }

    /// Returns true if, given the outcome of the attempt that just finished,
    /// this policy asks for another attempt (assuming any remain).
    ///
    /// Attempts that never ran or were interrupted are never repeated, whatever
    /// the mode.
    pub fn wants_another_attempt(&self, status: TestStatus) -> bool {
        if !status.is_repeatable() {
            return false;
        }
        match self.mode {
            RepeatMode::Count => true,
            RepeatMode::UntilFail => status.is_success(),
            RepeatMode::UntilPass => !status.is_success(),
            RepeatMode::AfterTimeout => matches!(status, TestStatus::Timeout(_)),
        }
    }

    /// Returns the delay to wait before the next attempt.
    pub(crate) fn next_delay(&self) -> Duration {
        if self.jitter {
            apply_jitter(self.delay)
        } else {
            self.delay
        }
    }
}

fn apply_jitter(duration: Duration) -> Duration {
    let jitter: f64 = rand::rng().sample(OpenClosed01);
    // Apply jitter in the range (0.5, 1].
    duration.mul_f64(0.5 + jitter / 2.)
}

pub(in crate::config) fn deserialize_repeat_policy<'de, D>(
    deserializer: D,
) -> Result<RepeatPolicy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;

    impl<'de2> serde::de::Visitor<'de2> for V {
        type Value = RepeatPolicy;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "a table ({{ mode = \"until-fail\", count = 5, delay = \"1s\", jitter = true }}) or a positive number (5)"
            )
        }

        // Note that TOML uses i64, not u64.
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let count = u32::try_from(v)
                .ok()
                .and_then(NonZeroU32::new)
                .ok_or_else(|| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Signed(v), &self)
                })?;
            Ok(RepeatPolicy::new(RepeatMode::Count, count))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let count = u32::try_from(v)
                .ok()
                .and_then(NonZeroU32::new)
                .ok_or_else(|| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Unsigned(v), &self)
                })?;
            Ok(RepeatPolicy::new(RepeatMode::Count, count))
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de2>,
        {
            RepeatPolicy::deserialize(serde::de::value::MapAccessDeserializer::new(map))
        }
    }

    let policy = deserializer.deserialize_any(V)?;

    // Jitter can't be specified if delay is 0.
    if policy.delay.is_zero() && policy.jitter {
        return Err(serde::de::Error::custom(
            "`jitter` cannot be true if `delay` isn't specified or is zero",
        ));
    }

    Ok(policy)
}
