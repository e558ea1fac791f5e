// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::elements::{
        CostSettings, OutputSettings, RepeatPolicy, TestTimeout, deserialize_repeat_policy,
    },
    errors::{ConfigParseError, ConfigParseErrorKind},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Overall configuration for running tests.
///
/// Built from the embedded [default config](Self::DEFAULT_CONFIG), with any
/// number of user config files layered on top. Later files override earlier
/// ones key by key.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    run: RunSettings,
    output: OutputSettings,
    cost: CostSettings,
}

impl RunnerConfig {
    /// The default configuration, embedded in the binary.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../../default-config.toml");

    /// The placeholder file name used in errors about the embedded default config.
    pub const DEFAULT_CONFIG_NAME: &'static str = "<default config>";

    /// Reads the configuration from the default config plus the given files, in order.
    ///
    /// Files that do not exist are an error.
    pub fn from_sources<'a, I>(config_files: I) -> Result<Self, ConfigParseError>
    where
        I: IntoIterator<Item = &'a Utf8Path>,
    {
        let mut builder = Self::make_default_config();
        let mut last_file = Utf8PathBuf::from(Self::DEFAULT_CONFIG_NAME);
        for config_file in config_files {
            debug!(%config_file, "adding config source");
            builder = builder.add_source(File::new(config_file.as_str(), FileFormat::Toml));
            last_file = config_file.to_owned();
        }
        Self::build_and_deserialize(builder, last_file)
    }

    /// Reads the configuration from the default config plus a TOML string.
    ///
    /// Mostly useful for callers that embed their own configuration.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigParseError> {
        let builder = Self::make_default_config()
            .add_source(File::from_str(contents, FileFormat::Toml));
        Self::build_and_deserialize(builder, "<inline config>")
    }

    /// Returns the default configuration.
    pub fn default_config() -> Self {
        // The default config is checked by the test suite, so deserializing
        // it can only fail if the embedded file was edited incorrectly.
        match Self::build_and_deserialize(
            Self::make_default_config(),
            Self::DEFAULT_CONFIG_NAME,
        ) {
            Ok(config) => config,
            Err(error) => panic!("embedded default config is invalid: {error:?}"),
        }
    }

    /// Returns the `[run]` settings.
    pub fn run(&self) -> &RunSettings {
        &self.run
    }

    /// Returns the `[output]` settings.
    pub fn output(&self) -> &OutputSettings {
        &self.output
    }

    /// Returns the `[cost]` settings.
    pub fn cost(&self) -> &CostSettings {
        &self.cost
    }

    /// Returns a copy of this config with a different repeat policy.
    ///
    /// Command-line options typically override the configured policy this way.
    pub fn with_repeat(mut self, repeat: RepeatPolicy) -> Self {
        self.run.repeat = repeat;
        self
    }

    /// Returns a copy of this config with different output settings.
    pub fn with_output(mut self, output: OutputSettings) -> Self {
        self.output = output;
        self
    }

    /// Returns a copy of this config with a different default timeout and
    /// grace period.
    pub fn with_timeouts(mut self, default_timeout: Duration, grace_period: Duration) -> Self {
        self.run.default_timeout = default_timeout;
        self.run.grace_period = grace_period;
        self
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize(
        builder: ConfigBuilder<DefaultState>,
        config_file: impl Into<Utf8PathBuf>,
    ) -> Result<Self, ConfigParseError> {
        let config_file = config_file.into();
        let config = builder.build().map_err(|error| {
            ConfigParseError::new(
                config_file.clone(),
                ConfigParseErrorKind::BuildError(Box::new(error)),
            )
        })?;
        let deserialized: RunnerConfigDeserialize = config.try_deserialize().map_err(|error| {
            ConfigParseError::new(
                config_file,
                ConfigParseErrorKind::DeserializeError(Box::new(error)),
            )
        })?;

        Ok(Self {
            run: deserialized.run,
            output: deserialized.output,
            cost: deserialized.cost,
        })
    }
}

/// The `[run]` table: timeouts and the repeat policy.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RunSettings {
    #[serde(with = "humantime_serde")]
    default_timeout: Duration,
    #[serde(with = "humantime_serde")]
    grace_period: Duration,
    #[serde(with = "humantime_serde")]
    leak_timeout: Duration,
    #[serde(deserialize_with = "deserialize_repeat_policy")]
    repeat: RepeatPolicy,
}

impl RunSettings {
    /// The timeout for tests that don't set their own. Zero disables it.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Resolves the timeout for a test given its own (optional) timeout.
    pub fn timeout_for(&self, explicit: Option<Duration>) -> TestTimeout {
        TestTimeout::resolve(explicit, self.default_timeout)
    }

    /// How long to wait after SIGTERM before SIGKILL.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// How long to keep draining output after the test process exits.
    pub fn leak_timeout(&self) -> Duration {
        self.leak_timeout
    }

    /// The repeat policy.
    pub fn repeat(&self) -> RepeatPolicy {
        self.repeat
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RunnerConfigDeserialize {
    run: RunSettings,
    output: OutputSettings,
    cost: CostSettings,
}
