// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for testrun-runner.
//!
//! The [`RunnerConfig`](core::RunnerConfig) is built from an embedded default
//! config with optional user files layered on top.

pub mod core;
pub mod elements;
