// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting of test results.
//!
//! A [`TestRun`](crate::runner::TestRun) describes each attempt with the types
//! in [`events`], formats per-attempt log lines with the [`displayer`], and
//! hands the final result to a [`ResultSink`](sink::ResultSink).

mod displayer;
pub mod events;
pub mod sink;

pub use displayer::*;
