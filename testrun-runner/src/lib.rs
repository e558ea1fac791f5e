// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Runs a single test as a managed child process.
//!
//! A [`TestRun`](runner::TestRun) owns every attempt of one test: it resolves
//! and launches the executable, captures its output line by line, enforces a
//! timeout, classifies the outcome, decides whether another attempt is
//! warranted, and finally hands a [`FinalizedTest`](reporter::events::FinalizedTest)
//! to a [`ResultSink`](reporter::sink::ResultSink) while releasing its slot on
//! the owning [`RunCoordinator`](coordinator::RunCoordinator).
//!
//! Deciding *which* tests run, in which order and how many at once is up to
//! the caller.

pub mod config;
pub mod coordinator;
pub mod cost;
pub mod errors;
mod helpers;
pub mod post_process;
pub mod reporter;
pub mod runner;
pub mod signal;
pub mod test_command;
pub mod test_output;
pub mod test_spec;
mod time;

pub use helpers::num_width;
