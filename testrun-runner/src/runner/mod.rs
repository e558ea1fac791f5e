// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test run state machine.
//!
//! A [`TestRun`] moves through [`RunPhase`]s:
//!
//! ```text
//! Idle -> Launching -> Running -> Classifying -> Finalized
//!             ^                        |
//!             +------- Retrying <------+
//! ```
//!
//! Callers either drive each step themselves ([`TestRun::start`],
//! [`TestRun::wait_for_exit`], [`TestRun::finish`], [`TestRun::start_again`])
//! or hand the whole sequence to [`TestRun::execute`].

mod attempt;
mod classify;
mod imp;

pub use attempt::FeedControl;
pub use imp::*;
