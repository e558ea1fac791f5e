// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests that run real processes through `/bin/sh`.

#![cfg(unix)]

mod basic;
mod fixtures;
mod repeat;
mod timeout;
