// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Individual configuration elements.

mod cost;
mod output;
mod repeat;
mod timeout;

pub use cost::*;
pub use output::*;
pub use repeat::*;
pub use timeout::*;
