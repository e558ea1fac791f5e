// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The interface a [`TestRun`](crate::runner::TestRun) uses to talk back to
//! its scheduler.

use crate::cost::WeightedCost;
use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

/// The scheduler side of a test run.
///
/// A run borrows its coordinator for its whole lifetime; the coordinator owns
/// the concurrency slots and decides what runs next.
pub trait RunCoordinator: Send + Sync {
    /// Marks one more test as completed, returning the new completed count.
    ///
    /// Used for the `completed/total` prefix of result lines.
    fn mark_completed(&self) -> usize;

    /// Releases the slot held by the test at `index`.
    ///
    /// Called exactly once per test run, on every exit path, including tests
    /// that never launched.
    fn release_slot(&self, index: usize, cost: &WeightedCost);
}

/// A [`RunCoordinator`] that counts completions and records released slots.
///
/// Suitable for drivers that run a fixed batch and only need to know which
/// tests are done.
#[derive(Debug, Default)]
pub struct SimpleCoordinator {
    completed: AtomicUsize,
    released: Mutex<Vec<(usize, WeightedCost)>>,
}

impl SimpleCoordinator {
    /// Creates a new coordinator with no completed tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of tests completed so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// The indexes of released slots, with their costs, in release order.
    pub fn released(&self) -> Vec<(usize, WeightedCost)> {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RunCoordinator for SimpleCoordinator {
    fn mark_completed(&self) -> usize {
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn release_slot(&self, index: usize, cost: &WeightedCost) {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((index, *cost));
    }
}
