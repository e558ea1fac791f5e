// Copyright (c) The testrun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Destinations for finalized results.

use crate::reporter::events::FinalizedTest;
use std::sync::{Mutex, PoisonError};

/// Receives the final result of each test.
///
/// Many test runs share a single sink and call [`record`](Self::record)
/// concurrently, each exactly once.
pub trait ResultSink: Send + Sync {
    /// Records the final result of a test.
    fn record(&self, finalized: FinalizedTest);
}

/// A [`ResultSink`] that keeps every result in memory, in the order they were
/// recorded.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<FinalizedTest>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of results recorded so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns a copy of the result for the named test, if recorded.
    pub fn get(&self, name: &str) -> Option<FinalizedTest> {
        self.lock().iter().find(|f| f.last.name == name).cloned()
    }

    /// Consumes the sink, returning all results.
    pub fn into_results(self) -> Vec<FinalizedTest> {
        self.results
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FinalizedTest>> {
        // A panic while holding the lock can't leave a half-pushed result behind.
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResultSink for MemorySink {
    fn record(&self, finalized: FinalizedTest) {
        self.lock().push(finalized);
    }
}
