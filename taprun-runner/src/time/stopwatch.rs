// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long a test takes to run.
//!
//! The start is recorded immediately before the child process is spawned and
//! the end when it is reaped. Only the monotonic clock is involved: TAP
//! output carries elapsed durations, never wall-clock timestamps.

use std::time::{Duration, Instant};

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            instant: Instant::now(),
        }
    }

    pub(crate) fn end(&self) -> StopwatchEnd {
        StopwatchEnd {
            duration: self.instant.elapsed(),
        }
    }
}

/// The end state of a stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchEnd {
    pub(crate) duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwatch_is_monotonic() {
        let start = stopwatch();
        std::thread::sleep(Duration::from_millis(10));
        let first = start.end();
        std::thread::sleep(Duration::from_millis(10));
        let second = start.end();
        assert!(
            second.duration >= first.duration,
            "later snapshot ({:?}) is at least the earlier one ({:?})",
            second.duration,
            first.duration,
        );
    }
}
