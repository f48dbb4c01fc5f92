// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by taprun.

use crate::suite::MAX_TESTS;
use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// An error that occurred while registering a test into a
/// [`Suite`](crate::suite::Suite).
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RegisterError {
    /// The suite is at its documented capacity.
    #[error("suite already holds the maximum of {MAX_TESTS} tests")]
    TooManyTests,
}

/// An error that occurred while launching a single test process.
///
/// Launch failures are fatal to the whole run: the scheduler stops starting
/// new tests and surfaces the failure as an internal-error bail line.
#[derive(Clone, Debug, Error)]
pub enum LaunchError {
    /// Creating the output pipe failed.
    #[error("failed to create output pipe: {0}")]
    Pipe(#[source] Errno),

    /// Marking the pipe's read end non-blocking failed.
    #[error("failed to set pipe read end non-blocking: {0}")]
    Nonblock(#[source] Errno),

    /// Forking the test process failed.
    #[error("failed to fork test process: {0}")]
    Spawn(#[source] Errno),
}

impl LaunchError {
    fn errno(&self) -> Errno {
        match self {
            Self::Pipe(errno) | Self::Nonblock(errno) | Self::Spawn(errno) => *errno,
        }
    }
}

/// A fatal, suite-level runner error.
///
/// Test-level failures (nonzero exit, fatal signal) are never errors; they
/// are folded into the per-test result. This type covers the resource
/// failures that end the whole run. Whatever the failure, the runner still
/// releases every stream handle before returning.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A test could not be launched.
    #[error("test {id}: {source}")]
    Launch {
        /// Id of the test that failed to launch.
        id: usize,
        /// The underlying launch failure.
        #[source]
        source: LaunchError,
    },

    /// Waiting for readiness across the active runs failed.
    #[error("failed to wait for test output: {0}")]
    Wait(#[source] Errno),

    /// Reaping an exited test process failed.
    #[error("test {id}: failed to reap test process: {source}")]
    Reap {
        /// Id of the test whose process could not be reaped.
        id: usize,
        /// The underlying wait error.
        #[source]
        source: Errno,
    },

    /// Reading from a test's output stream failed.
    #[error("test {id}: failed to read test output: {source}")]
    Drain {
        /// Id of the test whose output could not be read.
        id: usize,
        /// The underlying read error.
        #[source]
        source: Errno,
    },

    /// Writing a report line failed.
    #[error("failed to write report line: {0}")]
    Report(#[source] io::Error),
}

impl RunnerError {
    /// The OS error code behind this error, as printed on the internal-error
    /// bail line. Zero if the failure has no OS code.
    pub fn os_code(&self) -> i32 {
        match self {
            Self::Launch { source, .. } => source.errno() as i32,
            Self::Wait(errno) => *errno as i32,
            Self::Reap { source, .. } | Self::Drain { source, .. } => *source as i32,
            Self::Report(err) => err.raw_os_error().unwrap_or(0),
        }
    }
}
