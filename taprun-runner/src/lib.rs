// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for taprun, a crash-safe TAP test runner.
//!
//! Tests are registered as functions on a [`Suite`](suite::Suite); each one
//! runs in its own forked process, so a crash only takes down that test. The
//! runner multiplexes the children's combined output, honors in-band
//! directives (`:SKIP`, `:TODO`, `:Bail out!`) embedded in it, and emits a
//! TAP report in registration order regardless of completion order.
//!
//! ```no_run
//! use taprun_runner::{runner::TestRunnerBuilder, suite::Suite};
//!
//! let mut suite = Suite::new();
//! suite.register(|| 0, Some("adds numbers"))?;
//! let runner = TestRunnerBuilder::new().build(&suite);
//! let stats = runner.execute(std::io::stdout())?;
//! assert!(stats.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(not(unix))]
compile_error!("taprun-runner requires a Unix-like platform (fork/pipe/poll)");

pub mod directive;
pub mod errors;
pub mod reporter;
pub mod runner;
pub mod suite;
mod time;
