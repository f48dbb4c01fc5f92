// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test run scheduler.
//!
//! [`TestRunner`] owns a bounded pool of worker slots. Each loop iteration
//! fills free slots with unstarted tests, waits on the supervisor, and
//! harvests exited runs into a results table indexed by `id - 1`. The table
//! is what lets the reporting pass emit results in registration order no
//! matter how completions interleave across slots.
//!
//! The scheduler itself is single-threaded and cooperative; all parallelism
//! comes from the independently executing test processes, so the slot and
//! results tables need no locking.

use crate::{
    directive::Directive,
    errors::RunnerError,
    reporter::TapReporter,
    runner::{
        executor::{FinishedRun, TestExit, TestRun, signal_name},
        supervisor,
    },
    suite::{MAX_RUNNERS, Suite},
};
use std::{io::Write, sync::LazyLock, thread};
use tracing::{debug, warn};

/// Builder for a [`TestRunner`].
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    runner_count: Option<usize>,
}

impl TestRunnerBuilder {
    /// Creates a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the number of worker slots, taking precedence over the
    /// suite's configured count.
    pub fn runner_count(mut self, runner_count: usize) -> Self {
        self.runner_count = Some(runner_count);
        self
    }

    /// Creates a runner for the given suite.
    ///
    /// The effective slot count is
    /// `min(runner_count, tests, MAX_RUNNERS)`, at least 1; an unconfigured
    /// count defaults to available parallelism minus one.
    pub fn build(self, suite: &Suite) -> TestRunner<'_> {
        let configured = self
            .runner_count
            .or(suite.runner_count())
            .unwrap_or_else(default_runner_count);
        let runner_count = configured.clamp(1, MAX_RUNNERS.min(suite.len()).max(1));
        TestRunner {
            suite,
            runner_count,
        }
    }
}

/// Context for running a suite's tests, each in its own process.
#[derive(Debug)]
pub struct TestRunner<'suite> {
    suite: &'suite Suite,
    runner_count: usize,
}

impl TestRunner<'_> {
    /// The effective worker slot count.
    pub fn runner_count(&self) -> usize {
        self.runner_count
    }

    /// Runs every registered test, writing the TAP report to `writer`.
    ///
    /// Test failures are not errors; only fatal resource failures are, and
    /// those are also reported as an internal-error bail line. Stream
    /// handles are released on every return path.
    pub fn execute<W: Write>(&self, writer: W) -> Result<RunStats, RunnerError> {
        let mut reporter = TapReporter::new(writer);
        let result = self.run_loop(&mut reporter);
        if let Err(err) = &result {
            warn!(%err, "test run failed");
            // Best effort: the reporter itself may be what failed.
            let _ = reporter.internal_error(err);
        }
        result
    }

    fn run_loop<W: Write>(&self, reporter: &mut TapReporter<W>) -> Result<RunStats, RunnerError> {
        let n_tests = self.suite.len();
        reporter.plan(n_tests)?;
        debug!(n_tests, runner_count = self.runner_count, "run started");

        let mut slots: Vec<Option<TestRun>> = (0..self.runner_count).map(|_| None).collect();
        let mut results: Vec<Option<FinishedRun>> = (0..n_tests).map(|_| None).collect();
        let mut unstarted = self.suite.tests().iter();
        let mut stats = RunStats {
            planned: n_tests,
            ..RunStats::default()
        };
        let mut bailed = false;
        let mut fatal = None;
        let mut active = 0usize;

        loop {
            if !bailed {
                for slot in slots.iter_mut() {
                    if slot.is_some() {
                        continue;
                    }
                    let Some(test) = unstarted.next() else { break };
                    match TestRun::start(test) {
                        Ok(run) => {
                            *slot = Some(run);
                            active += 1;
                            stats.started += 1;
                        }
                        Err(source) => {
                            // A failed launch poisons the rest of the suite;
                            // in-flight tests are still drained and reaped.
                            let err = RunnerError::Launch {
                                id: test.id(),
                                source,
                            };
                            warn!(%err, "bailing");
                            fatal = Some(err);
                            bailed = true;
                            break;
                        }
                    }
                }
            }

            if active == 0 {
                break;
            }

            supervisor::wait_for_runs(&mut slots, reporter)?;

            for run in slots.iter().flatten() {
                if !bailed && run.directive().is_some_and(Directive::is_bail) {
                    debug!(test_id = run.test_id(), "bail directive observed");
                    bailed = true;
                }
            }

            for slot in slots.iter_mut() {
                if !slot.as_ref().is_some_and(TestRun::is_exited) {
                    continue;
                }
                let Some(run) = slot.take() else { continue };
                let test_id = run.test_id();
                results[test_id - 1] = Some(run.finish());
                active -= 1;
            }
        }

        self.report(reporter, &results, &mut stats)?;

        match fatal {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }

    /// The ordered reporting pass over the results table.
    fn report<W: Write>(
        &self,
        reporter: &mut TapReporter<W>,
        results: &[Option<FinishedRun>],
        stats: &mut RunStats,
    ) -> Result<(), RunnerError> {
        for entry in results {
            // The first gap only occurs at or after a bail; nothing past it
            // is trustworthy.
            let Some(run) = entry else { break };

            if let Some(directive) = &run.directive
                && directive.is_bail()
            {
                reporter.bail(directive.text())?;
                stats.bailed = true;
                break;
            }

            let test = &self.suite.tests()[run.test_id - 1];
            let passed = match run.exit {
                TestExit::Exited { .. } => run.exit.passed(),
                TestExit::Signaled { signal } => {
                    reporter.comment(&format!(
                        "test terminated via {}({signal})",
                        signal_name(signal)
                    ))?;
                    false
                }
                TestExit::Unknown => {
                    reporter.comment(&format!(
                        "test {} exited for unknown reason",
                        run.test_id
                    ))?;
                    false
                }
            };
            reporter.testpoint(
                passed,
                run.test_id,
                test.description(),
                run.duration,
                run.directive.as_ref(),
            )?;
            stats.reported += 1;
            if passed {
                stats.passed += 1;
            } else {
                stats.failed += 1;
            }
        }
        Ok(())
    }
}

/// Statistics for a test run.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// Number of tests in the plan.
    pub planned: usize,

    /// Number of test processes actually started.
    pub started: usize,

    /// Number of result lines reported.
    pub reported: usize,

    /// Number of reported tests that passed.
    pub passed: usize,

    /// Number of reported tests that failed.
    pub failed: usize,

    /// Whether a bail directive cut the run short.
    pub bailed: bool,
}

impl RunStats {
    /// Returns true if this run is considered a success.
    ///
    /// A run fails if it bailed, if any test failed, or if not every planned
    /// test was reported.
    pub fn is_success(&self) -> bool {
        !self.bailed && self.failed == 0 && self.reported == self.planned
    }
}

/// Default runner count: available parallelism minus one, at least 1.
fn default_runner_count() -> usize {
    static DEFAULT: LazyLock<usize> =
        LazyLock::new(|| match thread::available_parallelism() {
            Ok(count) => usize::from(count).saturating_sub(1).max(1),
            Err(err) => {
                warn!("unable to determine available parallelism ({err}), assuming 1 runner");
                1
            }
        });

    *DEFAULT
}
