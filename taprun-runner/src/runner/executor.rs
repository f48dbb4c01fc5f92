// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launching and draining a single test process.
//!
//! A [`TestRun`] owns the child's pid and the read end of the pipe carrying
//! the child's combined stdout/stderr. No other state is shared between the
//! parent and the child: the test's exit status travels through `waitpid`
//! and everything else through the pipe.

use crate::{
    directive::Directive,
    errors::{LaunchError, RunnerError},
    reporter::TapReporter,
    suite::TestCase,
    time::{StopwatchStart, stopwatch},
};
use nix::{
    errno::Errno,
    fcntl::{FcntlArg, OFlag, fcntl},
    unistd::{self, ForkResult, Pid, fork},
};
use std::{
    io::{self, Write},
    mem,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration,
};
use tracing::{debug, warn};

/// Exit status a panicking test function maps to in the child.
const PANIC_EXIT_CODE: i32 = 101;

/// How one test process finished.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum TestExit {
    /// The process exited normally with the given code.
    Exited {
        /// The exit code; zero is a pass.
        code: i32,
    },
    /// The process was terminated by a signal.
    Signaled {
        /// The raw terminating signal number.
        signal: i32,
    },
    /// `waitpid` reported neither a normal exit nor a signal.
    Unknown,
}

impl TestExit {
    fn classify(wstatus: libc::c_int) -> Self {
        if libc::WIFEXITED(wstatus) {
            Self::Exited {
                code: libc::WEXITSTATUS(wstatus),
            }
        } else if libc::WIFSIGNALED(wstatus) {
            Self::Signaled {
                signal: libc::WTERMSIG(wstatus),
            }
        } else {
            Self::Unknown
        }
    }

    pub(crate) fn passed(self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }
}

/// Name of a termination signal, `UNKNOWN` if nix has no description for it.
pub(crate) fn signal_name(signal: i32) -> &'static str {
    nix::sys::signal::Signal::try_from(signal).map_or("UNKNOWN", |signal| signal.as_str())
}

/// Transient state of one in-flight or completed test execution.
#[derive(Debug)]
pub(crate) struct TestRun {
    test_id: usize,
    pid: Option<Pid>,
    output: OwnedFd,
    pending: Vec<u8>,
    directive: Option<Directive>,
    exit: Option<TestExit>,
    stopwatch: StopwatchStart,
    duration: Option<Duration>,
}

impl TestRun {
    /// Spawns an isolated process running the test function, wiring its
    /// combined stdout/stderr to a pipe whose read end the parent owns.
    ///
    /// The monotonic start time is recorded immediately before the spawn. On
    /// failure both pipe ends are released before returning.
    pub(crate) fn start(test: &TestCase) -> Result<Self, LaunchError> {
        let (read_end, write_end) = unistd::pipe().map_err(LaunchError::Pipe)?;
        set_nonblocking(&read_end).map_err(LaunchError::Nonblock)?;

        // Hold both stdio locks across the fork. This flushes anything the
        // parent has buffered so the child can't replay it into the pipe,
        // and it pins lock ownership to this thread: the child can reacquire
        // a reentrant lock its own thread holds, but a lock held by any
        // other thread would never be released on that side of the fork.
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        let _ = stdout.flush();
        let _ = stderr.flush();

        let stopwatch = stopwatch();
        match unsafe { fork() }.map_err(LaunchError::Spawn)? {
            ForkResult::Child => {
                drop(read_end);
                run_test_and_exit(test, write_end)
            }
            ForkResult::Parent { child } => {
                drop(stdout);
                drop(stderr);
                drop(write_end);
                debug!(
                    test_id = test.id(),
                    pid = child.as_raw(),
                    "spawned test process"
                );
                Ok(Self {
                    test_id: test.id(),
                    pid: Some(child),
                    output: read_end,
                    pending: Vec::new(),
                    directive: None,
                    exit: None,
                    stopwatch,
                    duration: None,
                })
            }
        }
    }

    pub(crate) fn test_id(&self) -> usize {
        self.test_id
    }

    pub(crate) fn output_fd(&self) -> BorrowedFd<'_> {
        self.output.as_fd()
    }

    pub(crate) fn directive(&self) -> Option<&Directive> {
        self.directive.as_ref()
    }

    pub(crate) fn is_exited(&self) -> bool {
        self.exit.is_some()
    }

    /// Reads whatever output is available without blocking.
    ///
    /// Complete lines are classified: blank lines are dropped, the first
    /// directive line is captured (later ones produce a warning comment),
    /// and anything else is forwarded as a comment attributed to this test.
    /// Once the write side is gone, a trailing unterminated line is flushed
    /// too.
    pub(crate) fn drain<W: Write>(
        &mut self,
        reporter: &mut TapReporter<W>,
    ) -> Result<(), RunnerError> {
        let mut buf = [0u8; 4096];
        loop {
            match unistd::read(&self.output, &mut buf) {
                Ok(0) => {
                    if !self.pending.is_empty() {
                        let line = mem::take(&mut self.pending);
                        self.handle_line(&line, reporter)?;
                    }
                    return Ok(());
                }
                Ok(n_read) => {
                    self.pending.extend_from_slice(&buf[..n_read]);
                    self.flush_lines(reporter)?;
                }
                Err(Errno::EAGAIN) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    return Err(RunnerError::Drain {
                        id: self.test_id,
                        source: errno,
                    });
                }
            }
        }
    }

    /// Attempts a non-blocking reap of the child. On success records the end
    /// timestamp and the exit classification.
    pub(crate) fn try_reap(&mut self) -> Result<bool, RunnerError> {
        let Some(pid) = self.pid else { return Ok(true) };
        let mut wstatus: libc::c_int = 0;
        let reaped = loop {
            match unsafe { libc::waitpid(pid.as_raw(), &mut wstatus, libc::WNOHANG) } {
                -1 if Errno::last() == Errno::EINTR => continue,
                -1 => {
                    return Err(RunnerError::Reap {
                        id: self.test_id,
                        source: Errno::last(),
                    });
                }
                0 => break false,
                _ => break true,
            }
        };
        if reaped {
            self.duration = Some(self.stopwatch.end().duration);
            self.exit = Some(TestExit::classify(wstatus));
            self.pid = None;
            debug!(test_id = self.test_id, exit = ?self.exit, "reaped test process");
        }
        Ok(reaped)
    }

    /// Converts an exited run into its reportable summary, releasing the
    /// stream handle.
    pub(crate) fn finish(self) -> FinishedRun {
        FinishedRun {
            test_id: self.test_id,
            directive: self.directive,
            exit: self.exit.unwrap_or(TestExit::Unknown),
            duration: self.duration.unwrap_or_default(),
        }
    }

    fn flush_lines<W: Write>(&mut self, reporter: &mut TapReporter<W>) -> Result<(), RunnerError> {
        while let Some(at) = self.pending.iter().position(|&byte| byte == b'\n') {
            let rest = self.pending.split_off(at + 1);
            let mut line = mem::replace(&mut self.pending, rest);
            line.pop();
            self.handle_line(&line, reporter)?;
        }
        Ok(())
    }

    fn handle_line<W: Write>(
        &mut self,
        line: &[u8],
        reporter: &mut TapReporter<W>,
    ) -> Result<(), RunnerError> {
        if line.is_empty() {
            return Ok(());
        }
        let line = String::from_utf8_lossy(line);
        match Directive::parse(&line) {
            Some(directive) => match &self.directive {
                None => {
                    debug!(
                        test_id = self.test_id,
                        directive = directive.text(),
                        "captured directive"
                    );
                    self.directive = Some(directive);
                }
                Some(kept) => {
                    warn!(
                        test_id = self.test_id,
                        kept = kept.text(),
                        ignored = directive.text(),
                        "redundant directive"
                    );
                    reporter.test_comment(
                        self.test_id,
                        &format!("one directive per test: ignoring '{}'", directive.text()),
                    )?;
                }
            },
            None => reporter.test_comment(self.test_id, &line)?,
        }
        Ok(())
    }
}

/// A completed execution, stored in the results table at `id - 1`.
#[derive(Debug)]
pub(crate) struct FinishedRun {
    pub(crate) test_id: usize,
    pub(crate) directive: Option<Directive>,
    pub(crate) exit: TestExit,
    pub(crate) duration: Duration,
}

/// Child-side epilogue: redirect stdout and stderr into the pipe, run the
/// test, flush, and exit with its status.
///
/// Never returns. A panicking test maps to [`PANIC_EXIT_CODE`] instead of
/// unwinding past the fork.
fn run_test_and_exit(test: &TestCase, write_end: OwnedFd) -> ! {
    unsafe {
        libc::dup2(write_end.as_raw_fd(), libc::STDOUT_FILENO);
        libc::dup2(write_end.as_raw_fd(), libc::STDERR_FILENO);
    }
    drop(write_end);
    let code = catch_unwind(AssertUnwindSafe(|| test.run())).unwrap_or(PANIC_EXIT_CODE);
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    unsafe { libc::_exit(code) }
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::Suite;
    use pretty_assertions::assert_eq;

    #[test]
    fn signal_names() {
        assert_eq!(signal_name(libc::SIGSEGV), "SIGSEGV");
        assert_eq!(signal_name(libc::SIGABRT), "SIGABRT");
        assert_eq!(signal_name(4096), "UNKNOWN");
    }

    #[test]
    fn start_drain_reap_roundtrip() {
        let mut suite = Suite::new();
        // Write to the fd directly: the print macros are captured by the
        // test harness and would never reach the child's stdout.
        suite
            .register(
                || {
                    let _ = writeln!(io::stdout(), "hello from the child");
                    0
                },
                None,
            )
            .expect("registered");

        let mut run = TestRun::start(&suite.tests()[0]).expect("spawned");
        let mut reporter = TapReporter::new(Vec::new());

        // The child is short-lived but WNOHANG still needs retries.
        while !run.try_reap().expect("reap succeeds") {
            std::thread::sleep(Duration::from_millis(5));
        }
        run.drain(&mut reporter).expect("drain succeeds");

        let finished = run.finish();
        assert!(finished.exit.passed());
        assert!(finished.directive.is_none());
        let output = String::from_utf8(reporter.into_inner()).expect("report is UTF-8");
        assert_eq!(output, "# test 1: hello from the child\n");
    }
}
