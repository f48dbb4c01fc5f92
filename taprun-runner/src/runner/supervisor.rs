// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Readiness multiplexing and reaping across the active test runs.

use crate::{errors::RunnerError, reporter::TapReporter, runner::executor::TestRun};
use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
};
use std::io::Write;
use tracing::debug;

/// Liveness bound on each poll, in milliseconds: long enough to avoid
/// spinning, short enough to stay responsive.
const WAIT_TIMEOUT_MS: u16 = 1000;

/// Blocks until at least one active run exits, draining mid-run output while
/// waiting.
///
/// Each wakeup makes two passes. The first reaps every run whose stream
/// reports closure (the write side has no writers left); if any were reaped
/// the call returns immediately so the scheduler can refill the freed slots.
/// Only otherwise does the second pass read from still-running tests.
pub(super) fn wait_for_runs<W: Write>(
    slots: &mut [Option<TestRun>],
    reporter: &mut TapReporter<W>,
) -> Result<(), RunnerError> {
    loop {
        let mut active = Vec::new();
        let mut fds = Vec::new();
        for (idx, slot) in slots.iter().enumerate() {
            if let Some(run) = slot
                && !run.is_exited()
            {
                active.push(idx);
                fds.push(PollFd::new(run.output_fd(), PollFlags::POLLIN));
            }
        }
        if active.is_empty() {
            return Ok(());
        }

        let revents = {
            loop {
                match poll(&mut fds, PollTimeout::from(WAIT_TIMEOUT_MS)) {
                    // Liveness timeout with nothing ready; poll again.
                    Ok(0) => continue,
                    Ok(_) => break,
                    Err(Errno::EINTR) => continue,
                    Err(errno) => return Err(RunnerError::Wait(errno)),
                }
            }
            fds.iter()
                .map(|fd| fd.revents().unwrap_or(PollFlags::empty()))
                .collect::<Vec<_>>()
        };
        drop(fds);

        // First pass: reap processes whose write side is gone.
        let mut n_exited = 0;
        for (&idx, flags) in active.iter().zip(&revents) {
            if !flags.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                continue;
            }
            let Some(run) = slots[idx].as_mut() else {
                continue;
            };
            if !run.try_reap()? {
                // Not yet reapable; catch it on a later wakeup.
                continue;
            }
            run.drain(reporter)?;
            n_exited += 1;
        }
        if n_exited > 0 {
            // Freeing slots takes priority over mid-run reads.
            debug!(n_exited, "reaped exited test processes");
            return Ok(());
        }

        // Second pass: read from still-running tests.
        for (&idx, flags) in active.iter().zip(&revents) {
            if !flags.contains(PollFlags::POLLIN) {
                continue;
            }
            let Some(run) = slots[idx].as_mut() else {
                continue;
            };
            run.drain(reporter)?;
        }
    }
}
