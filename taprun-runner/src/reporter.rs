// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TAP report emission.
//!
//! All report output flows through a [`TapReporter`], one line per flush:
//!
//! ```text
//! 1..<N>
//! <ok|not ok> <id>[ - <description>] (<duration>s)[ # <directive>]
//! # <comment>
//! Bail out! <reason>
//! ```

use crate::{directive::Directive, errors::RunnerError};
use std::{fmt, io::Write, time::Duration};
use swrite::{SWrite, swrite};

/// Writes TAP lines to an output handle.
///
/// Result lines for a whole run are emitted by the scheduler in registration
/// order; comments are forwarded live as test output is drained.
pub struct TapReporter<W> {
    writer: W,
}

impl<W: Write> TapReporter<W> {
    /// Creates a reporter writing to the given handle.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the reporter, returning the output handle.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Writes the plan line, `1..N`.
    pub fn plan(&mut self, n_tests: usize) -> Result<(), RunnerError> {
        self.line(&format!("1..{n_tests}"))
    }

    /// Writes one result line.
    ///
    /// A skip/todo directive is appended as a `# <text>` suffix; it does not
    /// change the outcome.
    pub fn testpoint(
        &mut self,
        passed: bool,
        id: usize,
        description: Option<&str>,
        duration: Duration,
        directive: Option<&Directive>,
    ) -> Result<(), RunnerError> {
        let ok = if passed { "ok" } else { "not ok" };
        let mut line = format!("{ok} {id}");
        if let Some(description) = description {
            swrite!(line, " - {description}");
        }
        swrite!(line, " ({})", DisplayDuration(duration));
        if let Some(directive) = directive {
            swrite!(line, " # {directive}");
        }
        self.line(&line)
    }

    /// Writes a plain comment line.
    pub fn comment(&mut self, text: &str) -> Result<(), RunnerError> {
        self.line(&format!("# {text}"))
    }

    /// Writes a comment line attributed to a test id.
    pub fn test_comment(&mut self, id: usize, text: &str) -> Result<(), RunnerError> {
        self.line(&format!("# test {id}: {text}"))
    }

    /// Writes a bail line: the directive's literal text, terminating the
    /// report.
    pub fn bail(&mut self, text: &str) -> Result<(), RunnerError> {
        self.line(text)
    }

    /// Writes the bail-style line describing a fatal runner error.
    pub fn internal_error(&mut self, err: &RunnerError) -> Result<(), RunnerError> {
        self.line(&format!(
            "Bail out! internal test runner error {err}: {}",
            err.os_code()
        ))
    }

    /// Writes one report line: the text up to its first newline, then a
    /// newline, then a flush.
    fn line(&mut self, text: &str) -> Result<(), RunnerError> {
        let text = match text.find('\n') {
            Some(end) => &text[..end],
            None => text,
        };
        writeln!(self.writer, "{text}").map_err(RunnerError::Report)?;
        self.writer.flush().map_err(RunnerError::Report)
    }
}

impl<W> fmt::Debug for TapReporter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapReporter")
            .field("writer", &"..")
            .finish()
    }
}

/// Displays a duration as a value with up to three significant digits and an
/// SI power-of-1000 magnitude prefix: `1.5ms`, `12s`, `2.5ks`, `1Ms`.
///
/// Durations below one nanosecond display as `0s`, with no prefix.
#[derive(Copy, Clone, Debug)]
pub struct DisplayDuration(pub Duration);

const PREFIXES_LARGE: [char; 3] = ['k', 'M', 'G'];
const PREFIXES_SMALL: [char; 3] = ['m', 'u', 'n'];

impl DisplayDuration {
    /// The scaled value in `[1, 1000)` and its SI prefix letter, if any.
    pub fn scaled(self) -> (f64, Option<char>) {
        let mut secs = self.0.as_secs_f64();
        if secs < 1e-9 {
            return (0.0, None);
        }
        let mut magnitude = 0i32;
        while secs >= 1000.0 && magnitude < 3 {
            secs /= 1000.0;
            magnitude += 1;
        }
        while secs < 1.0 && magnitude > -3 {
            secs *= 1000.0;
            magnitude -= 1;
        }
        // Keep a value that rounds to 1000 from spilling a fourth digit.
        if secs >= 999.5 && magnitude < 3 {
            secs /= 1000.0;
            magnitude += 1;
        }
        let prefix = match magnitude {
            1..=3 => Some(PREFIXES_LARGE[magnitude as usize - 1]),
            -3..=-1 => Some(PREFIXES_SMALL[(-magnitude) as usize - 1]),
            _ => None,
        };
        (secs, prefix)
    }
}

impl fmt::Display for DisplayDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (value, prefix) = self.scaled();
        match prefix {
            Some(prefix) => write!(f, "{}{prefix}s", format_value(value)),
            None => write!(f, "{}s", format_value(value)),
        }
    }
}

/// Formats a scaled value with at most three significant digits, trailing
/// zeros trimmed.
fn format_value(value: f64) -> String {
    let formatted = if value >= 100.0 {
        format!("{value:.0}")
    } else if value >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    };
    match formatted.find('.') {
        Some(_) => formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_owned(),
        None => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use nix::errno::Errno;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn reporter() -> TapReporter<Vec<u8>> {
        TapReporter::new(Vec::new())
    }

    fn output(reporter: TapReporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).expect("reports are UTF-8")
    }

    #[test_case(Duration::from_secs(1_000_000), "1Ms"; "one megasecond")]
    #[test_case(Duration::from_secs(2500), "2.5ks"; "kiloseconds")]
    #[test_case(Duration::from_secs(12), "12s"; "plain seconds")]
    #[test_case(Duration::from_millis(1500), "1.5s"; "one and a half")]
    #[test_case(Duration::from_micros(1500), "1.5ms"; "milliseconds")]
    #[test_case(Duration::from_micros(250), "250us"; "microseconds")]
    #[test_case(Duration::from_nanos(1), "1ns"; "one nanosecond")]
    #[test_case(Duration::ZERO, "0s"; "below a nanosecond")]
    fn display_duration(duration: Duration, expected: &str) {
        assert_eq!(DisplayDuration(duration).to_string(), expected);
    }

    #[test]
    fn display_duration_scaled() {
        assert_eq!(
            DisplayDuration(Duration::from_secs(1_000_000)).scaled(),
            (1.0, Some('M'))
        );
        assert_eq!(DisplayDuration(Duration::ZERO).scaled(), (0.0, None));
    }

    #[test]
    fn testpoint_lines() {
        let mut reporter = reporter();
        reporter.plan(3).expect("write succeeds");
        reporter
            .testpoint(
                true,
                1,
                Some("adds numbers"),
                Duration::from_millis(2),
                None,
            )
            .expect("write succeeds");
        let skip = Directive::parse(":SKIP no network").expect("line is a directive");
        reporter
            .testpoint(true, 2, None, Duration::from_secs(1), Some(&skip))
            .expect("write succeeds");
        reporter
            .testpoint(false, 3, Some("broken"), Duration::ZERO, None)
            .expect("write succeeds");
        assert_eq!(
            output(reporter),
            indoc! {"
                1..3
                ok 1 - adds numbers (2ms)
                ok 2 (1s) # SKIP no network
                not ok 3 - broken (0s)
            "}
        );
    }

    #[test]
    fn comments_and_bail_lines() {
        let mut reporter = reporter();
        reporter.comment("plain note").expect("write succeeds");
        reporter
            .test_comment(7, "output from the test")
            .expect("write succeeds");
        reporter.bail("Bail out! stop").expect("write succeeds");
        assert_eq!(
            output(reporter),
            indoc! {"
                # plain note
                # test 7: output from the test
                Bail out! stop
            "}
        );
    }

    #[test]
    fn lines_are_truncated_at_embedded_newlines() {
        let mut reporter = reporter();
        reporter.comment("first\nsecond").expect("write succeeds");
        assert_eq!(output(reporter), "# first\n");
    }

    #[test]
    fn internal_error_line() {
        let mut reporter = reporter();
        let err = RunnerError::Wait(Errno::ENOMEM);
        reporter.internal_error(&err).expect("write succeeds");
        let line = output(reporter);
        assert!(
            line.starts_with("Bail out! internal test runner error failed to wait"),
            "unexpected line: {line}"
        );
        assert!(
            line.trim_end().ends_with(&format!(": {}", Errno::ENOMEM as i32)),
            "unexpected line: {line}"
        );
    }
}
