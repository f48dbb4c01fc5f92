// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-band directive commands parsed from a test's output stream.
//!
//! A test communicates with the runner through its own stdout/stderr: a line
//! whose first character is `:` followed (case-insensitively) by a directive
//! token is a command, everything else is forwarded as a TAP comment. At most
//! one directive is honored per test.

use std::fmt;

/// Canonical spelling of the skip token.
pub const TOKEN_SKIP: &str = "SKIP";
/// Canonical spelling of the todo token.
pub const TOKEN_TODO: &str = "TODO";
/// Canonical spelling of the bail-out token.
pub const TOKEN_BAIL: &str = "Bail out!";

/// The kind of an in-band directive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DirectiveKind {
    /// `SKIP`: annotates the result line; the outcome is unchanged.
    Skip,
    /// `TODO`: annotates the result line; the outcome is unchanged.
    Todo,
    /// `Bail out!`: aborts the remainder of the suite.
    Bail,
}

/// A directive command recognized in one line of test output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Directive {
    kind: DirectiveKind,
    text: String,
}

impl Directive {
    /// Parses one line of test output.
    ///
    /// Returns `None` unless the line begins with `:` immediately followed,
    /// case-insensitively, by a directive token. On a match the stored text
    /// is canonicalized: surrounding whitespace trimmed, embedded newlines
    /// collapsed to single spaces, and the token rewritten to its canonical
    /// spelling with the remainder preserved verbatim.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(':')?;
        let (kind, token) = if starts_with_token(rest, TOKEN_SKIP) {
            (DirectiveKind::Skip, TOKEN_SKIP)
        } else if starts_with_token(rest, TOKEN_TODO) {
            (DirectiveKind::Todo, TOKEN_TODO)
        } else if starts_with_token(rest, TOKEN_BAIL) {
            (DirectiveKind::Bail, TOKEN_BAIL)
        } else {
            return None;
        };

        // The token sits right after the colon, so trimming can only remove
        // text after it.
        let mut text = rest.trim().replace('\n', " ");
        text.replace_range(..token.len(), token);
        Some(Self { kind, text })
    }

    /// The directive's kind.
    pub fn kind(&self) -> DirectiveKind {
        self.kind
    }

    /// Canonical directive text, token included (e.g. `SKIP flaky on CI`).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns true for a bail-out directive.
    pub fn is_bail(&self) -> bool {
        self.kind == DirectiveKind::Bail
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.text)
    }
}

fn starts_with_token(rest: &str, token: &str) -> bool {
    let bytes = rest.as_bytes();
    bytes.len() >= token.len() && bytes[..token.len()].eq_ignore_ascii_case(token.as_bytes())
}
