// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test registration: test cases, suites, and the process-wide default suite.

use crate::errors::RegisterError;
use debug_ignore::DebugIgnore;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maximum number of tests a suite will accept.
///
/// The test list is dynamically sized; this is a configuration guard against
/// runaway registration, not a storage limit.
pub const MAX_TESTS: usize = 4096;

/// Maximum number of concurrently running test processes.
///
/// The effective slot pool is `min(runner_count, tests, MAX_RUNNERS)`.
pub const MAX_RUNNERS: usize = 64;

/// The callable behind a [`TestCase`]. It runs in a forked child process and
/// its return value becomes the child's exit status.
pub type TestFn = Box<dyn Fn() -> i32 + Send>;

/// A registered unit of work.
///
/// Owned by its [`Suite`] and immutable once registered.
#[derive(Debug)]
pub struct TestCase {
    id: usize,
    funct: DebugIgnore<TestFn>,
    description: Option<String>,
}

impl TestCase {
    /// The sequential 1-based id assigned at registration.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The normalized description, if one was registered.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Invokes the test callable. Only meaningful inside the forked child.
    pub(crate) fn run(&self) -> i32 {
        (self.funct.0)()
    }
}

/// An ordered collection of test cases plus runner configuration.
#[derive(Debug, Default)]
pub struct Suite {
    tests: Vec<TestCase>,
    runner_count: Option<usize>,
}

impl Suite {
    /// Creates an empty suite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a test, returning its assigned id.
    ///
    /// Ids are dense, ascending, and 1-based, and stay stable for the
    /// suite's lifetime. Descriptions are trimmed and embedded newlines are
    /// collapsed to spaces.
    pub fn register(
        &mut self,
        test: impl Fn() -> i32 + Send + 'static,
        description: Option<&str>,
    ) -> Result<usize, RegisterError> {
        if self.tests.len() >= MAX_TESTS {
            return Err(RegisterError::TooManyTests);
        }
        let id = self.tests.len() + 1;
        self.tests.push(TestCase {
            id,
            funct: DebugIgnore(Box::new(test)),
            description: description.map(normalize_description),
        });
        Ok(id)
    }

    /// Sets the preferred number of concurrent runners.
    ///
    /// The effective count is clamped to `[1, min(tests, MAX_RUNNERS)]` when
    /// a run starts.
    pub fn set_runner_count(&mut self, runner_count: usize) {
        self.runner_count = Some(runner_count);
    }

    /// The configured runner count, if any.
    pub fn runner_count(&self) -> Option<usize> {
        self.runner_count
    }

    /// Number of registered tests.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if no tests are registered.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// The registered tests in registration order.
    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }
}

fn normalize_description(description: &str) -> String {
    description.trim().replace('\n', " ")
}

static DEFAULT_SUITE: Mutex<Option<Suite>> = Mutex::new(None);

/// Explicitly creates the process-wide default suite, replacing any existing
/// one.
///
/// Registration through [`register_default`] lazily creates the default
/// suite, so calling this is optional; it exists so that setup and
/// [`teardown_default`] form an explicit pair.
pub fn init_default() {
    *lock_default() = Some(Suite::new());
}

/// Runs a closure against the default suite, creating it if needed.
///
/// Callers that need re-entrancy should own an explicit [`Suite`] instead.
pub fn with_default<R>(f: impl FnOnce(&mut Suite) -> R) -> R {
    let mut guard = lock_default();
    f(guard.get_or_insert_with(Suite::new))
}

/// Registers a test into the default suite.
pub fn register_default(
    test: impl Fn() -> i32 + Send + 'static,
    description: Option<&str>,
) -> Result<usize, RegisterError> {
    with_default(|suite| suite.register(test, description))
}

/// Destroys the default suite, releasing its tests and descriptions.
pub fn teardown_default() {
    *lock_default() = None;
}

fn lock_default() -> MutexGuard<'static, Option<Suite>> {
    // A poisoned lock means some thread panicked mid-registration; the list
    // itself is still structurally sound.
    DEFAULT_SUITE.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn register_assigns_dense_ids() {
        let mut suite = Suite::new();
        let first = suite.register(|| 0, None).expect("registered");
        let second = suite
            .register(|| 1, Some("second test"))
            .expect("registered");
        assert_eq!((first, second), (1, 2));
        assert_eq!(suite.tests()[0].id(), 1);
        assert_eq!(suite.tests()[1].description(), Some("second test"));
    }

    #[test]
    fn register_normalizes_descriptions() {
        let mut suite = Suite::new();
        suite
            .register(|| 0, Some("  multi\nline\ndescription \n"))
            .expect("registered");
        assert_eq!(
            suite.tests()[0].description(),
            Some("multi line description")
        );
    }

    #[test]
    fn register_enforces_the_test_limit() {
        let mut suite = Suite::new();
        for _ in 0..MAX_TESTS {
            suite.register(|| 0, None).expect("under the limit");
        }
        assert!(matches!(
            suite.register(|| 0, None),
            Err(RegisterError::TooManyTests)
        ));
        assert_eq!(suite.len(), MAX_TESTS);
    }

    #[test]
    fn default_suite_lifecycle() {
        teardown_default();
        let id = register_default(|| 0, Some("registered lazily")).expect("registered");
        assert_eq!(id, 1);
        with_default(|suite| assert_eq!(suite.len(), 1));

        // init_default replaces the memoized instance.
        init_default();
        with_default(|suite| assert!(suite.is_empty()));
        teardown_default();
    }
}
