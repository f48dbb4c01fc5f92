// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`].

mod executor;
mod imp;
mod supervisor;

pub use imp::*;
