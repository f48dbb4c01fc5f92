// Copyright (c) The taprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timing support for test runs.

mod stopwatch;

pub(crate) use stopwatch::*;
