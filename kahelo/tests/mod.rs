// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integration tests for the binning engine.
//! - The `util` module holds the context and framebuffer builders plus the
//!   queue-draining helper shared by every test.
//! - We do not use the default one-binary-per-file harness; `Cargo.toml`
//!   sets `autotests = false` and points a single test target at this file,
//!   so those helpers only exist once.
//! - Contexts block at teardown until every in-flight scene fence has
//!   signalled. Any test that flushes must drain the queue (which signals
//!   the fences) before its context drops.

mod util;

mod binning;
mod queries;
