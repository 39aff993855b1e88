// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Error taxonomy for the harness.
//!
//! Three families, matching how failures are triaged:
//!
//! - [`ConfigError`]: the class filter could not be armed or restored — the
//!   harness never got a clean view of the trail, so the test setup is broken.
//! - [`ReadError`]: the trail vanished mid-test or a record failed to decode —
//!   the harness itself is broken, distinct from the kernel under test.
//! - [`TimeoutError`]: no record appeared within the deadline — the kernel
//!   didn't audit the event, which is a genuine test failure.
//!
//! None of these are recovered or retried across test boundaries.

use std::time::Duration;
use thiserror::Error;

/// Failure to arm or restore the audit class filter.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The audit subsystem is not enabled or the caller lacks privilege.
    #[error("audit subsystem unavailable: {0}")]
    Unavailable(String),

    /// A class mnemonic that the mask table doesn't know.
    #[error("unknown audit class {0:?}")]
    UnknownClass(String),

    /// The audit control file exists but can't be parsed.
    #[error("malformed audit control file: {0}")]
    Malformed(String),

    #[error("audit control I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to read or decode a record from the live trail.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The trail file disappeared or rotated out from under the reader.
    #[error("audit trail closed or rotated mid-test")]
    Closed,

    /// A record's binary encoding is malformed.
    #[error("failed to decode audit record: {0}")]
    DecodeFailed(String),

    #[error("trail I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// No audit record appeared within the configured deadline.
#[derive(Debug, Error)]
#[error("no audit record within {deadline:?}")]
pub struct TimeoutError {
    pub deadline: Duration,
}
