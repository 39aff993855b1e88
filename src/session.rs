// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! The harness facade every test drives.
//!
//! One [`AuditSession`] per test, walking `Idle -> Armed -> Verified|Failed
//! -> Closed`:
//!
//! - [`AuditSession::setup`] arms the class filter and opens the trail at
//!   its current end (`Idle -> Armed`), returning the session the test holds
//!   through its syscall.
//! - [`AuditSession::check_audit`] waits (bounded) for the first new record,
//!   decodes it, and matches it against the expected pattern
//!   (`Armed -> Verified` on match, `Armed -> Failed` otherwise). Exactly one
//!   verification per arm cycle; setup-only negative tests may skip it.
//! - [`AuditSession::cleanup`] restores the class-filter baseline and
//!   releases the trail, unconditionally and idempotently, from any state.
//!
//! The session owns the armed audit policy the way a guard owns a lock:
//! `Drop` is the backstop that restores the baseline even when a test body
//! panics or is interrupted, because a leaked misconfigured filter would
//! corrupt every subsequent test's expectations.

use crate::class::{AuditClass, ClassFilter, PolicyStore};
use crate::config::HarnessConfig;
use crate::errors::{ConfigError, ReadError};
use crate::gate;
use crate::pattern::ExpectedPattern;
use crate::trail::{TrailHandle, TrailReader};
use std::time::Duration;

/// Pass/fail signal for the enclosing test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The first new record matched the expected pattern.
    Matched,
    /// No record appeared within the deadline: the kernel never audited the
    /// event.
    TimedOut,
    /// A record appeared but did not match.
    PatternRejected,
    /// The harness could not be armed at all.
    SetupFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Armed,
    Verified,
    Failed,
    Closed,
}

/// Scoped ownership of the armed audit state for one test.
pub struct AuditSession {
    filter: ClassFilter,
    handle: Option<TrailHandle>,
    deadline: Duration,
    state: State,
}

impl AuditSession {
    /// Arm capture for `class`: configure the class filter, then open the
    /// trail at its current end so only records caused after this call are
    /// observed.
    ///
    /// An unavailable audit subsystem is a hard setup failure, never a
    /// silent skip.
    pub async fn setup(
        config: &HarnessConfig,
        store: Box<dyn PolicyStore>,
        class: &str,
    ) -> Result<Self, ConfigError> {
        let class = AuditClass::new(class)?;
        let mut filter = ClassFilter::new(store);
        if let Err(e) = filter.configure(&class) {
            // The mask write may have landed even though configure failed
            // (e.g. the daemon poke failed after the control file was
            // rewritten). The baseline snapshot precedes the write, so put
            // it back before reporting.
            if let Err(restore_err) = filter.restore() {
                tracing::warn!(error = %restore_err, "failed to restore class filter after configure failure");
            }
            return Err(e);
        }

        let handle = match TrailReader::open(&config.trail) {
            Ok(handle) => handle,
            Err(e) => {
                // The filter is already armed; put the baseline back before
                // reporting the failure.
                if let Err(restore_err) = filter.restore() {
                    tracing::warn!(error = %restore_err, "failed to restore class filter after open failure");
                }
                return Err(ConfigError::Unavailable(format!(
                    "cannot open audit trail: {}",
                    e
                )));
            }
        };

        Ok(Self {
            filter,
            handle: Some(handle),
            deadline: config.wait.deadline(),
            state: State::Armed,
        })
    }

    /// Wait for the first record flushed since setup and match it.
    ///
    /// Calling this twice on one setup, or after cleanup, is a programming
    /// error in the test, not a condition the harness handles.
    pub async fn check_audit(&mut self, pattern: &ExpectedPattern) -> Result<Outcome, ReadError> {
        assert!(
            self.state == State::Armed,
            "check_audit called without a matching setup"
        );
        let handle = self.handle.as_mut().ok_or(ReadError::Closed)?;

        if let Err(timeout) = gate::wait_ready(handle, self.deadline).await {
            tracing::debug!(deadline = ?timeout.deadline, "no audit record before deadline");
            self.state = State::Failed;
            return Ok(Outcome::TimedOut);
        }

        let record = match handle.next_record() {
            Ok(record) => record,
            Err(e) => {
                self.state = State::Failed;
                return Err(e);
            }
        };

        if pattern.matches(&record) {
            self.state = State::Verified;
            Ok(Outcome::Matched)
        } else {
            tracing::debug!(
                pattern = pattern.as_str(),
                record = %record.line,
                "audit record did not match expectation"
            );
            self.state = State::Failed;
            Ok(Outcome::PatternRejected)
        }
    }

    /// Restore the class-filter baseline and release the trail.
    ///
    /// Safe from any state and safe to call repeatedly; a second call leaves
    /// the mask identical to the first. A restore failure is returned so the
    /// suite can abort instead of running every following test against a
    /// poisoned filter, but it never changes the outcome of the test that
    /// just ran.
    pub fn cleanup(&mut self) -> Result<(), ConfigError> {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        self.state = State::Closed;
        self.filter.restore().map_err(|e| {
            tracing::warn!(error = %e, "failed to restore class filter baseline");
            e
        })
    }
}

impl Drop for AuditSession {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
