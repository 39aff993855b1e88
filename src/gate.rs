// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! The bounded-wait gate between a test and the kernel's audit flush.
//!
//! Record flushing is asynchronous relative to syscall return, so the
//! harness cannot read immediately after the syscall completes. This is the
//! single suspension point: the test blocks here, and nowhere else, until
//! the trail reader signals that a decoded record (or a capture failure) is
//! available, or the deadline expires. One bounded wait per `check_audit`;
//! no silent retries.

use std::time::Duration;

use crate::errors::TimeoutError;
use crate::trail::TrailHandle;

/// Block until the handle has at least one pending item, or the deadline
/// passes.
///
/// A true timer-bounded wait on the reader's notification signal, never a
/// spin loop: a hung kernel audit path fails the test deterministically
/// instead of hanging the suite.
pub async fn wait_ready(handle: &TrailHandle, deadline: Duration) -> Result<(), TimeoutError> {
    let shared = handle.shared();
    let expiry = tokio::time::Instant::now() + deadline;

    loop {
        // Register for the wakeup before re-checking the queue so a record
        // landing between the check and the await is not missed.
        let notified = shared.notify.notified();
        if shared.has_pending() {
            return Ok(());
        }
        if tokio::time::timeout_at(expiry, notified).await.is_err() {
            return Err(TimeoutError { deadline });
        }
    }
}
