// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Declarative per-syscall fixtures.
//!
//! The test corpus is a large family of near-identical bodies that differ
//! only in which syscall they drive and which literal pattern they expect.
//! Instead of hand-duplicating setup/check/cleanup per syscall, each case is
//! a [`Fixture`]: a name, the audit class to arm, and a `drive` closure that
//! performs the syscall and returns the expected pattern (interpolating any
//! identifier the call produced, e.g. a fresh message-queue id). [`run`]
//! executes one fixture through the full arm/check/restore cycle.

use anyhow::{Context, Result};

use crate::class::PolicyStore;
use crate::config::HarnessConfig;
use crate::pattern::ExpectedPattern;
use crate::session::{AuditSession, Outcome};

/// One syscall-under-audit test case.
pub struct Fixture {
    /// Test case name, e.g. "msgget_success".
    pub name: &'static str,
    /// Short description in the corpus style ("Tests the audit of a
    /// successful msgget(2) call").
    pub descr: &'static str,
    /// Audit class mnemonic to arm ("ip", "nt", ...).
    pub class: &'static str,
    /// Performs the syscall under test and returns the expected pattern.
    /// Runs after the harness is armed, so the record it causes is the first
    /// one captured.
    pub drive: Box<dyn FnOnce() -> Result<String> + Send>,
}

impl Fixture {
    pub fn new(
        name: &'static str,
        descr: &'static str,
        class: &'static str,
        drive: impl FnOnce() -> Result<String> + Send + 'static,
    ) -> Self {
        Self {
            name,
            descr,
            class,
            drive: Box::new(drive),
        }
    }
}

/// Drive one fixture: arm, invoke, verify, restore.
///
/// Setup problems (filter or trail unavailable, bad class, bad pattern, the
/// syscall driver itself erroring) come back as [`Outcome::SetupFailed`].
/// A broken capture mid-test (trail closed, undecodable record) or a failed
/// baseline restore is an `Err`: the harness, not the kernel, is suspect,
/// and a restore failure poisons every later test, so the suite should
/// abort rather than continue.
pub async fn run(
    config: &HarnessConfig,
    store: Box<dyn PolicyStore>,
    fixture: Fixture,
) -> Result<Outcome> {
    tracing::debug!(
        name = fixture.name,
        descr = fixture.descr,
        class = fixture.class,
        "running fixture"
    );

    let mut session = match AuditSession::setup(config, store, fixture.class).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(name = fixture.name, error = %e, "fixture setup failed");
            return Ok(Outcome::SetupFailed);
        }
    };

    let pattern_src = match (fixture.drive)() {
        Ok(pattern) => pattern,
        Err(e) => {
            tracing::warn!(name = fixture.name, error = %e, "fixture driver failed");
            session
                .cleanup()
                .context("baseline restore failed after driver error")?;
            return Ok(Outcome::SetupFailed);
        }
    };

    let pattern = match ExpectedPattern::new(&pattern_src) {
        Ok(pattern) => pattern,
        Err(e) => {
            tracing::warn!(name = fixture.name, error = %e, "fixture pattern invalid");
            session
                .cleanup()
                .context("baseline restore failed after pattern error")?;
            return Ok(Outcome::SetupFailed);
        }
    };

    let outcome = session
        .check_audit(&pattern)
        .await
        .with_context(|| format!("audit capture broke during fixture {}", fixture.name));

    // Restore runs whether verification succeeded, failed, or errored.
    let cleanup_result = session
        .cleanup()
        .context("failed to restore audit baseline after fixture");

    let outcome = outcome?;
    // A restore failure aborts the suite, but the verification result was
    // already determined; carry it in the error so it stays visible.
    if let Err(e) = cleanup_result {
        return Err(e.context(format!(
            "fixture {} finished with outcome {:?} before restore failed",
            fixture.name, outcome
        )));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassMask, MemoryPolicyStore};
    use crate::config::{HarnessConfig, TrailConfig};
    use crate::record::{events, RecordBuilder};
    use std::io::Write;
    use std::path::PathBuf;

    fn test_config(path: &PathBuf) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.trail = TrailConfig {
            path: path.clone(),
            poll_interval_ms: 10,
        };
        config
    }

    fn append(path: &PathBuf, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[tokio::test]
    async fn test_fixture_runs_full_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current");
        std::fs::write(&path, b"").unwrap();
        let config = test_config(&path);

        let baseline = ClassMask::parse_flags("lo").unwrap();
        let observer = MemoryPolicyStore::new(baseline);

        let trail = path.clone();
        let fixture = Fixture::new(
            "shmget_success",
            "Tests the audit of a successful shmget(2) call",
            "ip",
            move || {
                // Plays the kernel: the driven syscall causes a record.
                let raw = RecordBuilder::new(events::AUE_SHMGET)
                    .subject(1000, 1000, 77)
                    .ret_success(262145)
                    .build();
                append(&trail, &raw);
                Ok("shmget.*return,success,262145".to_string())
            },
        );

        let outcome = run(&config, Box::new(observer.clone()), fixture)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Matched);
        assert_eq!(observer.current_mask(), baseline);
    }

    #[tokio::test]
    async fn test_driver_error_is_setup_failure_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current");
        std::fs::write(&path, b"").unwrap();
        let config = test_config(&path);

        let baseline = ClassMask::parse_flags("lo").unwrap();
        let observer = MemoryPolicyStore::new(baseline);

        let fixture = Fixture::new("broken", "driver fails", "ip", || {
            anyhow::bail!("syscall scaffolding failed")
        });

        let outcome = run(&config, Box::new(observer.clone()), fixture)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::SetupFailed);
        assert_eq!(observer.current_mask(), baseline);
    }

    #[tokio::test]
    async fn test_restore_failure_reports_determined_outcome() {
        use crate::class::PolicyStore;
        use crate::errors::ConfigError;

        // Arms cleanly, then fails every later write, so the restore after
        // a successful verification breaks.
        struct FailingRestoreStore {
            mask: ClassMask,
            writes: usize,
        }

        impl PolicyStore for FailingRestoreStore {
            fn read_mask(&self) -> Result<ClassMask, ConfigError> {
                Ok(self.mask)
            }

            fn write_mask(&mut self, mask: ClassMask) -> Result<(), ConfigError> {
                self.writes += 1;
                if self.writes > 1 {
                    return Err(ConfigError::Unavailable("daemon gone".to_string()));
                }
                self.mask = mask;
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current");
        std::fs::write(&path, b"").unwrap();
        let config = test_config(&path);

        let trail = path.clone();
        let fixture = Fixture::new(
            "msgget_success",
            "Tests the audit of a successful msgget(2) call",
            "ip",
            move || {
                let raw = RecordBuilder::new(events::AUE_MSGGET)
                    .subject(1000, 1000, 7)
                    .ret_success(17)
                    .build();
                append(&trail, &raw);
                Ok("msgget.*return,success,17".to_string())
            },
        );

        let store = FailingRestoreStore {
            mask: ClassMask::parse_flags("lo").unwrap(),
            writes: 0,
        };
        let err = run(&config, Box::new(store), fixture).await.unwrap_err();
        // The suite must abort, but the test's own verdict stays visible.
        let chain = format!("{:#}", err);
        assert!(chain.contains("Matched"), "error chain was: {}", chain);
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current");
        std::fs::write(&path, b"").unwrap();
        let config = test_config(&path);

        let fixture = Fixture::new("bad_pattern", "pattern invalid", "ip", || {
            Ok("msgget.*(".to_string())
        });

        let store = MemoryPolicyStore::new(ClassMask::EMPTY);
        let outcome = run(&config, Box::new(store), fixture).await.unwrap();
        assert_eq!(outcome, Outcome::SetupFailed);
    }

    #[tokio::test]
    async fn test_unopenable_trail_is_setup_failure() {
        let config = test_config(&PathBuf::from("/nonexistent/audit/current"));
        let fixture = Fixture::new("no_trail", "trail missing", "ip", || Ok("x".to_string()));
        let store = MemoryPolicyStore::new(ClassMask::EMPTY);
        let outcome = run(&config, Box::new(store), fixture).await.unwrap();
        assert_eq!(outcome, Outcome::SetupFailed);
    }
}
