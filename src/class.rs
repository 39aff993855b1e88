// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Audit event-class selection and restore.
//!
//! Each test narrows the kernel's audit preselection to a single event class
//! ("ip" for System V IPC, "nt" for network, ...) so the trail only carries
//! records the test itself caused. [`ClassFilter`] snapshots the pre-test
//! baseline on first use, overwrites the active mask unconditionally, and
//! writes the snapshot back on restore — from any exit path, any number of
//! times.
//!
//! The OS policy store sits behind the [`PolicyStore`] trait:
//! [`SystemPolicyStore`] edits the `flags:` line of the audit control file
//! and pokes the daemon, [`MemoryPolicyStore`] backs tests and dry runs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::errors::ConfigError;

/// Event classes kept enabled alongside the test's class so record
/// boundaries stay observable in the trail.
const DELIMIT_FLAGS: ClassMask = ClassMask(0x0000_0040); // cl

/// Class mnemonic table, mirroring audit_class(5).
const CLASS_TABLE: &[(&str, u32)] = &[
    ("no", 0x0000_0000),
    ("fr", 0x0000_0001),
    ("fw", 0x0000_0002),
    ("fa", 0x0000_0004),
    ("fm", 0x0000_0008),
    ("fc", 0x0000_0010),
    ("fd", 0x0000_0020),
    ("cl", 0x0000_0040),
    ("pc", 0x0000_0080),
    ("nt", 0x0000_0100),
    ("ip", 0x0000_0200),
    ("na", 0x0000_0400),
    ("ad", 0x0000_0800),
    ("lo", 0x0000_1000),
    ("aa", 0x0000_2000),
    ("ap", 0x0000_4000),
    ("io", 0x2000_0000),
    ("ex", 0x4000_0000),
    ("ot", 0x8000_0000),
    ("all", 0xffff_ffff),
];

/// A named audit event class (e.g. "ip", "nt").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditClass(String);

impl AuditClass {
    /// Look up a class mnemonic. Unknown mnemonics are a setup error, not a
    /// runtime condition.
    pub fn new(mnemonic: &str) -> Result<Self, ConfigError> {
        if CLASS_TABLE.iter().any(|(name, _)| *name == mnemonic) {
            Ok(Self(mnemonic.to_string()))
        } else {
            Err(ConfigError::UnknownClass(mnemonic.to_string()))
        }
    }

    pub fn mnemonic(&self) -> &str {
        &self.0
    }

    pub fn mask(&self) -> ClassMask {
        let bits = CLASS_TABLE
            .iter()
            .find(|(name, _)| *name == self.0)
            .map(|(_, bits)| *bits)
            .unwrap_or(0);
        ClassMask(bits)
    }
}

impl fmt::Display for AuditClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bit set of enabled audit event classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassMask(pub u32);

impl ClassMask {
    pub const EMPTY: ClassMask = ClassMask(0);

    pub fn union(self, other: ClassMask) -> ClassMask {
        ClassMask(self.0 | other.0)
    }

    pub fn contains(self, other: ClassMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse the comma-separated `flags:` syntax ("lo,aa" etc).
    pub fn parse_flags(s: &str) -> Result<ClassMask, ConfigError> {
        let mut bits = 0u32;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let class = AuditClass::new(part)?;
            bits |= class.mask().0;
        }
        Ok(ClassMask(bits))
    }

    /// Render back to `flags:` syntax. Classes not representable by a single
    /// mnemonic are dropped; "all" wins if every bit is set.
    pub fn to_flags(self) -> String {
        if self.0 == 0xffff_ffff {
            return "all".to_string();
        }
        let mut names = Vec::new();
        for (name, bits) in CLASS_TABLE {
            if *bits != 0 && *bits != 0xffff_ffff && self.0 & bits == *bits {
                names.push(*name);
            }
        }
        names.join(",")
    }
}

/// Read/write access to the OS audit policy store.
///
/// The harness only ever touches the active event-class preselection mask;
/// everything else in the policy store is out of scope.
pub trait PolicyStore: Send {
    fn read_mask(&self) -> Result<ClassMask, ConfigError>;
    fn write_mask(&mut self, mask: ClassMask) -> Result<(), ConfigError>;
}

/// Policy store backed by the system audit control file.
///
/// Rewrites the `flags:` line in place and runs `audit -s` so the daemon
/// picks up the new preselection. Requires root and a running auditd.
pub struct SystemPolicyStore {
    control_path: PathBuf,
    /// Command run after a mask write; empty disables the poke (used when
    /// the caller restarts the daemon itself).
    refresh_command: Vec<String>,
}

impl SystemPolicyStore {
    pub fn new(control_path: impl AsRef<Path>) -> Self {
        Self {
            control_path: control_path.as_ref().to_path_buf(),
            refresh_command: vec!["audit".to_string(), "-s".to_string()],
        }
    }

    pub fn with_refresh_command(mut self, argv: Vec<String>) -> Self {
        self.refresh_command = argv;
        self
    }

    fn refresh(&self) -> Result<(), ConfigError> {
        let Some((prog, args)) = self.refresh_command.split_first() else {
            return Ok(());
        };
        match Command::new(prog).args(args).output() {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(ConfigError::Unavailable(format!(
                    "{} failed: {}",
                    prog,
                    stderr.trim()
                )))
            }
            Err(e) => Err(ConfigError::Unavailable(format!(
                "failed to run {}: {}",
                prog, e
            ))),
        }
    }
}

impl PolicyStore for SystemPolicyStore {
    fn read_mask(&self) -> Result<ClassMask, ConfigError> {
        let text = std::fs::read_to_string(&self.control_path).map_err(|e| {
            ConfigError::Unavailable(format!(
                "cannot read {}: {}",
                self.control_path.display(),
                e
            ))
        })?;
        for line in text.lines() {
            if let Some(flags) = line.trim().strip_prefix("flags:") {
                return ClassMask::parse_flags(flags);
            }
        }
        Err(ConfigError::Malformed(format!(
            "no flags: line in {}",
            self.control_path.display()
        )))
    }

    fn write_mask(&mut self, mask: ClassMask) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(&self.control_path).map_err(|e| {
            ConfigError::Unavailable(format!(
                "cannot read {}: {}",
                self.control_path.display(),
                e
            ))
        })?;
        let mut replaced = false;
        let mut out = String::with_capacity(text.len() + 16);
        for line in text.lines() {
            if line.trim().starts_with("flags:") {
                out.push_str(&format!("flags:{}", mask.to_flags()));
                replaced = true;
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }
        if !replaced {
            out.push_str(&format!("flags:{}\n", mask.to_flags()));
        }
        std::fs::write(&self.control_path, out)?;
        self.refresh()
    }
}

/// In-memory policy store for tests and dry runs.
///
/// Clones share state, so a caller can keep one clone to observe the mask
/// after handing another to the harness.
#[derive(Clone)]
pub struct MemoryPolicyStore {
    state: std::sync::Arc<std::sync::Mutex<MemoryPolicyState>>,
}

/// Observable state of a [`MemoryPolicyStore`]: the current mask and every
/// write it has seen.
pub struct MemoryPolicyState {
    pub mask: ClassMask,
    pub writes: Vec<ClassMask>,
}

impl MemoryPolicyStore {
    pub fn new(initial: ClassMask) -> Self {
        Self {
            state: std::sync::Arc::new(std::sync::Mutex::new(MemoryPolicyState {
                mask: initial,
                writes: Vec::new(),
            })),
        }
    }

    pub fn current_mask(&self) -> ClassMask {
        self.state.lock().expect("policy state mutex poisoned").mask
    }

    pub fn write_count(&self) -> usize {
        self.state
            .lock()
            .expect("policy state mutex poisoned")
            .writes
            .len()
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn read_mask(&self) -> Result<ClassMask, ConfigError> {
        Ok(self.current_mask())
    }

    fn write_mask(&mut self, mask: ClassMask) -> Result<(), ConfigError> {
        let mut state = self.state.lock().expect("policy state mutex poisoned");
        state.mask = mask;
        state.writes.push(mask);
        Ok(())
    }
}

/// Arms the class filter for one test and restores the baseline afterwards.
///
/// The baseline is snapshotted on the first `configure` and kept across
/// repeated restores, so `restore` is idempotent: calling it twice leaves
/// the mask identical to calling it once.
pub struct ClassFilter {
    store: Box<dyn PolicyStore>,
    baseline: Option<ClassMask>,
}

impl ClassFilter {
    pub fn new(store: Box<dyn PolicyStore>) -> Self {
        Self {
            store,
            baseline: None,
        }
    }

    /// Overwrite the active mask with `class` plus the delimiting baseline.
    ///
    /// A stale mask left by a previous test is clobbered, never merged.
    pub fn configure(&mut self, class: &AuditClass) -> Result<(), ConfigError> {
        let current = self.store.read_mask()?;
        if self.baseline.is_none() {
            self.baseline = Some(current);
        }
        let target = class.mask().union(DELIMIT_FLAGS);
        tracing::debug!(class = %class, mask = target.0, "arming class filter");
        self.store.write_mask(target)
    }

    /// Write the pre-test baseline back. No-op if `configure` never ran.
    pub fn restore(&mut self) -> Result<(), ConfigError> {
        if let Some(baseline) = self.baseline {
            tracing::debug!(mask = baseline.0, "restoring class filter baseline");
            self.store.write_mask(baseline)?;
        }
        Ok(())
    }
}
