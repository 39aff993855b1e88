// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Harness configuration.
//!
//! TOML schema with a section per concern: the trail to capture, the audit
//! control surface, and the bounded wait. All fields carry `#[serde(default)]`
//! so a partial (or missing) config falls back to sensible defaults. The
//! wait deadline is an operational tuning knob, not a correctness property,
//! which is why it lives here instead of as a constant.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub trail: TrailConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub wait: WaitConfig,
}

/// Where the live trail lives and how often the tail task polls for
/// appended bytes while at EOF.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrailConfig {
    #[serde(default = "default_trail_path")]
    pub path: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_trail_path() -> PathBuf {
    PathBuf::from("/var/audit/current")
}
fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            path: default_trail_path(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TrailConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// The audit policy control surface: the control file whose `flags:` line
/// holds the event-class preselection, and the command run to make the
/// daemon pick up a rewrite.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_path")]
    pub path: PathBuf,
    /// Empty disables the post-write poke.
    #[serde(default = "default_refresh_command")]
    pub refresh_command: Vec<String>,
}

fn default_control_path() -> PathBuf {
    PathBuf::from("/etc/security/audit_control")
}
fn default_refresh_command() -> Vec<String> {
    vec!["audit".to_string(), "-s".to_string()]
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            path: default_control_path(),
            refresh_command: default_refresh_command(),
        }
    }
}

/// The single bounded wait per `check_audit`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WaitConfig {
    /// Generous wall-clock bound; expiry means the kernel never flushed a
    /// matching record.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_deadline_secs() -> u64 {
    5
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl WaitConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl HarnessConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config from {}", path.display()))
    }

    /// Write back as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write config to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: HarnessConfig = toml::from_str("").unwrap();
        assert_eq!(config.trail.path, PathBuf::from("/var/audit/current"));
        assert_eq!(config.trail.poll_interval_ms, 50);
        assert_eq!(
            config.control.path,
            PathBuf::from("/etc/security/audit_control")
        );
        assert_eq!(config.control.refresh_command, vec!["audit", "-s"]);
        assert_eq!(config.wait.deadline(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: HarnessConfig = toml::from_str(
            r#"
            [wait]
            deadline_secs = 30

            [trail]
            path = "/dev/auditpipe"
            "#,
        )
        .unwrap();
        assert_eq!(config.wait.deadline_secs, 30);
        assert_eq!(config.trail.path, PathBuf::from("/dev/auditpipe"));
        assert_eq!(config.trail.poll_interval_ms, 50);
    }

    #[test]
    fn test_load_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clawtrail.toml");

        let mut config = HarnessConfig::default();
        config.wait.deadline_secs = 12;
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.wait.deadline_secs, 12);
        assert_eq!(loaded.trail.path, config.trail.path);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        assert!(HarnessConfig::load("/nonexistent/clawtrail.toml").is_err());
    }
}
