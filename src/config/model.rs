// src/config/model.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::audit::{AuditSink, FileAuditLog, TracingAudit};
use crate::errors::{EngineError, Result};
use crate::exec::Elevation;
use crate::types::ResourceLimits;

/// Programs accepted when `allowed_commands` is missing or empty.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "/sbin/zfs",
    "/sbin/zpool",
    "/sbin/geom",
    "/usr/sbin/service",
    "/usr/local/bin/smbpasswd",
    "/usr/local/bin/pdbedit",
    "/usr/local/bin/testparm",
    "/usr/local/bin/rsync",
];

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// allowed_commands = ["/sbin/zfs", "/sbin/zpool"]
///
/// [limits]
/// max_output_bytes = 1048576
/// max_runtime_seconds = 120
///
/// [elevation]
/// mode = "sudo"
/// args = ["-n"]
///
/// [jobs]
/// retention_seconds = 900
///
/// [audit]
/// log_file = "/var/log/privrun-audit.log"
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub allowed_commands: Vec<String>,

    #[serde(default)]
    pub unsafe_allow_any: bool,

    #[serde(default)]
    pub limits: ResourceLimits,

    #[serde(default)]
    pub elevation: Elevation,

    #[serde(default)]
    pub jobs: JobsSection,

    #[serde(default)]
    pub audit: AuditSection,
}

/// Validated configuration. Obtain one through
/// `ConfigFile::try_from(raw)` or [`ConfigFile::default`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Programs `JobManager::start` and the CLI accept. Never empty after
    /// construction: a missing or empty list becomes
    /// [`DEFAULT_ALLOWED_COMMANDS`].
    pub allowed_commands: Vec<String>,

    /// Skip the allowlist entirely.
    pub unsafe_allow_any: bool,

    pub limits: ResourceLimits,
    pub elevation: Elevation,
    pub jobs: JobsSection,
    pub audit: AuditSection,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let raw = RawConfigFile::default();
        Self::new_unchecked(raw)
    }
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            allowed_commands: allowed_or_default(raw.allowed_commands),
            unsafe_allow_any: raw.unsafe_allow_any,
            limits: raw.limits,
            elevation: raw.elevation,
            jobs: raw.jobs,
            audit: raw.audit,
        }
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        self.unsafe_allow_any || self.allowed_commands.iter().any(|a| a == path)
    }

    pub fn check_allowed(&self, path: &str) -> Result<()> {
        if self.is_allowed(path) {
            Ok(())
        } else {
            Err(EngineError::Validation(format!(
                "command not in allowlist: {path}"
            )))
        }
    }
}

fn allowed_or_default(allowed: Vec<String>) -> Vec<String> {
    if allowed.is_empty() {
        DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect()
    } else {
        allowed
    }
}

/// `[jobs]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct JobsSection {
    /// How long a finished job stays visible.
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,

    /// How often the eviction sweep runs.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Queue length of each live subscription.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

fn default_retention_seconds() -> u64 {
    15 * 60
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_subscriber_capacity() -> usize {
    16
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            retention_seconds: default_retention_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

impl JobsSection {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

/// `[audit]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuditSection {
    /// Append audit lines here. Without it, audit records go to the log.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl AuditSection {
    pub fn build_sink(&self) -> Arc<dyn AuditSink> {
        match &self.log_file {
            Some(path) => Arc::new(FileAuditLog::new(path)),
            None => Arc::new(TracingAudit),
        }
    }
}
