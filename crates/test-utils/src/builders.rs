#![allow(dead_code)]

use privrun::config::{ConfigFile, RawConfigFile};
use privrun::exec::Elevation;
use privrun::types::{CommandSpec, ResourceLimits};

/// `/bin/sh -c <script>`, the stand-in for a privileged tool in tests.
pub fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("/bin/sh").arg("-c").arg(script)
}

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the defaults with `Elevation::Direct`, so nothing in a test
/// goes through `sudo`. Any command is accepted until the first
/// [`allow`](Self::allow) narrows it to an explicit list.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                elevation: Elevation::Direct,
                unsafe_allow_any: true,
                ..RawConfigFile::default()
            },
        }
    }

    pub fn max_output_bytes(mut self, bytes: i64) -> Self {
        self.config.limits.max_output_bytes = bytes;
        self
    }

    pub fn max_runtime_seconds(mut self, secs: i64) -> Self {
        self.config.limits.max_runtime_seconds = secs;
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn allow(mut self, path: &str) -> Self {
        self.config.unsafe_allow_any = false;
        self.config.allowed_commands.push(path.to_string());
        self
    }

    pub fn retention_seconds(mut self, secs: u64) -> Self {
        self.config.jobs.retention_seconds = secs;
        self
    }

    pub fn sweep_interval_seconds(mut self, secs: u64) -> Self {
        self.config.jobs.sweep_interval_seconds = secs;
        self
    }

    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.config.jobs.subscriber_capacity = capacity;
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
