use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

/// Output cap applied when the caller passes zero or a negative value.
pub const DEFAULT_MAX_OUTPUT_BYTES: i64 = 1 << 20;

/// Runtime cap applied when the caller passes zero or a negative value.
pub const DEFAULT_MAX_RUNTIME_SECONDS: i64 = 120;

/// Per-call resource limits.
///
/// Non-positive values fall back to the defaults (1 MiB / 120 s); the
/// raw values are kept as given so a config file round-trips unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: i64,
    #[serde(default = "default_max_runtime_seconds")]
    pub max_runtime_seconds: i64,
}

fn default_max_output_bytes() -> i64 {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_max_runtime_seconds() -> i64 {
    DEFAULT_MAX_RUNTIME_SECONDS
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_runtime_seconds: DEFAULT_MAX_RUNTIME_SECONDS,
        }
    }
}

impl ResourceLimits {
    pub fn new(max_output_bytes: i64, max_runtime_seconds: i64) -> Self {
        Self {
            max_output_bytes,
            max_runtime_seconds,
        }
    }

    /// Effective output cap in bytes.
    pub fn output_limit(&self) -> usize {
        if self.max_output_bytes <= 0 {
            DEFAULT_MAX_OUTPUT_BYTES as usize
        } else {
            self.max_output_bytes as usize
        }
    }

    /// Effective execution deadline.
    pub fn runtime(&self) -> Duration {
        if self.max_runtime_seconds <= 0 {
            Duration::from_secs(DEFAULT_MAX_RUNTIME_SECONDS as u64)
        } else {
            Duration::from_secs(self.max_runtime_seconds as u64)
        }
    }
}

/// A fully resolved command: absolute program path, arguments and
/// optional bytes to feed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub absolute_path: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(absolute_path: impl Into<String>) -> Self {
        Self {
            absolute_path: absolute_path.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// Reject empty or relative program paths before anything is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.absolute_path.is_empty() {
            return Err(EngineError::Validation(
                "command path is empty".to_string(),
            ));
        }
        if !self.absolute_path.starts_with('/') {
            return Err(EngineError::Validation(format!(
                "command must be absolute (got '{}')",
                self.absolute_path
            )));
        }
        Ok(())
    }

    /// Path and arguments joined by single spaces, as written to the audit log.
    pub fn canonical(&self) -> String {
        canonical_command(&self.absolute_path, &self.args)
    }
}

pub(crate) fn canonical_command(path: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(path);
    parts.extend(args.iter().map(String::as_str));
    parts.join(" ").trim().to_string()
}

/// Captured outcome of a synchronous run or a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Result shape reported to callers when a command could not even be
    /// started: exit code 1 with the error text on stderr.
    pub fn start_failure(err: &EngineError) -> Self {
        Self {
            stdout: String::new(),
            stderr: err.to_string(),
            exit_code: crate::exec::EXIT_FAILURE,
            truncated: false,
        }
    }
}
