// src/exec/runner.rs

//! Synchronous bounded command runner.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::audit::{record_blocking, AuditEvent, AuditSink};
use crate::errors::{EngineError, Result};
use crate::exec::buffer::CappedBuffer;
use crate::exec::command::{drain_until, wait_until, Elevation, DRAIN_GRACE};
use crate::types::{CommandSpec, ExecutionResult, ResourceLimits};

/// Runs one privileged command to completion and captures its output.
///
/// Dropping the future returned by [`CommandRunner::run`] kills the child,
/// so a caller that gives up (a closed request, a `select!` that lost)
/// never leaves the process behind.
#[derive(Clone)]
pub struct CommandRunner {
    elevation: Elevation,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("elevation", &self.elevation)
            .finish_non_exhaustive()
    }
}

impl CommandRunner {
    pub fn new(elevation: Elevation, audit: Arc<dyn AuditSink>) -> Self {
        Self { elevation, audit }
    }

    pub fn elevation(&self) -> &Elevation {
        &self.elevation
    }

    /// Run `spec` under `limits`.
    ///
    /// Returns an error only when the path is invalid or the process could
    /// not be started; a non-zero exit or a deadline is reported in the
    /// result.
    pub async fn run(&self, spec: &CommandSpec, limits: ResourceLimits) -> Result<ExecutionResult> {
        spec.validate()?;

        let deadline = Instant::now() + limits.runtime();
        let limit = limits.output_limit();

        debug!(cmd = %spec.canonical(), ?deadline, limit, "running command");

        let mut child = self.elevation.spawn(spec)?;
        let stdout = child.stdout.take().ok_or(EngineError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(EngineError::Pipe("stderr"))?;

        let mut out = CappedBuffer::new(limit);
        let mut err = CappedBuffer::new(limit);
        let drains_until = deadline + DRAIN_GRACE;

        let (outcome, (), ()) = tokio::join!(
            wait_until(&mut child, deadline),
            drain_until(stdout, drains_until, |chunk| {
                out.append(chunk);
            }),
            drain_until(stderr, drains_until, |chunk| {
                err.append(chunk);
            }),
        );

        let result = ExecutionResult {
            stdout: out.to_string_lossy(),
            stderr: err.to_string_lossy(),
            exit_code: outcome.exit_code(),
            truncated: out.is_truncated() || err.is_truncated(),
        };

        debug!(
            cmd = %spec.canonical(),
            exit_code = result.exit_code,
            truncated = result.truncated,
            "command finished"
        );

        Ok(result)
    }

    /// [`run`](Self::run), then record `(owner, action, command, exit_code)`
    /// with the audit sink.
    ///
    /// Start failures are audited too, with exit code 1.
    pub async fn run_as(
        &self,
        owner: &str,
        action: &str,
        spec: &CommandSpec,
        limits: ResourceLimits,
    ) -> Result<ExecutionResult> {
        let res = self.run(spec, limits).await;
        let exit_code = match &res {
            Ok(result) => result.exit_code,
            Err(EngineError::Validation(_)) => return res,
            Err(_) => crate::exec::EXIT_FAILURE,
        };

        info!(owner, action, cmd = %spec.canonical(), exit_code, "privileged command completed");
        let event = AuditEvent::new(owner, action, spec.canonical(), exit_code);
        record_blocking(Arc::clone(&self.audit), event).await;
        res
    }
}
