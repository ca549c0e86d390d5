// src/exec/pipeline.rs

//! Two-process streaming transfer (`producer | consumer`).
//!
//! Used for replication streams such as `zfs send … | zfs recv …`. Both
//! sides run through the elevation wrapper, their stderr shares one capped
//! diagnostics buffer, and one deadline covers the whole transfer.

use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::errors::{EngineError, Result};
use crate::exec::buffer::SharedBuffer;
use crate::exec::command::{
    drain_until, kill, wait_until, Elevation, WaitOutcome, DRAIN_GRACE,
};
use crate::types::{CommandSpec, ExecutionResult, ResourceLimits};

#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    elevation: Elevation,
}

impl PipelineExecutor {
    pub fn new(elevation: Elevation) -> Self {
        Self { elevation }
    }

    /// Stream `producer`'s stdout into `consumer`'s stdin.
    ///
    /// The consumer is started first so the producer never writes into a
    /// pipe nobody reads. Shutdown runs in a fixed order: the producer is
    /// reaped, then the consumer's stdin is closed (EOF), then the consumer
    /// is reaped.
    ///
    /// The exit code is the producer's when it failed, otherwise the
    /// consumer's.
    pub async fn run_pipeline(
        &self,
        producer: &CommandSpec,
        consumer: &CommandSpec,
        limits: ResourceLimits,
    ) -> Result<ExecutionResult> {
        producer.validate()?;
        consumer.validate()?;
        if consumer.stdin.is_some() {
            return Err(EngineError::Validation(
                "pipeline consumer reads from the producer; it cannot take its own stdin".to_string(),
            ));
        }

        let deadline = Instant::now() + limits.runtime();
        let diagnostics = SharedBuffer::new(limits.output_limit());

        info!(
            producer = %producer.canonical(),
            consumer = %consumer.canonical(),
            "starting pipeline"
        );

        let mut consumer_child = self.spawn_consumer(consumer)?;
        let mut producer_child = match self.elevation.spawn(producer) {
            Ok(child) => child,
            Err(e) => {
                kill(&mut consumer_child).await;
                return Err(e);
            }
        };

        let pipes = take_pipes(&mut producer_child, &mut consumer_child);
        let (producer_out, consumer_in, producer_err, consumer_err) = match pipes {
            Ok(p) => p,
            Err(e) => {
                kill(&mut producer_child).await;
                kill(&mut consumer_child).await;
                return Err(e);
            }
        };

        let drains_until = deadline + DRAIN_GRACE;
        let producer_diag = diagnostics.clone();
        let consumer_diag = diagnostics.clone();

        let transfer = async {
            let (producer_outcome, write_end) = tokio::join!(
                wait_until(&mut producer_child, deadline),
                relay(producer_out, consumer_in, deadline),
            );
            // Closing the write end is what tells the consumer the stream is over.
            drop(write_end);
            let consumer_outcome = wait_until(&mut consumer_child, deadline).await;
            (producer_outcome, consumer_outcome)
        };

        let ((producer_outcome, consumer_outcome), (), ()) = tokio::join!(
            transfer,
            drain_until(producer_err, drains_until, |chunk| {
                producer_diag.append(chunk);
            }),
            drain_until(consumer_err, drains_until, |chunk| {
                consumer_diag.append(chunk);
            }),
        );

        let exit_code = combined_exit_code(&producer_outcome, &consumer_outcome);
        let diag = diagnostics.snapshot();

        if exit_code != 0 {
            warn!(
                producer_exit = producer_outcome.exit_code(),
                consumer_exit = consumer_outcome.exit_code(),
                "pipeline failed"
            );
        } else {
            info!("pipeline finished");
        }

        Ok(ExecutionResult {
            stdout: String::new(),
            stderr: diag.to_string_lossy(),
            exit_code,
            truncated: diag.is_truncated(),
        })
    }

    fn spawn_consumer(&self, spec: &CommandSpec) -> Result<Child> {
        let mut cmd = self.elevation.command(spec);
        cmd.stdin(Stdio::piped()).stdout(Stdio::null());
        cmd.spawn().map_err(|source| EngineError::Spawn {
            command: spec.canonical(),
            source,
        })
    }
}

type Pipes = (
    ChildStdout,
    ChildStdin,
    tokio::process::ChildStderr,
    tokio::process::ChildStderr,
);

fn take_pipes(producer: &mut Child, consumer: &mut Child) -> Result<Pipes> {
    Ok((
        producer.stdout.take().ok_or(EngineError::Pipe("producer stdout"))?,
        consumer.stdin.take().ok_or(EngineError::Pipe("consumer stdin"))?,
        producer.stderr.take().ok_or(EngineError::Pipe("producer stderr"))?,
        consumer.stderr.take().ok_or(EngineError::Pipe("consumer stderr"))?,
    ))
}

/// Copy the producer's output into the consumer until EOF, a write
/// failure (consumer gone) or the deadline.
///
/// The write end is handed back so the caller decides when the consumer
/// sees EOF. The read end is dropped here, which turns a dead consumer
/// into SIGPIPE for the producer instead of a stall.
async fn relay(mut from: ChildStdout, mut to: ChildStdin, deadline: Instant) -> ChildStdin {
    match timeout_at(deadline, tokio::io::copy(&mut from, &mut to)).await {
        Ok(Ok(bytes)) => debug!(bytes, "pipeline stream complete"),
        Ok(Err(e)) => debug!(error = %e, "pipeline relay stopped early"),
        Err(_) => warn!("pipeline relay hit the deadline"),
    }
    to
}

/// Producer failure wins; otherwise the consumer decides.
pub fn combined_exit_code(producer: &WaitOutcome, consumer: &WaitOutcome) -> i32 {
    combine_codes(producer.exit_code(), consumer.exit_code())
}

pub(crate) fn combine_codes(producer: i32, consumer: i32) -> i32 {
    if producer != 0 { producer } else { consumer }
}
