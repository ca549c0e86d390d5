// src/jobs/viewer.rs

//! Reference viewer: stream one job's output to a writer until it is done.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::errors::Result;

use super::job::JobSnapshot;
use super::manager::JobManager;

/// How often a viewer polls for completion by default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Follow job `id`, writing its output to `sink`:
///
/// 1. write the output buffered so far,
/// 2. write live chunks as they arrive,
/// 3. poll the job every `poll` and stop once it is done.
///
/// Completion is only learned by polling; the feed itself never says
/// "done". Output is written as raw bytes. A write error ends the viewer
/// but not the job. Once attached, the viewer keeps its own handle on the
/// job, so a sweep evicting it mid-stream does not cut the stream short.
pub async fn follow_job<W>(
    manager: &JobManager,
    id: &str,
    sink: &mut W,
    poll: Duration,
) -> Result<JobSnapshot>
where
    W: AsyncWrite + Unpin,
{
    let job = manager.job(id)?;
    let (initial, mut sub) = manager.attach_job(&job);
    sink.write_all(&initial.output).await?;
    sink.flush().await?;

    let mut ticker = tokio::time::interval(poll);
    loop {
        tokio::select! {
            chunk = sub.recv() => match chunk {
                Some(chunk) => {
                    sink.write_all(&chunk).await?;
                    sink.flush().await?;
                }
                None => {
                    debug!(job_id = id, "job feed closed");
                    break;
                }
            },
            _ = ticker.tick() => {
                if job.is_done() {
                    break;
                }
            }
        }
    }

    // Chunks are queued before the job is marked done; flush what's left.
    while let Some(chunk) = sub.try_recv() {
        sink.write_all(&chunk).await?;
    }
    sink.flush().await?;

    manager.unsubscribe(id, sub);
    Ok(job.snapshot())
}
