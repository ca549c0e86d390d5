// src/jobs/job.rs

//! A single asynchronous job and its live subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::exec::{settled_utf8_len, CappedBuffer};
use crate::types::{canonical_command, CommandSpec};

/// Identifier issued by [`JobManager::start`](super::JobManager::start).
pub type JobId = String;

/// A piece of combined stdout/stderr, as read from the child.
pub type Chunk = Vec<u8>;

/// Point-in-time copy of a job's state.
///
/// `output` holds the raw bytes retained so far. It only ever grows
/// between two snapshots of the same job, and every later snapshot's output
/// starts with the earlier one's. [`JobSnapshot::output_text`] keeps the
/// same property for the decoded text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip)]
    pub owner: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub done: bool,
    pub exit_code: Option<i32>,
    #[serde(serialize_with = "serialize_output")]
    pub output: Vec<u8>,
    pub truncated: bool,
    #[serde(skip)]
    pub limit: usize,
}

impl JobSnapshot {
    pub fn command_line(&self) -> String {
        canonical_command(&self.command, &self.args)
    }

    /// Output as text. While the job runs, a trailing incomplete UTF-8
    /// sequence is left out until the rest of it arrives; once the job is
    /// done (or the buffer is frozen) everything is decoded lossily.
    pub fn output_text(&self) -> String {
        let settled = if self.done || self.truncated {
            self.output.len()
        } else {
            settled_utf8_len(&self.output)
        };
        String::from_utf8_lossy(&self.output[..settled]).into_owned()
    }

    /// Wall time from start to end; `None` while running.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let end = self.ended_at?;
        if end < self.started_at {
            return None;
        }
        Some(end - self.started_at)
    }
}

fn serialize_output<S: Serializer>(output: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(output))
}

/// Mutable part of a job. Only touched with [`Job::state`] held.
#[derive(Debug)]
struct JobState {
    buffer: CappedBuffer,
    done: bool,
    exit_code: Option<i32>,
    ended_at: Option<DateTime<Utc>>,
    finished: Option<Instant>,
    subscribers: HashMap<u64, mpsc::Sender<Chunk>>,
    next_subscriber: u64,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Debug)]
pub struct Job {
    id: JobId,
    command: String,
    args: Vec<String>,
    owner: String,
    started_at: DateTime<Utc>,
    state: Mutex<JobState>,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        spec: &CommandSpec,
        owner: &str,
        limit: usize,
        cancel: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id,
            command: spec.absolute_path.clone(),
            args: spec.args.clone(),
            owner: owner.to_string(),
            started_at: Utc::now(),
            state: Mutex::new(JobState {
                buffer: CappedBuffer::new(limit),
                done: false,
                exit_code: None,
                ended_at: None,
                finished: None,
                subscribers: HashMap::new(),
                next_subscriber: 0,
                cancel: Some(cancel),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn command_line(&self) -> String {
        canonical_command(&self.command, &self.args)
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        self.snapshot_locked(&state)
    }

    fn snapshot_locked(&self, state: &JobState) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            owner: self.owner.clone(),
            started_at: self.started_at,
            ended_at: state.ended_at,
            done: state.done,
            exit_code: state.exit_code,
            output: state.buffer.bytes().to_vec(),
            truncated: state.buffer.is_truncated(),
            limit: state.buffer.limit(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state().done
    }

    /// Record a chunk of output and fan the retained part out to every
    /// subscriber, in one critical section.
    ///
    /// Fan-out never blocks: a subscriber whose queue is full misses the
    /// chunk, and one whose receiver is gone is dropped from the set.
    pub(crate) fn append(&self, chunk: &[u8]) {
        let mut state = self.state();
        let appended = state.buffer.append(chunk);
        if appended.kept == 0 {
            return;
        }
        let kept = &chunk[..appended.kept];
        state.subscribers.retain(|key, tx| match tx.try_send(kept.to_vec()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subscriber = key, "subscriber queue full; dropping chunk");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Move to `Done`. Returns false if the job was already done.
    pub(crate) fn finish(&self, exit_code: i32) -> bool {
        let mut state = self.state();
        if state.done {
            return false;
        }
        state.done = true;
        state.exit_code = Some(exit_code);
        state.ended_at = Some(Utc::now());
        state.finished = Some(Instant::now());
        state.cancel = None;
        true
    }

    /// The process never ran: surface `message` as the job's output and
    /// finish with exit code 1.
    pub(crate) fn fail_to_start(&self, message: &str) -> bool {
        self.append(message.as_bytes());
        self.finish(crate::exec::EXIT_FAILURE)
    }

    /// Fire the job's own cancellation handle. False once it has finished
    /// or was already cancelled.
    pub(crate) fn cancel(&self) -> bool {
        match self.state().cancel.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Done, and finished longer than `retention` before `now`.
    pub(crate) fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        let state = self.state();
        match state.finished {
            Some(finished) if state.done => now.saturating_duration_since(finished) > retention,
            _ => false,
        }
    }

    /// Register a subscriber and take a snapshot under the same lock, so
    /// the snapshot plus the chunks received afterwards cover the output
    /// without gaps or repeats (drops aside).
    pub(crate) fn attach(self: &Arc<Self>, capacity: usize) -> (JobSnapshot, Subscription) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut state = self.state();
        let key = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.insert(key, tx);
        let snapshot = self.snapshot_locked(&state);
        drop(state);

        let sub = Subscription {
            job_id: self.id.clone(),
            key,
            rx,
            job: Arc::downgrade(self),
        };
        (snapshot, sub)
    }

    fn remove_subscriber(&self, key: u64) {
        self.state().subscribers.remove(&key);
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }
}

/// A live feed of one job's output chunks.
///
/// Chunks arrive in production order. `done` is never delivered through
/// the feed; poll [`JobManager::get`](super::JobManager::get) for that.
/// Dropping the subscription unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    job_id: JobId,
    key: u64,
    rx: mpsc::Receiver<Chunk>,
    job: Weak<Job>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next chunk; `None` once the job has been evicted.
    pub async fn recv(&mut self) -> Option<Chunk> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Chunk> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(job) = self.job.upgrade() {
            job.remove_subscriber(self.key);
        }
    }
}
