// src/jobs/mod.rs

//! Asynchronous jobs with live output streaming.
//!
//! A job is a privileged command running on its own Tokio task, detached
//! from whoever started it. Its combined stdout/stderr lands in one capped
//! buffer that any number of pollers can read, and is fanned out chunk by
//! chunk to live subscribers.
//!
//! - [`job`] holds the per-job record and the subscription handle.
//! - [`manager`] owns the job table, the live configuration and the
//!   eviction sweep.
//! - [`viewer`] is the reference implementation of the viewer protocol.

pub mod job;
pub mod manager;
pub mod viewer;

pub use job::{Chunk, Job, JobId, JobSnapshot, Subscription};
pub use manager::{JobManager, JOB_AUDIT_ACTION};
pub use viewer::{follow_job, DEFAULT_POLL_INTERVAL};
