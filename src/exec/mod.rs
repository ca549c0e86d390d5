// src/exec/mod.rs

//! Process execution layer.
//!
//! Every privileged process the engine starts is built here, using
//! `tokio::process::Command` behind the configured [`Elevation`] wrapper.
//!
//! - [`buffer`] holds the capped output buffers.
//! - [`command`] builds elevated commands, drains pipes and maps exit codes.
//! - [`runner`] runs one command to completion (synchronous callers).
//! - [`pipeline`] connects a producer and a consumer for streamed transfers.
//!
//! Long-running commands go through [`crate::jobs`] instead.

pub mod buffer;
pub mod command;
pub mod pipeline;
pub mod runner;

pub use buffer::{settled_utf8_len, Appended, CappedBuffer, SharedBuffer};
pub use command::{Elevation, WaitOutcome, EXIT_FAILURE, EXIT_TIMEOUT};
pub use pipeline::PipelineExecutor;
pub use runner::CommandRunner;
