// src/replicate/mod.rs

//! Replication bookkeeping: which checkpoints to stream and how.
//!
//! The transfer itself is a [`crate::exec::PipelineExecutor`] run with the
//! argument vectors produced by [`ChainSelection`].

pub mod chain;

pub use chain::{
    checkpoint_name, matching_checkpoints, retention_victims, select_after_prior, select_chain,
    valid_checkpoint_token, ChainSelection, DEFAULT_CHECKPOINT_PREFIX,
};
