// src/errors.rs

//! Crate-wide error type.
//!
//! Only validation and start failures are errors. A command that runs and
//! exits non-zero (or hits its deadline) is reported through
//! [`ExecutionResult::exit_code`](crate::types::ExecutionResult) instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid command: {0}")]
    Validation(String),

    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} pipe was not captured")]
    Pipe(&'static str),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("no matching checkpoints found")]
    NoMatchingCheckpoints,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
