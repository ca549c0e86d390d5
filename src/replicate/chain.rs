// src/replicate/chain.rs

//! Full vs incremental decision for a replication transfer.
//!
//! Everything here is pure bookkeeping over checkpoint names of the form
//! `dataset@suffix`. Nothing spawns a process.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;

use crate::errors::{EngineError, Result};

/// Prefix used by [`checkpoint_name`] when the caller passes an empty one.
pub const DEFAULT_CHECKPOINT_PREFIX: &str = "snapshot";

/// Outcome of [`select_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSelection {
    /// Base of an incremental stream, if there is one.
    pub previous: Option<String>,
    /// The checkpoint to transfer.
    pub current: String,
    pub incremental: bool,
}

impl ChainSelection {
    /// Arguments for the producer side: `send [-R] [-I <prev>] <cur>`.
    pub fn send_args(&self, recursive: bool) -> Vec<String> {
        let mut args = vec!["send".to_string()];
        if recursive {
            args.push("-R".to_string());
        }
        if let Some(prev) = &self.previous {
            args.push("-I".to_string());
            args.push(prev.clone());
        }
        args.push(self.current.clone());
        args
    }

    /// Arguments for the consumer side: `recv [-F] <target>`.
    pub fn receive_args(&self, target: &str, force: bool) -> Vec<String> {
        let mut args = vec!["recv".to_string()];
        if force {
            args.push("-F".to_string());
        }
        args.push(target.to_string());
        args
    }
}

/// Pick the checkpoint to send and the one to base it on.
///
/// `matching` must be in creation order. `current` is `just_created` when
/// the list contains it, otherwise the newest entry. `previous` is the
/// entry right before `current`.
pub fn select_chain<S: AsRef<str>>(matching: &[S], just_created: &str) -> Result<ChainSelection> {
    if matching.is_empty() {
        return Err(EngineError::NoMatchingCheckpoints);
    }

    let index = matching
        .iter()
        .position(|name| name.as_ref() == just_created)
        .unwrap_or(matching.len() - 1);

    let current = matching[index].as_ref().to_string();
    let previous = index
        .checked_sub(1)
        .map(|prev| matching[prev].as_ref().to_string());

    Ok(ChainSelection {
        incremental: previous.is_some(),
        previous,
        current,
    })
}

/// Like [`select_chain`] for a listing taken before `just_created` existed:
/// the new name is appended when absent, then selected.
pub fn select_after_prior<S: AsRef<str>>(prior: &[S], just_created: &str) -> Result<ChainSelection> {
    let mut names: Vec<&str> = prior.iter().map(AsRef::as_ref).collect();
    if !just_created.is_empty() && !names.contains(&just_created) {
        names.push(just_created);
    }
    select_chain(&names, just_created)
}

/// Keep the `dataset@suffix` names whose suffix starts with `prefix`.
///
/// Order is preserved. Names without `@` are skipped, and an empty prefix
/// matches nothing.
pub fn matching_checkpoints<S: AsRef<str>>(names: &[S], prefix: &str) -> Vec<String> {
    if prefix.is_empty() {
        return Vec::new();
    }
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| {
            name.split_once('@')
                .is_some_and(|(_, suffix)| suffix.starts_with(prefix))
        })
        .map(str::to_string)
        .collect()
}

/// Entries to destroy so that only the newest `keep` remain.
///
/// `keep == 0` disables retention.
pub fn retention_victims<S: AsRef<str>>(matching: &[S], keep: usize) -> Vec<String> {
    if keep == 0 || matching.len() <= keep {
        return Vec::new();
    }
    matching[..matching.len() - keep]
        .iter()
        .map(|s| s.as_ref().to_string())
        .collect()
}

/// `<prefix>-YYYYMMDD-HHMMSS` in UTC.
pub fn checkpoint_name(prefix: &str, unix_seconds: i64) -> String {
    let prefix = if prefix.is_empty() {
        DEFAULT_CHECKPOINT_PREFIX
    } else {
        prefix
    };
    let at = DateTime::<Utc>::from_timestamp(unix_seconds, 0).unwrap_or(DateTime::UNIX_EPOCH);
    format!("{prefix}-{}", at.format("%Y%m%d-%H%M%S"))
}

fn token_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r"^[A-Za-z0-9_.:-]+$") {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(error = %err, "invalid checkpoint token pattern");
            None
        }
    })
    .as_ref()
}

/// A checkpoint suffix or prefix safe to splice into an argument vector.
pub fn valid_checkpoint_token(token: &str) -> bool {
    token_regex().is_some_and(|re| re.is_match(token))
}
