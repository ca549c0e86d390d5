// src/exec/buffer.rs

//! Size-capped output capture.
//!
//! Every byte of child output the engine keeps goes through a
//! [`CappedBuffer`]. Once the cap is hit the buffer is frozen: later writes
//! are dropped even if they would fit, and `truncated` stays set.

use std::sync::{Arc, Mutex, PoisonError};

/// What one [`CappedBuffer::append`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Number of leading bytes of the input that were retained.
    pub kept: usize,
    /// Whether the buffer is (now) truncated.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct CappedBuffer {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedBuffer {
    /// A zero limit is treated as the 1 MiB default.
    pub fn new(limit: usize) -> Self {
        let limit = if limit == 0 {
            crate::types::DEFAULT_MAX_OUTPUT_BYTES as usize
        } else {
            limit
        };
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn append(&mut self, data: &[u8]) -> Appended {
        if data.is_empty() || self.truncated {
            return Appended {
                kept: 0,
                truncated: self.truncated,
            };
        }

        let room = self.limit - self.buf.len();
        let kept = if data.len() > room {
            self.truncated = true;
            room
        } else {
            data.len()
        };
        self.buf.extend_from_slice(&data[..kept]);

        Appended {
            kept,
            truncated: self.truncated,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Retained bytes as text; invalid UTF-8 is replaced.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Length of the longest prefix of `bytes` that does not end inside an
/// incomplete UTF-8 sequence.
///
/// Only a trailing sequence that later bytes could still complete is held
/// back; invalid bytes anywhere else count as settled, since no later write
/// changes how they decode.
pub fn settled_utf8_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for start in len.saturating_sub(3)..len {
        if let Err(e) = std::str::from_utf8(&bytes[start..]) {
            if e.valid_up_to() == 0 && e.error_len().is_none() {
                return start;
            }
        }
    }
    len
}

/// A [`CappedBuffer`] behind one lock, shared by several writers.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    inner: Arc<Mutex<CappedBuffer>>,
}

impl SharedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CappedBuffer::new(limit))),
        }
    }

    pub fn append(&self, data: &[u8]) -> Appended {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(data)
    }

    pub fn snapshot(&self) -> CappedBuffer {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
