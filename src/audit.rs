// src/audit.rs

//! Audit hook for completed privileged commands.
//!
//! The engine reports `(user, action, command, exit_code)` once per finished
//! synchronous run and once per finished job. Where that record ends up is
//! the sink's business; recording is best-effort and never fails a command.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

/// One security-relevant action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub user: String,
    pub action: String,
    pub command: String,
    pub exit_code: i32,
}

impl AuditEvent {
    pub fn new(
        user: impl Into<String>,
        action: impl Into<String>,
        command: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self {
            at: Utc::now(),
            user: user.into(),
            action: action.into(),
            command: command.into(),
            exit_code,
        }
    }

    /// `<RFC3339> user="…" action="…" command="…" exit=N`
    pub fn to_line(&self) -> String {
        format!(
            "{} user={:?} action={:?} command={:?} exit={}",
            self.at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.user,
            self.action,
            self.command,
            self.exit_code
        )
    }
}

/// Destination for audit events.
///
/// `record` may block (file I/O, a lock shared with other writers). The
/// engine calls it through [`record_blocking`], never directly on an async
/// worker.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Record `event` on the blocking pool and wait for the sink to finish.
pub async fn record_blocking(sink: Arc<dyn AuditSink>, event: AuditEvent) {
    let recorded = tokio::task::spawn_blocking(move || sink.record(&event)).await;
    if let Err(err) = recorded {
        warn!(error = %err, "audit sink panicked");
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAudit;

impl AuditSink for NoAudit {
    fn record(&self, _event: &AuditEvent) {}
}

/// Emits each event as an `info` record on the `privrun::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: &AuditEvent) {
        info!(
            target: "privrun::audit",
            user = %event.user,
            action = %event.action,
            command = %event.command,
            exit_code = event.exit_code,
            "audit"
        );
    }
}

/// Appends one line per event to a file created with mode 0600.
#[derive(Debug)]
pub struct FileAuditLog {
    path: Mutex<PathBuf>,
}

impl FileAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Mutex::new(path.into()),
        }
    }

    /// Switch the destination; later events go to `path`.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        *self.path.lock().unwrap_or_else(PoisonError::into_inner) = path.into();
    }

    fn append(path: &Path, line: &str) -> std::io::Result<()> {
        let mut opts = OpenOptions::new();
        opts.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(path)?;
        writeln!(file, "{line}")
    }
}

impl AuditSink for FileAuditLog {
    fn record(&self, event: &AuditEvent) {
        // Held across the write so concurrent lines never interleave.
        let path = self.path.lock().unwrap_or_else(PoisonError::into_inner);
        if path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = Self::append(&path, &event.to_line()) {
            warn!(path = %path.display(), error = %e, "failed to write audit record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_format_quotes_fields() {
        let mut event = AuditEvent::new("admin", "cmd.run", "/sbin/zfs list \"x\"", 2);
        event.at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        assert_eq!(
            event.to_line(),
            r#"2024-03-01T12:00:05Z user="admin" action="cmd.run" command="/sbin/zfs list \"x\"" exit=2"#
        );
    }

    #[test]
    fn file_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = FileAuditLog::new(&path);

        log.record(&AuditEvent::new("a", "cmd.run", "/bin/true", 0));
        log.record(&AuditEvent::new("b", "zfs.send", "/sbin/zfs send", 1));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(r#"user="a" action="cmd.run" command="/bin/true" exit=0"#));
        assert!(lines[1].contains(r#"action="zfs.send""#));
    }

    #[test]
    fn set_path_redirects_later_events() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("one.log");
        let second = dir.path().join("two.log");
        let log = FileAuditLog::new(&first);

        log.record(&AuditEvent::new("a", "x", "/bin/true", 0));
        log.set_path(&second);
        log.record(&AuditEvent::new("a", "y", "/bin/true", 0));

        assert_eq!(std::fs::read_to_string(&first).unwrap().lines().count(), 1);
        assert_eq!(std::fs::read_to_string(&second).unwrap().lines().count(), 1);
    }
}
