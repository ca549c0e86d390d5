use std::sync::{Arc, Mutex};

use privrun::audit::{AuditEvent, AuditSink};

/// Audit sink that keeps every event in memory for later assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingAudit {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poll until at least `n` events arrived (jobs audit from their own task).
    pub async fn wait_for(&self, n: usize) -> Vec<AuditEvent> {
        loop {
            if self.len() >= n {
                return self.events();
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
