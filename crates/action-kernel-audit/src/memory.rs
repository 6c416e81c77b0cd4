//! In-memory sinks for tests and local runs

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::{AuditError, AuditResult};
use crate::record::{AuditEntry, AuditSink, EventBus, EventRecord};

/// Audit sink that keeps entries in memory
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    failures_remaining: AtomicU32,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` appends
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Entries whose action id equals `action_id`
    pub fn entries_for(&self, action_id: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.action_id == action_id)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn append_audit_entry(&self, entry: &AuditEntry) -> AuditResult<()> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AuditError::DeliveryFailed("audit store unavailable".into()));
        }
        self.entries
            .lock()
            .map_err(|_| AuditError::DeliveryFailed("audit log poisoned".into()))?
            .push(entry.clone());
        Ok(())
    }
}

/// Event bus that keeps published events in memory
#[derive(Debug, Default)]
pub struct MemoryEventBus {
    events: Mutex<Vec<EventRecord>>,
    failures_remaining: AtomicU32,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` publishes
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_named(&self, name: &str) -> Vec<EventRecord> {
        self.events().into_iter().filter(|e| e.name == name).collect()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: &EventRecord) -> AuditResult<()> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AuditError::DeliveryFailed("event bus unavailable".into()));
        }
        self.events
            .lock()
            .map_err(|_| AuditError::DeliveryFailed("event bus poisoned".into()))?
            .push(event.clone());
        Ok(())
    }
}
