//! Audit sink for dispatch outcomes.
//!
//! The dispatcher records what happened to each task record — dispatched,
//! completed, failed, or dropped — so a failing handler is never lost
//! silently. Sinks are pluggable; the in-memory ring is suitable for tests
//! and development.

use std::collections::VecDeque;

use crate::util::clock::now_ms;

/// One audited dispatch outcome.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Unique event identifier.
    pub event_id: String,
    /// Event name of the task record this outcome belongs to.
    pub task_event: String,
    /// Sequence number of the task record.
    pub seq: u64,
    /// Action taken (dispatch, complete, fail, drop).
    pub action: String,
    /// Timestamp in milliseconds since epoch.
    pub created_at_ms: u128,
    /// Additional context, e.g. the handler error message.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Build an audit event with a fresh identifier and current timestamp.
#[must_use]
pub fn build_audit_event(
    task_event: impl Into<String>,
    seq: u64,
    action: impl Into<String>,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        task_event: task_event.into(),
        seq,
        action: action.into(),
        created_at_ms: now_ms(),
        detail,
    }
}

/// In-memory audit sink with a bounded ring buffer.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a sink keeping at most `max_events` entries.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}
