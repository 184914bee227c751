// Keel Core - Structured events
//
// Cluster events carry a machine-readable reason and a human message, tied
// to the object they describe. The recorder mirrors every event onto the
// tracing subscriber and keeps an inspectable buffer.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// One recorded cluster event
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    /// Kind of the object the event is about
    pub kind: String,
    /// `namespace/name` of the object
    pub object: String,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Shared event sink
#[derive(Clone, Default)]
pub struct EventRecorder {
    buffer: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normal(
        &self,
        kind: impl Into<String>,
        object: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.record(EventType::Normal, kind, object, reason, message);
    }

    pub fn warning(
        &self,
        kind: impl Into<String>,
        object: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.record(EventType::Warning, kind, object, reason, message);
    }

    fn record(
        &self,
        event_type: EventType,
        kind: impl Into<String>,
        object: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let event = Event {
            event_type,
            kind: kind.into(),
            object: object.into(),
            reason: reason.into(),
            message: message.into(),
            timestamp: Utc::now(),
        };

        match event.event_type {
            EventType::Normal => tracing::info!(
                kind = %event.kind,
                object = %event.object,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => tracing::warn!(
                kind = %event.kind,
                object = %event.object,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }

        self.buffer.lock().push(event);
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<Event> {
        self.buffer.lock().clone()
    }

    /// Events with the given reason
    pub fn events_with_reason(&self, reason: &str) -> Vec<Event> {
        self.buffer
            .lock()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_buffers_events() {
        let recorder = EventRecorder::new();
        recorder.normal("Query", "default/q", "QueryResolveStart", "resolving targets");
        recorder.warning("Query", "default/q", "TargetFailed", "agent blew up");

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Normal);
        assert_eq!(events[1].event_type, EventType::Warning);
        assert_eq!(recorder.events_with_reason("TargetFailed").len(), 1);
    }
}
