//! Run event log
//!
//! Append-only record of what happened during one run.
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run-level and call-level variants
//! - EventLog: thread-safe, cloneable handle; optionally mirrors every
//!   event to a live channel so a caller can show results as they arrive

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All possible event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        max_count: u32,
        variables: Vec<String>,
    },
    VariablesResolved {
        count: usize,
    },
    ProviderSelected {
        provider: String,
        model: String,
    },
    RunCompleted {
        results: usize,
    },
    RunCancelled {
        results: usize,
    },
    RunFailed {
        error: String,
        results: usize,
    },

    // ═══════════════════════════════════════════
    // CALL LEVEL
    // ═══════════════════════════════════════════
    CallStarted {
        index: usize,
    },
    CallCompleted {
        index: usize,
        text: String,
        tokens_used: Option<u32>,
        duration_ms: u64,
    },
    CallFailed {
        index: usize,
        error: String,
    },
    /// Call in flight when cancellation fired; its output is never used
    CallDiscarded {
        index: usize,
    },
}

impl EventKind {
    /// Extract call index if event is call-related
    pub fn call_index(&self) -> Option<usize> {
        match self {
            Self::CallStarted { index }
            | Self::CallCompleted { index, .. }
            | Self::CallFailed { index, .. }
            | Self::CallDiscarded { index } => Some(*index),
            _ => None,
        }
    }

    /// Terminal run event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted { .. } | Self::RunCancelled { .. } | Self::RunFailed { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
    feed: Option<mpsc::UnboundedSender<Event>>,
}

impl EventLog {
    /// Create a new event log (call at run start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
            feed: None,
        }
    }

    /// Create a log that also sends every event to the returned receiver
    pub fn with_feed() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut log = Self::new();
        log.feed = Some(tx);
        (log, rx)
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        if let Some(feed) = &self.feed {
            // Receiver gone just means nobody is watching
            let _ = feed.send(event.clone());
        }
        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Events for one call index
    pub fn filter_call(&self, index: usize) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.call_index() == Some(index))
            .cloned()
            .collect()
    }

    /// Serialize to JSON for debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&*self.events.read()).unwrap_or(Value::Null)
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .field("feed", &self.feed.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eventkind_call_index() {
        assert_eq!(EventKind::CallStarted { index: 2 }.call_index(), Some(2));
        assert_eq!(EventKind::RunCompleted { results: 1 }.call_index(), None);
    }

    #[test]
    fn eventkind_terminal() {
        assert!(EventKind::RunCancelled { results: 0 }.is_terminal());
        assert!(!EventKind::VariablesResolved { count: 1 }.is_terminal());
    }

    #[test]
    fn eventkind_serializes_with_type_tag() {
        let kind = EventKind::CallCompleted {
            index: 0,
            text: "bonjour".into(),
            tokens_used: Some(9),
            duration_ms: 150,
        };

        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "call_completed");
        assert_eq!(json["text"], "bonjour");
        assert_eq!(json["tokens_used"], 9);
    }

    #[test]
    fn eventkind_deserializes_from_tagged_json() {
        let kind: EventKind = serde_json::from_value(json!({
            "type": "run_failed",
            "error": "boom",
            "results": 1
        }))
        .unwrap();
        assert_eq!(
            kind,
            EventKind::RunFailed {
                error: "boom".into(),
                results: 1
            }
        );
    }

    #[test]
    fn log_ids_are_monotonic() {
        let log = EventLog::new();
        let a = log.emit(EventKind::CallStarted { index: 0 });
        let b = log.emit(EventKind::CallStarted { index: 1 });
        assert!(b > a);
        assert_eq!(log.len(), 2);
        assert_eq!(log.filter_call(1).len(), 1);
    }

    #[test]
    fn clones_share_storage() {
        let log = EventLog::new();
        let other = log.clone();
        other.emit(EventKind::VariablesResolved { count: 0 });
        assert_eq!(log.len(), 1);
        assert!(log.to_json().is_array());
    }

    #[tokio::test]
    async fn feed_receives_events() {
        let (log, mut rx) = EventLog::with_feed();
        log.emit(EventKind::CallStarted { index: 0 });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::CallStarted { index: 0 });
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let (log, rx) = EventLog::with_feed();
        drop(rx);
        log.emit(EventKind::CallStarted { index: 0 });
        assert_eq!(log.len(), 1);
    }
}
