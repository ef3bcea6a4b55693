//! Progress reporting.
//!
//! The pipeline broadcasts transient [`IndexingProgress`] events to zero or
//! more registered listeners. Listeners are plain callbacks keyed by an id;
//! each invocation is isolated so one misbehaving listener cannot take the
//! run down.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::warn;

/// Terminal and intermediate states of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Starting,
    Indexing,
    Completed,
    Error,
    Cancelled,
}

/// One progress event. Transient, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct IndexingProgress {
    /// Files processed so far (skipped, indexed or individually failed).
    pub current: usize,
    /// Total candidate files for this run.
    pub total: usize,
    /// File most recently processed, if any.
    pub current_file: Option<String>,
    pub status: IndexStatus,
    /// Human-readable detail, set for `error` events.
    pub message: Option<String>,
}

/// Identifier handed back by [`ProgressBroadcaster::subscribe`].
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&IndexingProgress) + Send + Sync>;

/// Owns the listener map for one pipeline instance.
#[derive(Default)]
pub struct ProgressBroadcaster {
    listeners: Mutex<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and return its id.
    pub fn subscribe(&self, listener: impl Fn(&IndexingProgress) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener; returns whether it existed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .remove(&id)
            .is_some()
    }

    /// Deliver an event to every listener, isolating panics.
    pub fn emit(&self, progress: &IndexingProgress) {
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().expect("listener lock poisoned");
            guard.values().cloned().collect()
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(progress))).is_err() {
                warn!("progress listener panicked, event dropped for that listener");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(status: IndexStatus) -> IndexingProgress {
        IndexingProgress {
            current: 1,
            total: 2,
            current_file: Some("src/a.rs".to_string()),
            status,
            message: None,
        }
    }

    #[test]
    fn listeners_receive_events() {
        let broadcaster = ProgressBroadcaster::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        broadcaster.subscribe(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.emit(&event(IndexStatus::Indexing));
        broadcaster.emit(&event(IndexStatus::Completed));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broadcaster = ProgressBroadcaster::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        let id = broadcaster.subscribe(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.emit(&event(IndexStatus::Indexing));
        assert!(broadcaster.unsubscribe(id));
        broadcaster.emit(&event(IndexStatus::Indexing));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!broadcaster.unsubscribe(id));
    }

    #[test]
    fn panicking_listener_does_not_poison_others() {
        let broadcaster = ProgressBroadcaster::new();
        let seen = Arc::new(AtomicUsize::new(0));

        broadcaster.subscribe(|_| panic!("listener bug"));
        let seen_clone = seen.clone();
        broadcaster.subscribe(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.emit(&event(IndexStatus::Indexing));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&IndexStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
