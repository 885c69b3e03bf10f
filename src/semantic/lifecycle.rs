//! Per-item embedding lifecycle.
//!
//! `New -> Pending -> Ready`, and `Ready -> Stale -> Pending -> Ready` after
//! an edit. Every dispatch gets a generation number; only the latest
//! dispatch for an item may complete it.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingState {
    /// No vector yet
    New,
    /// Generation dispatched
    Pending,
    /// Vector stored
    Ready,
    /// Source text changed since the vector was computed
    Stale,
}

#[derive(Debug, Clone)]
struct Entry {
    state: EmbeddingState,
    generation: u64,
    /// Hash of the text the stored vector was computed from
    text_hash: Option<u64>,
    last_error: Option<String>,
}

/// Ticket handed to a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub generation: u64,
    /// State the item was in before this dispatch
    pub previous: EmbeddingState,
}

#[derive(Debug, Default)]
pub struct LifecycleTracker {
    entries: Mutex<HashMap<String, Entry>>,
    next_generation: Mutex<u64>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracked state, `None` if this tracker never saw the item.
    pub fn state(&self, id: &str) -> Option<EmbeddingState> {
        self.with_entries(|entries| entries.get(id).map(|e| e.state))
            .flatten()
    }

    pub fn text_hash(&self, id: &str) -> Option<u64> {
        self.with_entries(|entries| entries.get(id).and_then(|e| e.text_hash))
            .flatten()
    }

    pub fn last_error(&self, id: &str) -> Option<String> {
        self.with_entries(|entries| entries.get(id).and_then(|e| e.last_error.clone()))
            .flatten()
    }

    /// Move to `Pending` and return the dispatch ticket.
    pub fn begin(&self, id: &str) -> Dispatch {
        let generation = match self.next_generation.lock() {
            Ok(mut next) => {
                *next += 1;
                *next
            }
            Err(poisoned) => {
                let mut next = poisoned.into_inner();
                *next += 1;
                *next
            }
        };

        let previous = self
            .with_entries(|entries| {
                let entry = entries.entry(id.to_string()).or_insert(Entry {
                    state: EmbeddingState::New,
                    generation: 0,
                    text_hash: None,
                    last_error: None,
                });
                let previous = entry.state;
                entry.state = EmbeddingState::Pending;
                entry.generation = generation;
                previous
            })
            .unwrap_or(EmbeddingState::New);

        Dispatch {
            generation,
            previous,
        }
    }

    /// Mark an item `Stale`. Returns false if it has no vector to go stale.
    pub fn mark_stale(&self, id: &str) -> bool {
        self.with_entries(|entries| match entries.get_mut(id) {
            Some(entry) if entry.state != EmbeddingState::New => {
                entry.state = EmbeddingState::Stale;
                true
            }
            _ => false,
        })
        .unwrap_or(false)
    }

    /// Mark `Ready` if `dispatch` is still the latest one for the item.
    pub fn complete(&self, id: &str, dispatch: Dispatch, text_hash: u64) {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(id) {
                // a superseded dispatch saw older text
                if entry.generation == dispatch.generation {
                    entry.state = EmbeddingState::Ready;
                    entry.last_error = None;
                    entry.text_hash = Some(text_hash);
                }
            }
        });
    }

    /// Record a failed dispatch and restore the state it started from.
    pub fn fail(&self, id: &str, dispatch: Dispatch, error: String) {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(id) {
                if entry.generation == dispatch.generation {
                    entry.state = dispatch.previous;
                }
                entry.last_error = Some(error);
            }
        });
    }

    /// Record an item embedded outside a dispatch (backfill).
    pub fn mark_ready(&self, id: &str, text_hash: u64) {
        self.with_entries(|entries| {
            let entry = entries.entry(id.to_string()).or_insert(Entry {
                state: EmbeddingState::Ready,
                generation: 0,
                text_hash: None,
                last_error: None,
            });
            entry.state = EmbeddingState::Ready;
            entry.text_hash = Some(text_hash);
            entry.last_error = None;
        });
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> Option<T> {
        match self.entries.lock() {
            Ok(mut entries) => Some(f(&mut entries)),
            Err(e) => {
                log::error!("lifecycle tracker lock poisoned: {e}");
                None
            }
        }
    }
}
