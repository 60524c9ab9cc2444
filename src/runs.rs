use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

struct RunState {
    started_at: DateTime<Utc>,
    started: Instant,
    total_photos: usize,
    current_photo: AtomicUsize,
}

/// Snapshot of an active processing run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub event_id: String,
    pub started_at: DateTime<Utc>,
    /// Photos finished so far, successful or not.
    pub current_photo: usize,
    pub total_photos: usize,
    pub elapsed: Duration,
}

/// Registry of in-flight runs, at most one per event.
#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<String, Arc<RunState>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `event_id`. `None` when a run already holds it.
    ///
    /// The claim lasts until the returned guard is dropped.
    pub fn try_start(&self, event_id: &str, total_photos: usize) -> Option<RunGuard<'_>> {
        match self.runs.entry(event_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let state = Arc::new(RunState {
                    started_at: Utc::now(),
                    started: Instant::now(),
                    total_photos,
                    current_photo: AtomicUsize::new(0),
                });
                slot.insert(Arc::clone(&state));
                Some(RunGuard {
                    registry: self,
                    event_id: event_id.to_string(),
                    state,
                })
            }
        }
    }

    pub fn status(&self, event_id: &str) -> Option<RunStatus> {
        let state = self.runs.get(event_id).map(|s| Arc::clone(s.value()))?;
        Some(RunStatus {
            event_id: event_id.to_string(),
            started_at: state.started_at,
            current_photo: state.current_photo.load(Ordering::Relaxed),
            total_photos: state.total_photos,
            elapsed: state.started.elapsed(),
        })
    }

    pub fn is_active(&self, event_id: &str) -> bool {
        self.runs.contains_key(event_id)
    }

    pub fn active_events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.runs.iter().map(|r| r.key().clone()).collect();
        events.sort();
        events
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Exclusive claim on one event's run. Dropping it releases the event.
pub struct RunGuard<'a> {
    registry: &'a RunRegistry,
    event_id: String,
    state: Arc<RunState>,
}

impl RunGuard<'_> {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Record one more finished photo and return the new count.
    pub fn advance(&self) -> usize {
        self.state.current_photo.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn completed(&self) -> usize {
        self.state.current_photo.load(Ordering::Relaxed)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let state = &self.state;
        self.registry
            .runs
            .remove_if(&self.event_id, |_, current| Arc::ptr_eq(current, state));
    }
}
