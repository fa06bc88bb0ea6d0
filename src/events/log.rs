//! Bounded, deduplicating event log.

use crate::error::{Result, SyncError};
use crate::types::{AttendanceEvent, EventKey};
use std::collections::VecDeque;
use std::sync::Arc;

/// Capacity-limited log of attendance events, newest first.
///
/// Holds at most one entry per [`EventKey`]. Full history lives in the REST
/// store; this only keeps the recent window under bounded memory.
#[derive(Debug, Clone)]
pub struct BoundedEventLog {
    /// Entries, front = most recently inserted or updated.
    entries: VecDeque<AttendanceEvent>,

    /// Maximum number of entries.
    capacity: usize,

    /// Shared copy handed out by `snapshot`, invalidated on change.
    cached: Option<LogSnapshot>,
}

impl BoundedEventLog {
    /// Default capacity, matching the dashboard's live event list.
    pub const DEFAULT_CAPACITY: usize = 50;

    /// Create a log with the given capacity. Zero is rejected.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SyncError::Configuration(
                "event log capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            cached: None,
        })
    }

    /// Ingest an event. Returns whether the visible content changed.
    ///
    /// - same slot, older `timestamp_in`: ignored
    /// - same slot, identical event: ignored
    /// - same slot otherwise: replaced and moved to the front
    /// - new slot: inserted at the front, evicting the oldest entry when full
    pub fn ingest(&mut self, event: AttendanceEvent) -> bool {
        let key = event.key();

        if let Some(pos) = self.position(&key) {
            let existing = &self.entries[pos];
            if event.timestamp_in() < existing.timestamp_in() || *existing == event {
                return false;
            }
            self.entries.remove(pos);
        }

        self.entries.push_front(event);
        if self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                tracing::trace!(key = ?evicted.key(), "evicted oldest event");
            }
        }
        self.cached = None;
        true
    }

    /// Newest-first view of the log as it is now.
    ///
    /// Later ingests do not show up in a snapshot already taken.
    pub fn snapshot(&mut self) -> LogSnapshot {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let snapshot = LogSnapshot {
            entries: self.entries.iter().cloned().collect::<Vec<_>>().into(),
        };
        self.cached = Some(snapshot.clone());
        snapshot
    }

    /// Current entry for a slot.
    pub fn get(&self, key: &EventKey) -> Option<&AttendanceEvent> {
        self.entries.iter().find(|e| e.key() == *key)
    }

    /// Iterate entries newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &AttendanceEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn position(&self, key: &EventKey) -> Option<usize> {
        self.entries.iter().position(|e| e.key() == *key)
    }
}

/// Read-only, newest-first copy of a log's entries.
///
/// Cheap to clone; iteration can be restarted any number of times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSnapshot {
    entries: Arc<[AttendanceEvent]>,
}

impl LogSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, AttendanceEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entry.
    pub fn first(&self) -> Option<&AttendanceEvent> {
        self.entries.first()
    }

    pub fn as_slice(&self) -> &[AttendanceEvent] {
        &self.entries
    }

    /// Whether both snapshots share the same storage.
    pub fn ptr_eq(&self, other: &LogSnapshot) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl<'a> IntoIterator for &'a LogSnapshot {
    type Item = &'a AttendanceEvent;
    type IntoIter = std::slice::Iter<'a, AttendanceEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
