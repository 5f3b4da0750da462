//! Bounded event history.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One received envelope plus the time it arrived.
///
/// Entries are immutable once appended and keep the raw envelope, so the
/// history also covers frames that never touched a task record (unknown
/// types, channel errors, orphan updates).
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub envelope: Value,
    pub received_at: DateTime<Utc>,
}

/// Most-recent-first log of every received envelope, capped at a fixed
/// length. Cheap to clone; clones share the same backing list.
#[derive(Clone)]
pub struct HistoryLog {
    entries: Arc<Mutex<VecDeque<HistoryEntry>>>,
    limit: usize,
}

impl HistoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(limit))),
            limit,
        }
    }

    /// Prepend an envelope, evicting the oldest entry past the cap.
    pub fn append(&self, envelope: Value) {
        let entry = HistoryEntry {
            envelope,
            received_at: Utc::now(),
        };
        let mut entries = self.lock();
        entries.push_front(entry);
        entries.truncate(self.limit);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Snapshot of the current entries, newest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
