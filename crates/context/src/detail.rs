//! Secondary ("detail") timeline of a node.
//!
//! Sub-records arrive as partial updates from several sources, possibly out
//! of order. Updates for a known id are merged into the stored record
//! rather than replacing it.

use std::collections::HashMap;

use worker_core::{RecordId, TimelineId, TimelineRecord, Time};

/// A lazily created detail timeline and its records.
#[derive(Debug, Default)]
pub struct DetailTimeline {
    id: Option<TimelineId>,
    records: HashMap<RecordId, TimelineRecord>,
}

impl DetailTimeline {
    /// Create an empty, not yet allocated, detail timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeline id, once allocated.
    pub fn id(&self) -> Option<TimelineId> {
        self.id
    }

    /// Allocate the timeline id on first use.
    ///
    /// Returns the id and whether it was allocated by this call.
    pub fn ensure_created(&mut self) -> (TimelineId, bool) {
        match self.id {
            Some(id) => (id, false),
            None => {
                let id = TimelineId::new();
                self.id = Some(id);
                (id, true)
            }
        }
    }

    /// Insert a new record or merge into the existing one.
    ///
    /// Returns the stored record after the update.
    pub fn upsert(&mut self, record: TimelineRecord) -> &TimelineRecord {
        use std::collections::hash_map::Entry;

        match self.records.entry(record.id) {
            Entry::Occupied(entry) => {
                let existing = entry.into_mut();
                existing.merge_from(&record);
                existing
            }
            Entry::Vacant(entry) => entry.insert(record),
        }
    }

    /// Complete every record not yet completed.
    ///
    /// Returns the records that changed.
    pub fn complete_open(&mut self, now: Time) -> Vec<TimelineRecord> {
        self.records
            .values_mut()
            .filter(|r| !r.is_completed())
            .map(|r| {
                r.complete(None, now);
                r.clone()
            })
            .collect()
    }

    /// Look up a record.
    pub fn get(&self, id: RecordId) -> Option<&TimelineRecord> {
        self.records.get(&id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record was added yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
