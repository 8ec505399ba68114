use serde::{Deserialize, Serialize};

use crate::options::{Effect, Intensity, ProcessingOptions, Style};

/// One completed generation. Written once on success, never mutated.
///
/// Field names are the persisted wire layout; changing them breaks every
/// existing history file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedImageRecord {
    pub id: String,
    pub original_url: String,
    pub processed_url: String,
    /// Epoch millis at creation time.
    pub timestamp: i64,
    pub mode: Intensity,
    pub style: Style,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
}

impl ProcessedImageRecord {
    pub fn options(&self) -> ProcessingOptions {
        ProcessingOptions {
            intensity: self.mode,
            style: self.style,
            effect: self.effect,
        }
    }
}

/// Ordered history of generations, newest first. Ids are unique; order
/// reflects creation order, not access order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStore {
    records: Vec<ProcessedImageRecord>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted list. Duplicate ids are dropped, first
    /// occurrence wins, so a damaged payload cannot break the invariant.
    pub fn from_records(records: Vec<ProcessedImageRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            if store.get(&record.id).is_none() {
                store.records.push(record);
            }
        }
        store
    }

    pub fn prepend(&mut self, record: ProcessedImageRecord) {
        self.records.retain(|existing| existing.id != record.id);
        self.records.insert(0, record);
    }

    /// Removes exactly the record with `id`; unknown ids are a no-op.
    /// Returns whether anything was removed.
    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.id != id);
        self.records.len() != before
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn get(&self, id: &str) -> Option<&ProcessedImageRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn records(&self) -> &[ProcessedImageRecord] {
        self.records.as_slice()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
