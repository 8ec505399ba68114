use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::events::{EventPayload, EventWriter};
use crate::history::records::{HistoryStore, ProcessedImageRecord};

pub const HISTORY_KEY: &str = "portray_history";

/// Injected string key-value capability. The browser original used
/// localStorage; here anything that can hold one string per key works.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str);
}

/// One file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// Mirrors the history list into a key-value store. The adapter never
/// initiates mutation; it only loads and saves whole snapshots.
///
/// History is a convenience cache, not a durability guarantee: corrupt data
/// loads as empty, failed saves are logged and swallowed.
pub struct HistoryAdapter {
    store: Box<dyn KeyValueStore>,
    events: EventWriter,
}

impl HistoryAdapter {
    pub fn new(store: Box<dyn KeyValueStore>, events: EventWriter) -> Self {
        Self { store, events }
    }

    pub fn load(&self) -> HistoryStore {
        let Some(raw) = self.store.get(HISTORY_KEY) else {
            return HistoryStore::new();
        };
        match serde_json::from_str::<Vec<ProcessedImageRecord>>(&raw) {
            Ok(records) => HistoryStore::from_records(records),
            Err(err) => {
                self.log("history_load_failed", err.to_string());
                HistoryStore::new()
            }
        }
    }

    pub fn save(&mut self, history: &HistoryStore) {
        let raw = match serde_json::to_string(history.records()) {
            Ok(raw) => raw,
            Err(err) => {
                self.log("history_save_failed", err.to_string());
                return;
            }
        };
        if let Err(err) = self.store.set(HISTORY_KEY, &raw) {
            self.log("history_save_failed", format!("{err:#}"));
        }
    }

    pub fn wipe(&mut self) {
        self.store.remove(HISTORY_KEY);
    }

    fn log(&self, event_type: &str, message: String) {
        let mut payload = EventPayload::new();
        payload.insert("error".to_string(), json!(message));
        payload.insert("key".to_string(), Value::String(HISTORY_KEY.to_string()));
        let _ = self.events.emit(event_type, payload);
    }
}
