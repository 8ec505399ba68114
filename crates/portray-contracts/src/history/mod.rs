pub mod records;
pub mod store;

pub use records::{HistoryStore, ProcessedImageRecord};
pub use store::{FileStore, HistoryAdapter, KeyValueStore, MemoryStore, HISTORY_KEY};
