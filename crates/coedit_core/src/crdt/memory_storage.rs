//! In-memory storage implementation.
//!
//! A simple [`SyncStorage`] backend holding everything in process memory.
//! Used by tests and by embedders that persist sync state through their own
//! channels.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use super::storage::{StorageResult, SyncStorage};
use super::types::{RecordedUpdate, UpdateOrigin};

/// In-memory storage backend.
///
/// Thread-safe via `RwLock`; all data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    /// Document snapshots (name -> binary state)
    docs: RwLock<HashMap<String, Vec<u8>>>,

    /// Update logs (name -> ordered updates)
    updates: RwLock<HashMap<String, Vec<RecordedUpdate>>>,

    /// Monotonic update id counter
    next_id: AtomicI64,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStorage for MemoryStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let docs = self.docs.read().unwrap();
        Ok(docs.get(name).cloned())
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        let mut docs = self.docs.write().unwrap();
        docs.insert(name.to_string(), state.to_vec());
        Ok(())
    }

    fn delete_doc(&self, name: &str) -> StorageResult<()> {
        self.docs.write().unwrap().remove(name);
        self.updates.write().unwrap().remove(name);
        Ok(())
    }

    fn append_update(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
    ) -> StorageResult<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let recorded = RecordedUpdate {
            id,
            doc_name: name.to_string(),
            data: update.to_vec(),
            recorded_at: chrono::Utc::now().timestamp_millis(),
            origin,
        };

        let mut updates = self.updates.write().unwrap();
        updates.entry(name.to_string()).or_default().push(recorded);

        Ok(id)
    }

    fn updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<RecordedUpdate>> {
        let updates = self.updates.read().unwrap();
        Ok(updates
            .get(name)
            .map(|log| {
                log.iter()
                    .filter(|update| update.id > since_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn latest_update_id(&self, name: &str) -> StorageResult<i64> {
        let updates = self.updates.read().unwrap();
        Ok(updates
            .get(name)
            .and_then(|log| log.last())
            .map(|update| update.id)
            .unwrap_or(0))
    }
}
