//! Storage abstraction for shared document persistence.
//!
//! The sync core persists two kinds of data per document: a compacted
//! snapshot of the full state, and an append-only log of incremental
//! updates tagged with their [`UpdateOrigin`]. The log is what transports
//! replay to late-joining peers and what embedders inspect for history;
//! the snapshot bounds replay time on load.

use super::types::{RecordedUpdate, UpdateOrigin};
use crate::error::CoeditError;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, CoeditError>;

/// Backend persisting shared document state and the update log.
///
/// Implementations must be thread-safe; one backend may serve documents
/// owned by different threads.
pub trait SyncStorage: Send + Sync {
    /// Load the full document state as a binary blob.
    ///
    /// Returns `None` if the document doesn't exist.
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Save the full document state, overwriting any existing snapshot.
    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()>;

    /// Delete a document and all its updates.
    fn delete_doc(&self, name: &str) -> StorageResult<()>;

    /// Append an incremental update to the update log.
    ///
    /// Returns the id of the newly created update record.
    fn append_update(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
    ) -> StorageResult<i64>;

    /// Get all updates for a document with an id greater than `since_id`.
    ///
    /// This is the sync primitive: a peer sends its last known update id and
    /// receives everything that happened since.
    fn updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<RecordedUpdate>>;

    /// Get all updates for a document.
    fn all_updates(&self, name: &str) -> StorageResult<Vec<RecordedUpdate>> {
        self.updates_since(name, 0)
    }

    /// Get the latest update id for a document.
    ///
    /// Returns 0 if no updates exist.
    fn latest_update_id(&self, name: &str) -> StorageResult<i64>;
}
