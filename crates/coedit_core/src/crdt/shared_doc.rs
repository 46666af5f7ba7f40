//! Shared post document wrapping a yrs [`Doc`].
//!
//! # Structure
//!
//! The shared document exposes a single well-known Y.Map called "post"
//! holding the synced fields by key:
//!
//! ```text
//! Y.Doc
//! └── Y.Map "post"
//!     ├── "title" → "Hello"                       (plain last-writer-wins)
//!     ├── "status" → "draft"
//!     ├── "meta" → Y.Map { "footnotes" → [...] }
//!     └── "blocks" → Y.Array
//!         └── Y.Map { "name" → "core/paragraph",
//!                     "attributes" → Y.Map { "content" → Y.Text },
//!                     "children" → Y.Array [...] }
//! ```
//!
//! Scalar fields are plain values; `meta` is a nested map; `blocks` is a
//! sequence of block nodes whose string attributes are collaborative text.
//! Any replica may mutate any of them; convergence comes from the underlying
//! CRDT merge, not from this wrapper.
//!
//! # Synchronization
//!
//! Use [`encode_state_vector`](SharedPostDoc::encode_state_vector) and
//! [`encode_state_as_update`](SharedPostDoc::encode_state_as_update) /
//! [`encode_diff`](SharedPostDoc::encode_diff) for the sync handshake, and
//! [`apply_update`](SharedPostDoc::apply_update) to integrate remote changes.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, GetString, Map, MapPrelim, MapRef, Out, ReadTxn,
    StateVector, Transact, TransactionMut, Update,
};

use super::storage::{StorageResult, SyncStorage};
use super::types::{Block, UpdateOrigin};
use crate::error::CoeditError;

/// The name of the Y.Map containing the synced post fields.
const POST_MAP_NAME: &str = "post";

/// A shared, convergent replica of one post.
///
/// This wraps a yrs [`Doc`] and provides the two sync entry points
/// ([`project`](SharedPostDoc::project) and
/// [`extract`](SharedPostDoc::extract)) plus the update plumbing a transport
/// needs. It is an injected resource: construct one per post, hand it to
/// whoever needs it, and build a fresh one per test.
pub struct SharedPostDoc {
    /// The underlying yrs document
    doc: Doc,

    /// Reference to the record map (cached for efficiency)
    post_map: MapRef,

    /// Storage backend for the update log
    storage: Arc<dyn SyncStorage>,

    /// Document name for storage operations
    doc_name: String,
}

impl SharedPostDoc {
    /// Create a new empty shared post with the given storage backend.
    ///
    /// The document name identifies the post in storage (e.g. `"post:42"`).
    pub fn new(storage: Arc<dyn SyncStorage>, doc_name: impl Into<String>) -> Self {
        let doc = Doc::new();
        let post_map = doc.get_or_insert_map(POST_MAP_NAME);

        Self {
            doc,
            post_map,
            storage,
            doc_name: doc_name.into(),
        }
    }

    /// Load a shared post from storage, or create a new one if none exists.
    ///
    /// This replays the stored snapshot (if any) and every logged update to
    /// reconstruct the current state.
    pub fn load(storage: Arc<dyn SyncStorage>, doc_name: impl Into<String>) -> StorageResult<Self> {
        let doc_name = doc_name.into();
        let doc = Doc::new();

        {
            let mut txn = doc.transact_mut();

            if let Some(state) = storage.load_doc(&doc_name)? {
                let update = Update::decode_v1(&state).map_err(|e| {
                    CoeditError::Crdt(format!("Failed to decode stored state: {}", e))
                })?;
                txn.apply_update(update).map_err(|e| {
                    CoeditError::Crdt(format!("Failed to apply stored state: {}", e))
                })?;
            }

            for recorded in storage.all_updates(&doc_name)? {
                if let Ok(update) = Update::decode_v1(&recorded.data) {
                    let _ = txn.apply_update(update);
                }
            }
        }

        let post_map = doc.get_or_insert_map(POST_MAP_NAME);

        Ok(Self {
            doc,
            post_map,
            storage,
            doc_name,
        })
    }

    /// Get the underlying yrs document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Get the document name used for storage.
    pub fn doc_name(&self) -> &str {
        &self.doc_name
    }

    pub(crate) fn post_map(&self) -> &MapRef {
        &self.post_map
    }

    // ==================== Record Map Access ====================

    /// Read one field of the record map in JSON form.
    ///
    /// Returns `None` if the field has never been written.
    pub fn field(&self, key: &str) -> Option<Value> {
        let txn = self.doc.transact();
        self.post_map
            .get(&txn, key)
            .map(|out| out_to_value(&out, &txn))
    }

    /// Current shared title. A never-written title reads as empty.
    pub fn title(&self) -> String {
        self.field("title")
            .as_ref()
            .and_then(super::types::RenderedText::raw_of)
            .unwrap_or_default()
            .to_string()
    }

    /// Snapshot of the shared block sequence as plain data.
    pub fn blocks(&self) -> Vec<Block> {
        let txn = self.doc.transact();
        match self.post_map.get(&txn, "blocks") {
            Some(Out::YArray(seq)) => read_block_seq(&seq, &txn),
            _ => Vec::new(),
        }
    }

    /// Snapshot of the shared meta map, including bookkeeping keys.
    pub fn meta(&self) -> IndexMap<String, Value> {
        let txn = self.doc.transact();
        match self.post_map.get(&txn, "meta") {
            Some(Out::YMap(meta)) => meta
                .iter(&txn)
                .map(|(key, out)| (key.to_string(), out_to_value(&out, &txn)))
                .collect(),
            _ => IndexMap::new(),
        }
    }

    /// Record an incremental update in storage after a local mutation.
    ///
    /// `sv_before` is the state vector captured before the mutation. Updates
    /// that carry no inserts and no deletions are dropped, so re-applying
    /// already-present state appends nothing to the log.
    pub(crate) fn record_update(&self, sv_before: &StateVector) -> StorageResult<()> {
        let update = {
            let txn = self.doc.transact();
            txn.encode_state_as_update_v1(sv_before)
        };

        // An update with no structs and no delete set encodes as zero bytes only.
        if update.iter().any(|&byte| byte != 0) {
            self.storage
                .append_update(&self.doc_name, &update, UpdateOrigin::Local)?;
        }
        Ok(())
    }

    // ==================== Sync Operations ====================

    /// Encode the current state vector for the sync handshake.
    ///
    /// Send this to a remote peer; the peer uses it to compute which updates
    /// this replica is missing.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full document state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode only the updates a remote peer is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> StorageResult<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| CoeditError::Crdt(format!("Failed to decode state vector: {}", e)))?;

        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Apply an update produced by another replica.
    ///
    /// Returns the id of the persisted update record.
    pub fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> StorageResult<i64> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| CoeditError::Crdt(format!("Failed to decode update: {}", e)))?;

        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| CoeditError::Crdt(format!("Failed to apply update: {}", e)))?;
        }

        self.storage.append_update(&self.doc_name, update, origin)
    }

    // ==================== Persistence ====================

    /// Save the current document state as a snapshot in storage.
    pub fn save(&self) -> StorageResult<()> {
        let state = self.encode_state_as_update();
        self.storage.save_doc(&self.doc_name, &state)
    }

    // ==================== Observers ====================

    /// Subscribe to document updates.
    ///
    /// The callback receives the binary update payload of every mutation,
    /// local or remote; this is the broadcast hook for transports. The
    /// subscription unsubscribes when dropped.
    ///
    /// # Panics
    ///
    /// Panics if the document cannot register the observer.
    pub fn observe_updates<F>(&self, callback: F) -> yrs::Subscription
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |_txn, event| {
                callback(&event.update);
            })
            .expect("Failed to observe document updates")
    }
}

impl std::fmt::Debug for SharedPostDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPostDoc")
            .field("doc_name", &self.doc_name)
            .finish_non_exhaustive()
    }
}

// ==================== Container Guards ====================

/// Get the array under `key`, installing or resetting it as needed.
///
/// A wrong-typed existing entry is structural corruption: it is replaced with
/// a fresh empty sequence rather than coerced, so the corruption does not
/// propagate.
pub(crate) fn ensure_array(map: &MapRef, txn: &mut TransactionMut, key: &str) -> ArrayRef {
    match map.get(txn, key) {
        Some(Out::YArray(seq)) => seq,
        Some(_) => {
            log::warn!("shared entry '{}' is not a sequence; resetting it", key);
            map.insert(txn, key, ArrayPrelim::default())
        }
        None => map.insert(txn, key, ArrayPrelim::default()),
    }
}

/// Get the map under `key`, installing or resetting it as needed.
pub(crate) fn ensure_map(map: &MapRef, txn: &mut TransactionMut, key: &str) -> MapRef {
    match map.get(txn, key) {
        Some(Out::YMap(nested)) => nested,
        Some(_) => {
            log::warn!("shared entry '{}' is not a map; resetting it", key);
            map.insert(txn, key, MapPrelim::default())
        }
        None => map.insert(txn, key, MapPrelim::default()),
    }
}

// ==================== Value Conversion ====================

/// Convert a shared value (plain or container) to its JSON form.
pub(crate) fn out_to_value<T: ReadTxn>(out: &Out, txn: &T) -> Value {
    match out {
        Out::Any(any) => any_to_value(any),
        Out::YText(text) => Value::String(text.get_string(txn)),
        Out::YMap(map) => Value::Object(
            map.iter(txn)
                .map(|(key, item)| (key.to_string(), out_to_value(&item, txn)))
                .collect(),
        ),
        Out::YArray(seq) => Value::Array(seq.iter(txn).map(|item| out_to_value(&item, txn)).collect()),
        _ => Value::Null,
    }
}

/// Convert a plain yrs value to its JSON form.
pub(crate) fn any_to_value(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(flag) => Value::from(*flag),
        Any::Number(number) => serde_json::Number::from_f64(*number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Any::BigInt(number) => Value::from(*number),
        Any::String(text) => Value::String(text.to_string()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_value).collect()),
        Any::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), any_to_value(item)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

/// Convert a JSON value to a plain yrs value.
pub(crate) fn value_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(flag) => Any::Bool(*flag),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Any::BigInt(integer)
            } else {
                Any::Number(number.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(text) => Any::String(text.as_str().into()),
        Value::Array(items) => Any::Array(items.iter().map(value_to_any).collect::<Vec<_>>().into()),
        Value::Object(entries) => Any::Map(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), value_to_any(item)))
                .collect::<HashMap<_, _>>()
                .into(),
        ),
    }
}

// ==================== Block Reads ====================

/// Read a shared block sequence as plain data.
///
/// Malformed nodes (anything that is not a map with a string name) are
/// skipped; the reconciler replaces them on the next projection.
pub(crate) fn read_block_seq<T: ReadTxn>(seq: &ArrayRef, txn: &T) -> Vec<Block> {
    seq.iter(txn)
        .filter_map(|item| read_block_node(&item, txn))
        .collect()
}

fn read_block_node<T: ReadTxn>(out: &Out, txn: &T) -> Option<Block> {
    let Out::YMap(node) = out else { return None };

    let name = match node.get(txn, "name") {
        Some(value) => out_to_value(&value, txn).as_str()?.to_string(),
        None => return None,
    };

    let attributes = match node.get(txn, "attributes") {
        Some(Out::YMap(attrs)) => attrs
            .iter(txn)
            .map(|(key, item)| (key.to_string(), out_to_value(&item, txn)))
            .collect(),
        _ => IndexMap::new(),
    };

    let children = match node.get(txn, "children") {
        Some(Out::YArray(nested)) => read_block_seq(&nested, txn),
        _ => Vec::new(),
    };

    Some(Block {
        name,
        attributes,
        children,
    })
}
