//! Outbound projection: local edits → shared document.
//!
//! [`SharedPostDoc::project`] applies a changeset field by field, consulting
//! the policy registry for the allowed set and the special cases, and writing
//! only values that actually differ so re-projecting already-applied state
//! produces no operations at all.

use serde_json::Value;
use yrs::{Map, ReadTxn, Transact, TransactionMut};

use super::blocks::merge_blocks;
use super::policy::{self, FieldPolicy, OutboundContext, PostField};
use super::shared_doc::{SharedPostDoc, ensure_array, ensure_map, out_to_value, value_to_any};
use super::storage::StorageResult;
use super::types::{Block, BlockSelection, PostChanges, RenderedText};

/// Caller-owned outbound context carried between projections.
///
/// Holds the last selection the editor reported; the next blocks
/// reconciliation consults it to anchor text splices at the caret. Owned by
/// the caller, one session per editing surface; nothing ambient.
#[derive(Debug, Clone, Default)]
pub struct SyncSession {
    last_selection: Option<BlockSelection>,
}

impl SyncSession {
    /// Create a session with no recorded selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// The selection recorded by the most recent projection, if any.
    pub fn last_selection(&self) -> Option<&BlockSelection> {
        self.last_selection.as_ref()
    }
}

impl SharedPostDoc {
    /// Project a changeset onto the shared document.
    ///
    /// Fields outside the allowed set, and fields the policy registry skips,
    /// are dropped silently. Scalar fields are written only when they differ
    /// from the current shared value; `blocks` is reconciled in place;
    /// `meta` is merged per key with the disallowed-key filter. Container
    /// fields are initialized lazily, and a wrong-typed existing container is
    /// reset rather than coerced.
    ///
    /// The resulting incremental update (if any) is appended to storage with
    /// [`UpdateOrigin::Local`](super::UpdateOrigin::Local) and surfaced to
    /// update observers.
    ///
    /// # Errors
    ///
    /// Returns an error only if the update fails to persist to storage;
    /// policy violations and malformed values never abort the projection.
    pub fn project(
        &self,
        changes: &PostChanges,
        session: &mut SyncSession,
    ) -> StorageResult<()> {
        let sv_before = {
            let txn = self.doc().transact();
            txn.state_vector()
        };

        {
            let mut txn = self.doc().transact_mut();
            for (field, value) in &changes.fields {
                let Some(policy) = policy::policy_for(field) else {
                    // Not in the allowed set: local-only fields never leak.
                    continue;
                };
                match policy.field {
                    PostField::Blocks => self.project_blocks(&mut txn, value, session),
                    PostField::Meta => self.project_meta(&mut txn, value),
                    _ => self.project_scalar(&mut txn, policy, value),
                }
            }
        }

        if changes.selection.is_some() {
            session.last_selection = changes.selection.clone();
        }

        self.record_update(&sv_before)
    }

    fn project_scalar(&self, txn: &mut TransactionMut, policy: &FieldPolicy, value: &Value) {
        let current = self
            .post_map()
            .get(txn, policy.key)
            .map(|out| out_to_value(&out, txn));

        let ctx = OutboundContext {
            new_value: value,
            shared_value: current.as_ref(),
        };
        if policy.skip_outbound(&ctx) {
            return;
        }

        // Title and excerpt store only the raw half; a value of neither
        // supported shape extracts as absent and is dropped.
        let value = match policy.field {
            PostField::Title | PostField::Excerpt => match RenderedText::raw_of(value) {
                Some(raw) => Value::String(raw.to_string()),
                None => return,
            },
            _ => value.clone(),
        };

        if current.as_ref() == Some(&value) {
            return;
        }
        self.post_map()
            .insert(txn, policy.key, value_to_any(&value));
    }

    fn project_blocks(&self, txn: &mut TransactionMut, value: &Value, session: &SyncSession) {
        let Ok(blocks) = serde_json::from_value::<Vec<Block>>(value.clone()) else {
            log::warn!("ignoring blocks changeset that is not a block list");
            return;
        };

        let seq = ensure_array(self.post_map(), txn, PostField::Blocks.key());
        merge_blocks(txn, &seq, &blocks, session.last_selection.as_ref());
    }

    fn project_meta(&self, txn: &mut TransactionMut, value: &Value) {
        let Some(entries) = value.as_object() else {
            log::warn!("ignoring meta changeset that is not a map");
            return;
        };

        // Lazy container: nothing is installed until a key actually syncs.
        if !entries.keys().any(|key| policy::is_syncable_meta_key(key)) {
            return;
        }
        let meta = ensure_map(self.post_map(), txn, PostField::Meta.key());

        for (key, value) in entries {
            if !policy::is_syncable_meta_key(key) {
                continue;
            }
            let current = meta.get(txn, key).map(|out| out_to_value(&out, txn));
            if current.as_ref() == Some(value) {
                continue;
            }
            meta.insert(txn, key.as_str(), value_to_any(value));
        }
    }
}
