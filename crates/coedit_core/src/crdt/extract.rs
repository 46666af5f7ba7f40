//! Inbound extraction: shared document → local diff.
//!
//! [`SharedPostDoc::extract`] walks the allowed-fields set, reads each
//! field's shared value, applies the inbound skip predicates and deep
//! equality, and returns only what meaningfully changed. Applying the
//! resulting diff to the local record and extracting again yields nothing,
//! which is what keeps the edit loop from feeding changes back into itself.

use yrs::{Map, Out, ReadTxn, Transact};

use super::policy::{self, CONTENT_PERSISTED_META_KEY, FieldPolicy, InboundContext, PostField};
use super::shared_doc::{SharedPostDoc, out_to_value, read_block_seq};
use super::types::{Post, PostDiff};

impl SharedPostDoc {
    /// Compute the minimal diff between the shared document and `local`.
    ///
    /// Fields the shared document has never carried are absent from the
    /// diff; so are fields whose shared value equals the local one, fields
    /// the policy registry skips (floating date, placeholder status), and
    /// everything outside the allowed set. The `meta` entry, when present,
    /// is already merged with the local meta so local-only keys survive a
    /// full field replacement.
    pub fn extract(&self, local: &Post) -> PostDiff {
        let txn = self.doc().transact();
        let mut diff = PostDiff::default();

        for policy in policy::FIELD_POLICIES {
            match policy.field {
                PostField::Blocks => self.extract_blocks(&txn, local, &mut diff),
                PostField::Meta => self.extract_meta(&txn, local, &mut diff),
                _ => self.extract_scalar(&txn, policy, local, &mut diff),
            }
        }

        diff
    }

    fn extract_scalar<T: ReadTxn>(
        &self,
        txn: &T,
        policy: &FieldPolicy,
        local: &Post,
        diff: &mut PostDiff,
    ) {
        let Some(out) = self.post_map().get(txn, policy.key) else {
            return;
        };
        let shared = out_to_value(&out, txn);

        let ctx = InboundContext {
            shared_value: &shared,
            local,
        };
        if policy.skip_inbound(&ctx) {
            return;
        }

        let local_value = local.field_value(policy.field);
        if policy::field_changed(policy.field, &shared, local_value.as_ref()) {
            diff.insert(policy.key, shared);
        }
    }

    fn extract_blocks<T: ReadTxn>(&self, txn: &T, local: &Post, diff: &mut PostDiff) {
        let Some(Out::YArray(seq)) = self.post_map().get(txn, PostField::Blocks.key()) else {
            return;
        };
        let shared_blocks = read_block_seq(&seq, txn);

        if policy::blocks_changed(&shared_blocks, local, self.content_persisted(txn))
            && let Ok(value) = serde_json::to_value(&shared_blocks)
        {
            diff.insert(PostField::Blocks.key(), value);
        }
    }

    fn extract_meta<T: ReadTxn>(&self, txn: &T, local: &Post, diff: &mut PostDiff) {
        let Some(Out::YMap(meta)) = self.post_map().get(txn, PostField::Meta.key()) else {
            return;
        };

        // Merge with the current local meta so locally-known but unsynced
        // keys survive; the diff value is a safe full replacement.
        let mut merged = local.meta.clone();
        for (key, out) in meta.iter(txn) {
            let key = key.to_string();
            if !policy::is_syncable_meta_key(&key) {
                continue;
            }
            merged.insert(key, out_to_value(&out, txn));
        }

        if merged != local.meta
            && let Ok(value) = serde_json::to_value(&merged)
        {
            diff.insert(PostField::Meta.key(), value);
        }
    }

    /// Whether the shared document carries the persisted-content marker.
    fn content_persisted<T: ReadTxn>(&self, txn: &T) -> bool {
        let Some(Out::YMap(meta)) = self.post_map().get(txn, PostField::Meta.key()) else {
            return false;
        };
        meta.get(txn, CONTENT_PERSISTED_META_KEY)
            .is_some_and(|out| policy::marker_set(&out_to_value(&out, txn)))
    }
}
