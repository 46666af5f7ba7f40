//! CRDT-backed post synchronization.
//!
//! This module keeps a locally edited [`Post`] in sync with a
//! [`SharedPostDoc`], a convergent replicated document any number of
//! collaborators may mutate concurrently. Data flows in a loop: a local edit
//! becomes a [`PostChanges`] changeset projected onto the shared document
//! ([`SharedPostDoc::project`]); transports broadcast the resulting update
//! payloads; whenever the shared document changes, locally or remotely,
//! [`SharedPostDoc::extract`] computes a [`PostDiff`] against the last-known
//! local record for the application to dispatch into its own state.
//!
//! The policy registry keeps both directions symmetric: the same
//! allowed-fields set, disallowed meta keys and per-field special cases are
//! consulted on the way out and on the way in, so a change never loops back
//! into itself and field invariants (floating date, placeholder title) hold
//! under concurrent, out-of-order mutation.

mod blocks;
mod extract;
mod memory_storage;
mod policy;
mod project;
mod shared_doc;
mod storage;
mod types;

pub use memory_storage::MemoryStorage;
pub use policy::{
    AUTO_DRAFT_TITLE, CONTENT_PERSISTED_META_KEY, DISALLOWED_META_KEYS, FIELD_POLICIES,
    FieldPolicy, InboundContext, OutboundContext, PostField, blocks_changed, field_changed,
    is_syncable, is_syncable_meta_key, policy_for,
};
pub use project::SyncSession;
pub use shared_doc::SharedPostDoc;
pub use storage::{StorageResult, SyncStorage};
pub use types::{
    Block, BlockSelection, Post, PostChanges, PostDiff, PostStatus, RecordedUpdate, RenderedText,
    UpdateOrigin, serialize_blocks,
};
