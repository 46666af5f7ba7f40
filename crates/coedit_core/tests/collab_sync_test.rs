//! Integration tests for bidirectional post synchronization.
//!
//! These exercise the full loop (project local edits, exchange update
//! payloads between replicas, extract diffs back into local records) the
//! way an embedding editor and its transport would drive it.

use std::sync::Arc;

use coedit_core::crdt::{
    Block, BlockSelection, MemoryStorage, Post, PostChanges, PostStatus, SharedPostDoc,
    SyncSession, SyncStorage, UpdateOrigin,
};
use serde_json::json;

fn new_shared(name: &str) -> SharedPostDoc {
    let storage: Arc<dyn SyncStorage> = Arc::new(MemoryStorage::new());
    SharedPostDoc::new(storage, name)
}

fn paragraph(text: &str) -> Block {
    Block::new("core/paragraph").with_attribute("content", text)
}

/// Exchange full states both ways until both replicas have seen everything.
fn sync_pair(doc1: &SharedPostDoc, doc2: &SharedPostDoc) {
    let update1 = doc1.encode_state_as_update();
    doc2.apply_update(&update1, UpdateOrigin::Remote).unwrap();

    let update2 = doc2.encode_state_as_update();
    doc1.apply_update(&update2, UpdateOrigin::Remote).unwrap();
}

#[test]
fn test_title_edit_round_trip() {
    let shared = new_shared("post:1");
    let mut session = SyncSession::new();

    // Local edit → shared document.
    shared
        .project(&PostChanges::new().set("title", "New Title"), &mut session)
        .unwrap();

    // Shared document → diff against the stale local record.
    let mut local = Post {
        title: "Old".into(),
        ..Default::default()
    };
    let diff = shared.extract(&local);
    assert_eq!(diff.get("title"), Some(&json!("New Title")));

    // Applying the diff reaches the clean state: nothing further to sync.
    diff.apply_to(&mut local);
    assert_eq!(local.title.raw(), "New Title");
    assert!(shared.extract(&local).is_empty());
}

#[test]
fn test_projecting_extracted_state_is_a_noop() {
    let storage = Arc::new(MemoryStorage::new());
    let shared = SharedPostDoc::new(storage.clone(), "post:1");
    let mut session = SyncSession::new();

    let blocks = vec![paragraph("Body"), Block::new("core/separator")];
    shared
        .project(
            &PostChanges::new()
                .set("title", "Stable")
                .set("slug", "stable")
                .set("meta", json!({"a": 1}))
                .set_blocks(&blocks),
            &mut session,
        )
        .unwrap();

    let local = Post::default();
    let diff = shared.extract(&local);
    assert!(!diff.is_empty());

    // Re-projecting what the shared document already holds generates no
    // operations: the update log does not grow.
    let log_len = storage.latest_update_id("post:1").unwrap();
    shared.project(&diff.as_changes(), &mut session).unwrap();
    assert_eq!(storage.latest_update_id("post:1").unwrap(), log_len);

    // And a record that applied the diff has nothing left to pull.
    let mut applied = Post::default();
    diff.apply_to(&mut applied);
    assert!(shared.extract(&applied).is_empty());
}

#[test]
fn test_policy_closure() {
    let shared = new_shared("post:1");
    let mut session = SyncSession::new();

    shared
        .project(
            &PostChanges::new()
                .set("title", "Allowed")
                .set("content", "local-only")
                .set("selection_color", "teal")
                .set("meta", json!({"a": 1, "_content_persisted": true})),
            &mut session,
        )
        .unwrap();

    assert_eq!(shared.field("title"), Some(json!("Allowed")));
    assert_eq!(shared.field("content"), None);
    assert_eq!(shared.field("selection_color"), None);

    let meta = shared.meta();
    assert_eq!(meta.get("a"), Some(&json!(1)));
    assert!(!meta.contains_key("_content_persisted"));
}

#[test]
fn test_floating_date_non_regression() {
    let shared = new_shared("post:1");
    let mut session = SyncSession::new();

    shared
        .project(
            &PostChanges::new().set("date", "2025-03-03T12:00:00Z"),
            &mut session,
        )
        .unwrap();

    let local = Post {
        status: PostStatus::Draft,
        date: None,
        modified: Some("2025-01-01T00:00:00Z".parse().unwrap()),
        ..Default::default()
    };
    assert!(!shared.extract(&local).contains("date"));
}

#[test]
fn test_auto_draft_title_suppression() {
    let shared = new_shared("post:1");
    let mut session = SyncSession::new();

    shared
        .project(&PostChanges::new().set("title", "Auto Draft"), &mut session)
        .unwrap();

    assert_eq!(shared.title(), "");
}

#[test]
fn test_meta_merge_preservation() {
    let shared = new_shared("post:1");
    let mut session = SyncSession::new();

    shared
        .project(&PostChanges::new().set("meta", json!({"a": 9})), &mut session)
        .unwrap();

    let local = Post {
        meta: [("a".to_string(), json!(1)), ("b".to_string(), json!(2))]
            .into_iter()
            .collect(),
        ..Default::default()
    };

    let diff = shared.extract(&local);
    assert_eq!(diff.get("meta"), Some(&json!({"a": 9, "b": 2})));
}

#[test]
fn test_block_reconciliation_round_trip() {
    let shared = new_shared("post:1");
    let mut session = SyncSession::new();

    let blocks = vec![paragraph("Test")];
    shared
        .project(&PostChanges::new().set_blocks(&blocks), &mut session)
        .unwrap();

    assert_eq!(shared.blocks(), blocks);
}

#[test]
fn test_concurrent_field_edits_converge() {
    let doc1 = new_shared("post:1");
    let doc2 = new_shared("post:1");
    let mut session1 = SyncSession::new();
    let mut session2 = SyncSession::new();

    doc1.project(&PostChanges::new().set("title", "From one"), &mut session1)
        .unwrap();
    doc2.project(&PostChanges::new().set("slug", "from-two"), &mut session2)
        .unwrap();

    sync_pair(&doc1, &doc2);

    assert_eq!(doc1.field("title"), doc2.field("title"));
    assert_eq!(doc1.field("slug"), doc2.field("slug"));
    assert_eq!(doc1.field("title"), Some(json!("From one")));
    assert_eq!(doc1.field("slug"), Some(json!("from-two")));

    // Both replicas pull the other's edit into their local records and reach
    // the clean state.
    let mut local = Post::default();
    let diff = doc1.extract(&local);
    diff.apply_to(&mut local);
    assert!(doc1.extract(&local).is_empty());
    assert!(doc2.extract(&local).is_empty());
}

#[test]
fn test_concurrent_block_insertions_both_survive() {
    let doc1 = new_shared("post:1");
    let doc2 = new_shared("post:1");
    let mut session1 = SyncSession::new();
    let mut session2 = SyncSession::new();

    // Start from one synced paragraph.
    doc1.project(
        &PostChanges::new().set_blocks(&[paragraph("Shared")]),
        &mut session1,
    )
    .unwrap();
    sync_pair(&doc1, &doc2);

    // Each replica appends a different block while offline.
    doc1.project(
        &PostChanges::new().set_blocks(&[paragraph("Shared"), paragraph("From one")]),
        &mut session1,
    )
    .unwrap();
    doc2.project(
        &PostChanges::new().set_blocks(&[paragraph("Shared"), paragraph("From two")]),
        &mut session2,
    )
    .unwrap();

    sync_pair(&doc1, &doc2);

    let blocks1 = doc1.blocks();
    let blocks2 = doc2.blocks();
    assert_eq!(blocks1, blocks2);
    assert_eq!(blocks1.len(), 3);

    let contents: Vec<_> = blocks1
        .iter()
        .map(|block| block.attributes["content"].clone())
        .collect();
    assert!(contents.contains(&json!("Shared")));
    assert!(contents.contains(&json!("From one")));
    assert!(contents.contains(&json!("From two")));
}

#[test]
fn test_concurrent_text_edits_to_disjoint_regions() {
    let doc1 = new_shared("post:1");
    let doc2 = new_shared("post:1");
    let mut session1 = SyncSession::new();
    let mut session2 = SyncSession::new();

    doc1.project(
        &PostChanges::new().set_blocks(&[paragraph("Hello World")]),
        &mut session1,
    )
    .unwrap();
    sync_pair(&doc1, &doc2);

    // One replica edits the middle, the other the end, with selections
    // reported ahead of the edits the way editors do.
    doc1.project(
        &PostChanges::new().with_selection(BlockSelection::new(vec![0], "content", 6)),
        &mut session1,
    )
    .unwrap();
    doc1.project(
        &PostChanges::new().set_blocks(&[paragraph("Hello Brave World")]),
        &mut session1,
    )
    .unwrap();

    doc2.project(
        &PostChanges::new().with_selection(BlockSelection::new(vec![0], "content", 12)),
        &mut session2,
    )
    .unwrap();
    doc2.project(
        &PostChanges::new().set_blocks(&[paragraph("Hello World!")]),
        &mut session2,
    )
    .unwrap();

    sync_pair(&doc1, &doc2);

    let blocks1 = doc1.blocks();
    assert_eq!(blocks1, doc2.blocks());

    let merged = blocks1[0].attributes["content"].as_str().unwrap().to_string();
    assert!(merged.contains("Brave"), "merged text: {}", merged);
    assert!(merged.ends_with('!'), "merged text: {}", merged);
}

#[test]
fn test_remote_updates_trigger_extraction_loop() {
    let doc1 = new_shared("post:1");
    let doc2 = new_shared("post:1");
    let mut session1 = SyncSession::new();

    // A transport would forward observed payloads; collect them by hand.
    use std::sync::Mutex;
    let outbox: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let outbox_clone = Arc::clone(&outbox);
    let _sub = doc1.observe_updates(move |update| {
        outbox_clone.lock().unwrap().push(update.to_vec());
    });

    doc1.project(
        &PostChanges::new().set("title", "Observed").set("sticky", true),
        &mut session1,
    )
    .unwrap();

    for payload in outbox.lock().unwrap().iter() {
        doc2.apply_update(payload, UpdateOrigin::Remote).unwrap();
    }

    let mut local = Post::default();
    let diff = doc2.extract(&local);
    assert_eq!(diff.get("title"), Some(&json!("Observed")));
    assert_eq!(diff.get("sticky"), Some(&json!(true)));

    diff.apply_to(&mut local);
    assert_eq!(local.sticky, Some(true));
    assert!(doc2.extract(&local).is_empty());
}

#[test]
fn test_state_survives_storage_reload() {
    let storage = Arc::new(MemoryStorage::new());

    {
        let shared = SharedPostDoc::new(storage.clone(), "post:1");
        let mut session = SyncSession::new();
        shared
            .project(
                &PostChanges::new()
                    .set("title", "Persisted")
                    .set_blocks(&[paragraph("Body")]),
                &mut session,
            )
            .unwrap();
        shared.save().unwrap();
    }

    let restored = SharedPostDoc::load(storage, "post:1").unwrap();
    assert_eq!(restored.field("title"), Some(json!("Persisted")));
    assert_eq!(restored.blocks(), vec![paragraph("Body")]);
}
