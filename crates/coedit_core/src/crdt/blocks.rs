//! Ordered block sequence reconciliation.
//!
//! Merges a locally ordered block list into the shared Y.Array of block
//! nodes. The reconciler never replaces the sequence wholesale: matched nodes
//! are updated in place so their CRDT identity survives, which is what lets a
//! collaborator's concurrent insertions and text edits keep their anchors
//! instead of being erased. Only nodes the local list superseded are deleted,
//! and only genuinely new blocks are inserted.
//!
//! String-valued attributes live in nested Y.Text containers and are updated
//! with a minimal splice rather than a whole-value replacement, so concurrent
//! edits to disjoint regions of the same text both survive the merge. A
//! selection hint pins ambiguous splices to the caret.

use serde_json::Value;
use yrs::{
    Array, ArrayPrelim, ArrayRef, GetString, Map, MapPrelim, MapRef, Out, ReadTxn, Text,
    TextPrelim, TextRef, TransactionMut,
};

use super::shared_doc::{ensure_array, ensure_map, out_to_value, value_to_any};
use super::types::{Block, BlockSelection};

const NAME_KEY: &str = "name";
const ATTRIBUTES_KEY: &str = "attributes";
const CHILDREN_KEY: &str = "children";

/// Merge `local` into the shared block sequence in place.
///
/// `selection`, when present, identifies an in-progress edit inside one
/// block's text attribute; the splice for that attribute is anchored at the
/// caret offset.
pub(crate) fn merge_blocks(
    txn: &mut TransactionMut,
    shared: &ArrayRef,
    local: &[Block],
    selection: Option<&BlockSelection>,
) {
    let mut path = Vec::new();
    merge_level(txn, shared, local, selection, &mut path);
}

/// Merge one nesting level, recursing into children of matched nodes.
///
/// `path` is the index path of the level currently being merged (empty at the
/// top level); it tracks the local tree so selection hints can be matched.
fn merge_level(
    txn: &mut TransactionMut,
    seq: &ArrayRef,
    local: &[Block],
    selection: Option<&BlockSelection>,
    path: &mut Vec<usize>,
) {
    let shared_names: Vec<Option<String>> = {
        let txn_ref: &TransactionMut = txn;
        seq.iter(txn_ref)
            .map(|item| node_name(&item, txn_ref))
            .collect()
    };

    let matches = align(&shared_names, local);

    // `cursor` tracks the write position in the live sequence while `si`/`li`
    // walk the original shared snapshot and the local list.
    let mut cursor: u32 = 0;
    let mut si = 0;
    let mut li = 0;

    for (shared_index, local_index) in matches {
        if shared_index > si {
            // Shared nodes before the next match are superseded by the local
            // ordering.
            seq.remove_range(txn, cursor, (shared_index - si) as u32);
            si = shared_index;
        }
        while li < local_index {
            insert_block(txn, seq, cursor, &local[li]);
            cursor += 1;
            li += 1;
        }

        path.push(local_index);
        update_block(txn, seq, cursor, &local[local_index], selection, path);
        path.pop();

        cursor += 1;
        si += 1;
        li += 1;
    }

    if si < shared_names.len() {
        seq.remove_range(txn, cursor, (shared_names.len() - si) as u32);
    }
    while li < local.len() {
        insert_block(txn, seq, cursor, &local[li]);
        cursor += 1;
        li += 1;
    }
}

/// Map local block indices to their most plausible shared counterparts.
///
/// Longest common subsequence over block names: the largest set of
/// position-respecting pairs whose names agree. Everything outside the
/// alignment becomes a deletion or an insertion. Malformed shared entries
/// have no name and never align, so they are always replaced.
fn align(shared_names: &[Option<String>], local: &[Block]) -> Vec<(usize, usize)> {
    let n = shared_names.len();
    let m = local.len();

    let matches = |i: usize, j: usize| shared_names[i].as_deref() == Some(local[j].name.as_str());

    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if matches(i, j) {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if matches(i, j) && lcs[i][j] == lcs[i + 1][j + 1] + 1 {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

fn node_name<T: ReadTxn>(out: &Out, txn: &T) -> Option<String> {
    let Out::YMap(node) = out else { return None };
    node.get(txn, NAME_KEY)
        .and_then(|value| out_to_value(&value, txn).as_str().map(str::to_string))
}

/// Update an aligned node in place: attributes per key, children recursively.
fn update_block(
    txn: &mut TransactionMut,
    seq: &ArrayRef,
    index: u32,
    block: &Block,
    selection: Option<&BlockSelection>,
    path: &mut Vec<usize>,
) {
    let Some(Out::YMap(node)) = seq.get(txn, index) else {
        return;
    };

    sync_attributes(txn, &node, block, selection, path);

    let children = ensure_array(&node, txn, CHILDREN_KEY);
    merge_level(txn, &children, &block.children, selection, path);
}

fn sync_attributes(
    txn: &mut TransactionMut,
    node: &MapRef,
    block: &Block,
    selection: Option<&BlockSelection>,
    path: &[usize],
) {
    let attrs = ensure_map(node, txn, ATTRIBUTES_KEY);

    let stale: Vec<String> = {
        let txn_ref: &TransactionMut = txn;
        attrs
            .keys(txn_ref)
            .map(String::from)
            .filter(|key| !block.attributes.contains_key(key))
            .collect()
    };
    for key in stale {
        attrs.remove(txn, &key);
    }

    for (key, value) in &block.attributes {
        match value {
            Value::String(text) => {
                let cursor = cursor_hint(selection, path, key);
                write_text_attribute(txn, &attrs, key, text, cursor);
            }
            other => {
                let current = attrs.get(txn, key).map(|out| out_to_value(&out, txn));
                if current.as_ref() != Some(other) {
                    attrs.insert(txn, key.as_str(), value_to_any(other));
                }
            }
        }
    }
}

/// The caret offset, if the selection addresses this block path and attribute.
fn cursor_hint(
    selection: Option<&BlockSelection>,
    path: &[usize],
    attribute: &str,
) -> Option<u32> {
    selection
        .filter(|sel| sel.path == path && sel.attribute == attribute)
        .map(|sel| sel.offset)
}

/// Splice `new` into the attribute's Y.Text with a minimal diff.
fn write_text_attribute(
    txn: &mut TransactionMut,
    attrs: &MapRef,
    key: &str,
    new: &str,
    cursor: Option<u32>,
) {
    let text: TextRef = match attrs.get(txn, key) {
        Some(Out::YText(text)) => text,
        // Absent, or a non-text leftover: start from an empty run and let the
        // splice below fill it.
        _ => attrs.insert(txn, key, TextPrelim::new("")),
    };

    let old = text.get_string(txn);
    if old == new {
        return;
    }

    let (at, remove, insert) = text_splice(&old, new, cursor);
    if remove > 0 {
        text.remove_range(txn, at, remove);
    }
    if !insert.is_empty() {
        text.insert(txn, at, &insert);
    }
}

/// Minimal splice turning `old` into `new`.
///
/// Returns `(index, removed_len, inserted_text)` in character units. The
/// common prefix is capped at the caret when a cursor is given: typing inside
/// a run of repeated characters must splice at the caret, not at the end of
/// the run, or concurrent edits land on the wrong side of each other.
fn text_splice(old: &str, new: &str, cursor: Option<u32>) -> (u32, u32, String) {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let mut prefix = old_chars
        .iter()
        .zip(new_chars.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if let Some(cursor) = cursor {
        prefix = prefix.min(cursor as usize);
    }

    let suffix = old_chars[prefix..]
        .iter()
        .rev()
        .zip(new_chars[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let remove = (old_chars.len() - prefix - suffix) as u32;
    let insert: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();
    (prefix as u32, remove, insert)
}

/// Insert a new block node (and its subtree) at `index`.
fn insert_block(txn: &mut TransactionMut, seq: &ArrayRef, index: u32, block: &Block) {
    let node: MapRef = seq.insert(txn, index, MapPrelim::default());
    node.insert(txn, NAME_KEY, block.name.clone());

    let attrs: MapRef = node.insert(txn, ATTRIBUTES_KEY, MapPrelim::default());
    for (key, value) in &block.attributes {
        match value {
            Value::String(text) => {
                attrs.insert(txn, key.as_str(), TextPrelim::new(text.as_str()));
            }
            other => {
                attrs.insert(txn, key.as_str(), value_to_any(other));
            }
        }
    }

    let children: ArrayRef = node.insert(txn, CHILDREN_KEY, ArrayPrelim::default());
    for (child_index, child) in block.children.iter().enumerate() {
        insert_block(txn, &children, child_index as u32, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::shared_doc::read_block_seq;
    use serde_json::json;
    use yrs::{Doc, Transact};

    fn block_seq(doc: &Doc) -> ArrayRef {
        let map = doc.get_or_insert_map("post");
        let mut txn = doc.transact_mut();
        ensure_array(&map, &mut txn, "blocks")
    }

    fn merge(doc: &Doc, seq: &ArrayRef, local: &[Block], selection: Option<&BlockSelection>) {
        let mut txn = doc.transact_mut();
        merge_blocks(&mut txn, seq, local, selection);
    }

    fn snapshot(doc: &Doc, seq: &ArrayRef) -> Vec<Block> {
        let txn = doc.transact();
        read_block_seq(seq, &txn)
    }

    fn paragraph(text: &str) -> Block {
        Block::new("core/paragraph").with_attribute("content", text)
    }

    #[test]
    fn test_merge_into_empty_sequence_round_trips() {
        let doc = Doc::new();
        let seq = block_seq(&doc);

        let local = vec![paragraph("Test")];
        merge(&doc, &seq, &local, None);

        assert_eq!(snapshot(&doc, &seq), local);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let doc = Doc::new();
        let seq = block_seq(&doc);

        let local = vec![
            paragraph("One"),
            Block::new("core/image").with_attribute("url", "a.png"),
        ];
        merge(&doc, &seq, &local, None);

        let sv = {
            let txn = doc.transact();
            txn.state_vector()
        };
        merge(&doc, &seq, &local, None);

        // Re-merging identical content produces no new operations.
        let txn = doc.transact();
        assert_eq!(txn.state_vector(), sv);
        drop(txn);
        assert_eq!(snapshot(&doc, &seq), local);
    }

    #[test]
    fn test_insert_in_middle() {
        let doc = Doc::new();
        let seq = block_seq(&doc);

        merge(&doc, &seq, &[paragraph("One"), paragraph("Three")], None);
        merge(
            &doc,
            &seq,
            &[
                paragraph("One"),
                Block::new("core/quote").with_attribute("citation", "Two"),
                paragraph("Three"),
            ],
            None,
        );

        let blocks = snapshot(&doc, &seq);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].name, "core/quote");
        assert_eq!(blocks[0].attributes["content"], json!("One"));
        assert_eq!(blocks[2].attributes["content"], json!("Three"));
    }

    #[test]
    fn test_delete_and_update() {
        let doc = Doc::new();
        let seq = block_seq(&doc);

        merge(
            &doc,
            &seq,
            &[paragraph("One"), paragraph("Two"), paragraph("Three")],
            None,
        );
        merge(&doc, &seq, &[paragraph("One"), paragraph("Three!")], None);

        let blocks = snapshot(&doc, &seq);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].attributes["content"], json!("One"));
        assert_eq!(blocks[1].attributes["content"], json!("Three!"));
    }

    #[test]
    fn test_update_in_place_preserves_concurrent_edits() {
        let doc1 = Doc::new();
        let doc2 = Doc::new();
        let seq1 = block_seq(&doc1);
        let seq2 = block_seq(&doc2);

        merge(&doc1, &seq1, &[paragraph("Hello")], None);
        sync(&doc1, &doc2);

        // Replica two edits the paragraph text; replica one appends a block
        // while leaving the paragraph untouched. Had replica one replaced the
        // sequence wholesale, the text edit would anchor to a dead node.
        merge(&doc2, &seq2, &[paragraph("Hello World")], None);
        merge(&doc1, &seq1, &[paragraph("Hello"), paragraph("New")], None);

        sync(&doc1, &doc2);
        sync(&doc2, &doc1);

        let blocks1 = snapshot(&doc1, &seq1);
        assert_eq!(blocks1, snapshot(&doc2, &seq2));
        assert_eq!(blocks1.len(), 2);
        assert_eq!(blocks1[0].attributes["content"], json!("Hello World"));
        assert_eq!(blocks1[1].attributes["content"], json!("New"));
    }

    #[test]
    fn test_attribute_removal_and_non_string_values() {
        let doc = Doc::new();
        let seq = block_seq(&doc);

        let first = vec![
            Block::new("core/image")
                .with_attribute("url", "a.png")
                .with_attribute("width", json!(320))
                .with_attribute("caption", "A"),
        ];
        merge(&doc, &seq, &first, None);

        let second = vec![
            Block::new("core/image")
                .with_attribute("url", "a.png")
                .with_attribute("width", json!(640)),
        ];
        merge(&doc, &seq, &second, None);

        let blocks = snapshot(&doc, &seq);
        assert_eq!(blocks[0].attributes["width"], json!(640));
        assert!(!blocks[0].attributes.contains_key("caption"));
    }

    #[test]
    fn test_children_recursion() {
        let doc = Doc::new();
        let seq = block_seq(&doc);

        let list = |items: &[&str]| {
            Block::new("core/list").with_children(
                items
                    .iter()
                    .map(|item| Block::new("core/list-item").with_attribute("content", *item))
                    .collect(),
            )
        };

        merge(&doc, &seq, &[list(&["a", "b"])], None);
        merge(&doc, &seq, &[list(&["a", "b", "c"])], None);

        let blocks = snapshot(&doc, &seq);
        assert_eq!(blocks[0].children.len(), 3);
        assert_eq!(blocks[0].children[2].attributes["content"], json!("c"));
    }

    #[test]
    fn test_text_splice_prefix_suffix() {
        assert_eq!(text_splice("Hello World", "Hello Brave World", None),
            (6, 0, "Brave ".to_string()));
        assert_eq!(text_splice("Hello World", "Hello", None), (5, 6, String::new()));
        assert_eq!(text_splice("abc", "axc", None), (1, 1, "x".to_string()));
        assert_eq!(text_splice("", "new", None), (0, 0, "new".to_string()));
    }

    #[test]
    fn test_text_splice_cursor_bias() {
        // Typing an "a" inside "aaa" is ambiguous; the caret decides.
        assert_eq!(text_splice("aaa", "aaaa", Some(1)), (1, 0, "a".to_string()));
        // Without a hint the splice lands at the end of the run.
        assert_eq!(text_splice("aaa", "aaaa", None), (3, 0, "a".to_string()));
        // A cursor beyond the natural prefix changes nothing.
        assert_eq!(text_splice("ab", "aXb", Some(2)), (1, 0, "X".to_string()));
    }

    #[test]
    fn test_selection_hint_reaches_nested_attribute() {
        let doc = Doc::new();
        let seq = block_seq(&doc);

        let nested = |text: &str| {
            Block::new("core/group")
                .with_children(vec![paragraph(text)])
        };

        merge(&doc, &seq, &[nested("aaa")], None);

        let selection = BlockSelection::new(vec![0, 0], "content", 1);
        merge(&doc, &seq, &[nested("aaaa")], Some(&selection));

        assert_eq!(
            snapshot(&doc, &seq)[0].children[0].attributes["content"],
            json!("aaaa")
        );
    }

    #[test]
    fn test_concurrent_insertions_survive() {
        let doc1 = Doc::new();
        let doc2 = Doc::new();
        let seq1 = block_seq(&doc1);
        let seq2 = block_seq(&doc2);

        // Both replicas start from the same synced state.
        merge(&doc1, &seq1, &[paragraph("Shared")], None);
        sync(&doc1, &doc2);

        // Each replica appends its own block.
        merge(&doc1, &seq1, &[paragraph("Shared"), paragraph("From one")], None);
        merge(&doc2, &seq2, &[paragraph("Shared"), paragraph("From two")], None);

        sync(&doc1, &doc2);
        sync(&doc2, &doc1);

        let blocks1 = snapshot(&doc1, &seq1);
        let blocks2 = snapshot(&doc2, &seq2);
        assert_eq!(blocks1, blocks2);
        assert_eq!(blocks1.len(), 3);

        let contents: Vec<&Value> = blocks1.iter().map(|b| &b.attributes["content"]).collect();
        assert!(contents.contains(&&json!("Shared")));
        assert!(contents.contains(&&json!("From one")));
        assert!(contents.contains(&&json!("From two")));
    }

    #[test]
    fn test_concurrent_text_edits_merge() {
        let doc1 = Doc::new();
        let doc2 = Doc::new();
        let seq1 = block_seq(&doc1);
        let seq2 = block_seq(&doc2);

        merge(&doc1, &seq1, &[paragraph("Hello World")], None);
        sync(&doc1, &doc2);

        // Disjoint edits to the same text run on both replicas.
        merge(&doc1, &seq1, &[paragraph("Hello Brave World")], None);
        merge(&doc2, &seq2, &[paragraph("Hello World!")], None);

        sync(&doc1, &doc2);
        sync(&doc2, &doc1);

        let blocks1 = snapshot(&doc1, &seq1);
        let blocks2 = snapshot(&doc2, &seq2);
        assert_eq!(blocks1, blocks2);

        let merged = blocks1[0].attributes["content"].as_str().unwrap();
        assert!(merged.contains("Brave"), "merged text: {}", merged);
        assert!(merged.contains('!'), "merged text: {}", merged);
    }

    fn sync(from: &Doc, to: &Doc) {
        use yrs::updates::decoder::Decode;

        let update = {
            let txn = from.transact();
            txn.encode_state_as_update_v1(&yrs::StateVector::default())
        };
        let mut txn = to.transact_mut();
        txn.apply_update(yrs::Update::decode_v1(&update).unwrap())
            .unwrap();
    }
}
