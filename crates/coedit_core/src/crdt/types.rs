//! Core types for post synchronization.
//!
//! This module defines the local view of a post (the record the editor works
//! on), the changeset and diff shapes exchanged with the application, and the
//! bookkeeping types for the update log.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::policy::PostField;

/// Publication status of a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostStatus {
    /// Saved but not published.
    #[default]
    Draft,
    /// Awaiting review before publication.
    Pending,
    /// Publicly visible.
    Publish,
    /// Scheduled for a future date.
    Future,
    /// Visible to privileged users only.
    Private,
    /// Placeholder status for a post that has never been saved.
    AutoDraft,
    /// Moved to the trash.
    Trash,
}

impl PostStatus {
    /// Wire representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Pending => "pending",
            PostStatus::Publish => "publish",
            PostStatus::Future => "future",
            PostStatus::Private => "private",
            PostStatus::AutoDraft => "auto-draft",
            PostStatus::Trash => "trash",
        }
    }

    /// Whether this status precedes publication.
    ///
    /// Pre-publish posts have no meaningful date of their own yet; see
    /// [`Post::is_date_floating`].
    pub fn is_pre_publish(&self) -> bool {
        matches!(
            self,
            PostStatus::Draft | PostStatus::AutoDraft | PostStatus::Pending
        )
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "pending" => Ok(PostStatus::Pending),
            "publish" => Ok(PostStatus::Publish),
            "future" => Ok(PostStatus::Future),
            "private" => Ok(PostStatus::Private),
            "auto-draft" => Ok(PostStatus::AutoDraft),
            "trash" => Ok(PostStatus::Trash),
            _ => Err(format!("Unknown post status: {}", s)),
        }
    }
}

/// A text field that is either a plain raw string or a raw/rendered pair.
///
/// The rendered half is produced by the server and never participates in
/// synchronization or comparison; only the raw half does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RenderedText {
    /// A raw string with no rendered counterpart.
    Plain(String),
    /// A raw string together with its server-rendered form.
    Pair {
        /// The source text.
        raw: String,
        /// The rendered form, if the server produced one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rendered: Option<String>,
    },
}

impl RenderedText {
    /// The raw half of this value.
    pub fn raw(&self) -> &str {
        match self {
            RenderedText::Plain(raw) => raw,
            RenderedText::Pair { raw, .. } => raw,
        }
    }

    /// Extract the raw half from a JSON value of either shape.
    ///
    /// Returns `None` for values that are neither a string nor an object with
    /// a string `"raw"` entry; such values are treated as absent rather than
    /// an error.
    pub fn raw_of(value: &Value) -> Option<&str> {
        match value {
            Value::String(raw) => Some(raw),
            Value::Object(map) => map.get("raw").and_then(Value::as_str),
            _ => None,
        }
    }
}

impl Default for RenderedText {
    fn default() -> Self {
        RenderedText::Plain(String::new())
    }
}

impl From<&str> for RenderedText {
    fn from(raw: &str) -> Self {
        RenderedText::Plain(raw.to_string())
    }
}

impl From<String> for RenderedText {
    fn from(raw: String) -> Self {
        RenderedText::Plain(raw)
    }
}

/// One unit of structured content: a type name, attributes and nested children.
///
/// Identity is positional; blocks carry no stable id of their own. The shared
/// document keeps per-node CRDT identity across merges instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block type name (e.g. `"core/paragraph"`).
    pub name: String,

    /// Attribute values keyed by attribute name.
    #[serde(default)]
    pub attributes: IndexMap<String, Value>,

    /// Nested child blocks.
    #[serde(default)]
    pub children: Vec<Block>,
}

impl Block {
    /// Create a block with the given type name and no attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Replace the child list.
    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.children = children;
        self
    }
}

/// Serialize a block list to its canonical JSON form.
///
/// This is the form compared against a record's raw content when the shared
/// document carries the persisted-content marker.
pub fn serialize_blocks(blocks: &[Block]) -> String {
    serde_json::to_string(blocks).unwrap_or_default()
}

/// Caret position inside one block's text attribute.
///
/// `path` indexes into the block tree (one index per nesting level), and
/// `offset` is the caret's character position within the attribute text after
/// the edit. The block reconciler uses the hint to anchor text splices at the
/// caret when a minimal diff would otherwise be ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSelection {
    /// Index path to the block, one entry per nesting level.
    pub path: Vec<usize>,
    /// Name of the attribute being edited.
    pub attribute: String,
    /// Caret character offset within the attribute text.
    pub offset: u32,
}

impl BlockSelection {
    /// Create a selection hint.
    pub fn new(path: Vec<usize>, attribute: impl Into<String>, offset: u32) -> Self {
        Self {
            path,
            attribute: attribute.into(),
            offset,
        }
    }
}

/// The local, fully-resolved view of one post.
///
/// Owned exclusively by the application and mutated only through explicit
/// edit actions; the sync core reads it for inbound comparison and never
/// mutates it except through [`PostDiff::apply_to`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    /// Author user id.
    pub author: Option<i64>,

    /// Post title.
    pub title: RenderedText,

    /// Post excerpt.
    pub excerpt: RenderedText,

    /// Serialized block source, as last persisted. Local-only: never synced
    /// as a field, but consulted by the blocks inbound comparison when the
    /// shared document carries the persisted-content marker.
    pub content: Option<RenderedText>,

    /// URL slug. An empty slug means "derive one on save".
    pub slug: String,

    /// Publication status.
    pub status: PostStatus,

    /// Publication date, or `None` while unset.
    pub date: Option<DateTime<Utc>>,

    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,

    /// Whether comments are open (`"open"`/`"closed"`).
    pub comment_status: Option<String>,

    /// Whether pingbacks are open (`"open"`/`"closed"`).
    pub ping_status: Option<String>,

    /// Featured media attachment id.
    pub featured_media: Option<i64>,

    /// Post format.
    pub format: Option<String>,

    /// Whether the post is pinned.
    pub sticky: Option<bool>,

    /// Tag term ids.
    pub tags: Vec<i64>,

    /// Page template.
    pub template: Option<String>,

    /// Metadata entries keyed by meta key.
    pub meta: IndexMap<String, Value>,

    /// Ordered tree of content blocks.
    pub blocks: Vec<Block>,

    /// Current editor selection. Local-only.
    #[serde(skip)]
    pub selection: Option<BlockSelection>,
}

impl Post {
    /// Read one syncable field in its wire (JSON) form.
    ///
    /// Returns `None` when the field is unset locally.
    pub fn field_value(&self, field: PostField) -> Option<Value> {
        match field {
            PostField::Author => self.author.map(Value::from),
            PostField::Blocks => serde_json::to_value(&self.blocks).ok(),
            PostField::CommentStatus => self.comment_status.clone().map(Value::from),
            PostField::Date => self.date.and_then(|d| serde_json::to_value(d).ok()),
            PostField::Excerpt => serde_json::to_value(&self.excerpt).ok(),
            PostField::FeaturedMedia => self.featured_media.map(Value::from),
            PostField::Format => self.format.clone().map(Value::from),
            PostField::PingStatus => self.ping_status.clone().map(Value::from),
            PostField::Meta => serde_json::to_value(&self.meta).ok(),
            PostField::Slug => Some(Value::from(self.slug.clone())),
            PostField::Status => serde_json::to_value(self.status).ok(),
            PostField::Sticky => self.sticky.map(Value::from),
            PostField::Tags => serde_json::to_value(&self.tags).ok(),
            PostField::Template => self.template.clone().map(Value::from),
            PostField::Title => serde_json::to_value(&self.title).ok(),
        }
    }

    /// Whether the date is still floating.
    ///
    /// A floating date is not yet meaningfully set: the post is pre-publish
    /// and its date is null or equals the last modification time. A floating
    /// date must never be overwritten from the shared document.
    pub fn is_date_floating(&self) -> bool {
        self.status.is_pre_publish() && (self.date.is_none() || self.date == self.modified)
    }
}

/// A set of locally edited fields to be projected onto the shared document.
///
/// Field values are JSON values; anything an editor can hand over is
/// representable, and non-serializable payloads cannot occur by construction.
/// Names outside the allowed-fields set are dropped silently at projection
/// time.
#[derive(Debug, Clone, Default)]
pub struct PostChanges {
    /// Edited fields in edit order, keyed by field name.
    pub fields: IndexMap<String, Value>,

    /// Selection reported alongside the edit, if any.
    pub selection: Option<BlockSelection>,
}

impl PostChanges {
    /// Create an empty changeset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field edit.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Record a block list edit.
    pub fn set_blocks(self, blocks: &[Block]) -> Self {
        let value = serde_json::to_value(blocks).unwrap_or_default();
        self.set("blocks", value)
    }

    /// Attach the current selection.
    pub fn with_selection(mut self, selection: BlockSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Whether the changeset carries no field edits.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Minimal set of fields whose shared value differs from the local record.
///
/// Produced by [`SharedPostDoc::extract`](super::SharedPostDoc::extract); the
/// caller dispatches it into application state. Every value is safe to apply
/// as a full field replacement (the meta value is already merged with the
/// local meta).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostDiff {
    /// Changed fields keyed by field name.
    pub fields: IndexMap<String, Value>,
}

impl PostDiff {
    /// Whether no field changed.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Read one changed field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Whether the given field changed.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub(crate) fn insert(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    /// View this diff as a changeset, e.g. to re-project it.
    pub fn as_changes(&self) -> PostChanges {
        PostChanges {
            fields: self.fields.clone(),
            selection: None,
        }
    }

    /// Dispatch this diff into a local record.
    ///
    /// Unknown fields and values that fail to deserialize are skipped; the
    /// remaining fields are applied, so a partially malformed diff still
    /// updates what it can.
    pub fn apply_to(&self, post: &mut Post) {
        for (field, value) in &self.fields {
            match field.as_str() {
                "author" => post.author = value.as_i64(),
                "blocks" => {
                    if let Ok(blocks) = serde_json::from_value(value.clone()) {
                        post.blocks = blocks;
                    }
                }
                "comment_status" => post.comment_status = value.as_str().map(str::to_string),
                "date" => {
                    post.date = if value.is_null() {
                        None
                    } else {
                        serde_json::from_value(value.clone()).ok()
                    };
                }
                "excerpt" => {
                    if let Ok(excerpt) = serde_json::from_value(value.clone()) {
                        post.excerpt = excerpt;
                    }
                }
                "featured_media" => post.featured_media = value.as_i64(),
                "format" => post.format = value.as_str().map(str::to_string),
                "ping_status" => post.ping_status = value.as_str().map(str::to_string),
                "meta" => {
                    if let Ok(meta) = serde_json::from_value(value.clone()) {
                        post.meta = meta;
                    }
                }
                "slug" => {
                    if let Some(slug) = value.as_str() {
                        post.slug = slug.to_string();
                    }
                }
                "status" => {
                    if let Ok(status) = serde_json::from_value(value.clone()) {
                        post.status = status;
                    }
                }
                "sticky" => post.sticky = value.as_bool(),
                "tags" => {
                    if let Ok(tags) = serde_json::from_value(value.clone()) {
                        post.tags = tags;
                    }
                }
                "template" => post.template = value.as_str().map(str::to_string),
                "title" => {
                    if let Ok(title) = serde_json::from_value(value.clone()) {
                        post.title = title;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Origin of a CRDT update, used to distinguish local vs remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOrigin {
    /// Update originated from a local edit
    Local,

    /// Update received from a remote peer
    Remote,

    /// Update from an initial sync handshake
    Sync,
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOrigin::Local => write!(f, "local"),
            UpdateOrigin::Remote => write!(f, "remote"),
            UpdateOrigin::Sync => write!(f, "sync"),
        }
    }
}

impl std::str::FromStr for UpdateOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(UpdateOrigin::Local),
            "remote" => Ok(UpdateOrigin::Remote),
            "sync" => Ok(UpdateOrigin::Sync),
            _ => Err(format!("Unknown update origin: {}", s)),
        }
    }
}

/// One persisted incremental update of a shared document.
#[derive(Debug, Clone)]
pub struct RecordedUpdate {
    /// Unique identifier for this update
    pub id: i64,

    /// Name of the document this update belongs to
    pub doc_name: String,

    /// Binary yrs update data
    pub data: Vec<u8>,

    /// Unix timestamp when this update was recorded (milliseconds)
    pub recorded_at: i64,

    /// Origin of this update (local edit, remote peer, sync handshake)
    pub origin: UpdateOrigin,
}
