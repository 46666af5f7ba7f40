//! Field synchronization policy registry.
//!
//! Pure data consulted by both sync directions: which post fields are
//! eligible for synchronization, which meta keys are reserved for internal
//! bookkeeping, and the per-field special cases (placeholder title, empty
//! slug, transient status, floating date, block content comparison).
//!
//! Policies are a table, not control flow: adding a field means adding a
//! [`FieldPolicy`] row, and the projector/extractor stay generic.

use serde_json::Value;

use super::types::{Block, Post, PostStatus, RenderedText, serialize_blocks};

/// Placeholder title assigned to posts that have never been saved.
///
/// Outbound projection suppresses this literal so a collaborator opening the
/// same fresh post does not see the placeholder as a real title.
pub const AUTO_DRAFT_TITLE: &str = "Auto Draft";

/// Meta key marking that the canonical document content has been persisted.
///
/// Written by the embedding application, read by the blocks inbound
/// comparison; never synchronized as ordinary metadata.
pub const CONTENT_PERSISTED_META_KEY: &str = "_content_persisted";

/// Meta keys reserved for internal bookkeeping; never synchronized.
pub const DISALLOWED_META_KEYS: &[&str] = &[CONTENT_PERSISTED_META_KEY];

/// Identity of a syncable post field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostField {
    /// Author user id.
    Author,
    /// Ordered block tree.
    Blocks,
    /// Comment status.
    CommentStatus,
    /// Publication date.
    Date,
    /// Excerpt text.
    Excerpt,
    /// Featured media id.
    FeaturedMedia,
    /// Post format.
    Format,
    /// Pingback status.
    PingStatus,
    /// Metadata map.
    Meta,
    /// URL slug.
    Slug,
    /// Publication status.
    Status,
    /// Pinned flag.
    Sticky,
    /// Tag term ids.
    Tags,
    /// Page template.
    Template,
    /// Title text.
    Title,
}

impl PostField {
    /// Wire key of this field in changesets, diffs and the shared record map.
    pub fn key(self) -> &'static str {
        match self {
            PostField::Author => "author",
            PostField::Blocks => "blocks",
            PostField::CommentStatus => "comment_status",
            PostField::Date => "date",
            PostField::Excerpt => "excerpt",
            PostField::FeaturedMedia => "featured_media",
            PostField::Format => "format",
            PostField::PingStatus => "ping_status",
            PostField::Meta => "meta",
            PostField::Slug => "slug",
            PostField::Status => "status",
            PostField::Sticky => "sticky",
            PostField::Tags => "tags",
            PostField::Template => "template",
            PostField::Title => "title",
        }
    }
}

/// Context handed to outbound skip predicates.
pub struct OutboundContext<'a> {
    /// The incoming value from the changeset.
    pub new_value: &'a Value,
    /// The field's current value in the shared record map, if any.
    pub shared_value: Option<&'a Value>,
}

/// Context handed to inbound skip predicates.
pub struct InboundContext<'a> {
    /// The field's current value in the shared record map.
    pub shared_value: &'a Value,
    /// The last-known local record.
    pub local: &'a Post,
}

/// Synchronization policy for one field.
///
/// A `None` predicate means the field has no special case in that direction;
/// the generic equality gate still applies.
pub struct FieldPolicy {
    /// The field this policy governs.
    pub field: PostField,
    /// Wire key, identical to `field.key()`.
    pub key: &'static str,
    outbound_skip: Option<fn(&OutboundContext) -> bool>,
    inbound_skip: Option<fn(&InboundContext) -> bool>,
}

impl FieldPolicy {
    /// Whether the outbound projection of this field should be skipped.
    pub fn skip_outbound(&self, ctx: &OutboundContext) -> bool {
        self.outbound_skip.is_some_and(|skip| skip(ctx))
    }

    /// Whether the inbound extraction of this field should be skipped.
    pub fn skip_inbound(&self, ctx: &InboundContext) -> bool {
        self.inbound_skip.is_some_and(|skip| skip(ctx))
    }
}

/// The allowed-fields set, with each field's special-case predicates.
///
/// A field outside this table never appears in an outbound update or an
/// inbound diff. Blocks and meta carry their direction-specific logic in the
/// projector/extractor ([`blocks_changed`] holds the blocks comparison rule).
pub const FIELD_POLICIES: &[FieldPolicy] = &[
    FieldPolicy {
        field: PostField::Author,
        key: "author",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::Blocks,
        key: "blocks",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::CommentStatus,
        key: "comment_status",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::Date,
        key: "date",
        outbound_skip: None,
        inbound_skip: Some(skip_inbound_floating_date),
    },
    FieldPolicy {
        field: PostField::Excerpt,
        key: "excerpt",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::FeaturedMedia,
        key: "featured_media",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::Format,
        key: "format",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::PingStatus,
        key: "ping_status",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::Meta,
        key: "meta",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::Slug,
        key: "slug",
        outbound_skip: Some(skip_outbound_empty_slug),
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::Status,
        key: "status",
        outbound_skip: None,
        inbound_skip: Some(skip_inbound_auto_draft_status),
    },
    FieldPolicy {
        field: PostField::Sticky,
        key: "sticky",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::Tags,
        key: "tags",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::Template,
        key: "template",
        outbound_skip: None,
        inbound_skip: None,
    },
    FieldPolicy {
        field: PostField::Title,
        key: "title",
        outbound_skip: Some(skip_outbound_placeholder_title),
        inbound_skip: None,
    },
];

/// Look up the policy for a field name.
pub fn policy_for(field: &str) -> Option<&'static FieldPolicy> {
    FIELD_POLICIES.iter().find(|policy| policy.key == field)
}

/// Whether a field is eligible for synchronization.
pub fn is_syncable(field: &str) -> bool {
    policy_for(field).is_some()
}

/// Whether a meta key may be synchronized.
pub fn is_syncable_meta_key(key: &str) -> bool {
    !DISALLOWED_META_KEYS.contains(&key)
}

/// Compare a shared value against the local value for one field.
///
/// Structural deep equality, except that title and excerpt compare only
/// their raw halves regardless of which shape either side uses.
pub fn field_changed(field: PostField, shared: &Value, local: Option<&Value>) -> bool {
    match field {
        PostField::Title | PostField::Excerpt => {
            RenderedText::raw_of(shared) != local.and_then(RenderedText::raw_of)
        }
        _ => local != Some(shared),
    }
}

/// Decide whether the shared block list should surface in an inbound diff.
///
/// Once the canonical document has been persisted (marker set) and the local
/// record still carries its raw serialized content, the comparison is
/// content-level: the shared blocks only count as changed when their
/// serialized form differs from the record's raw content. Otherwise the
/// lists are compared structurally.
pub fn blocks_changed(shared_blocks: &[Block], local: &Post, content_persisted: bool) -> bool {
    if content_persisted
        && let Some(content) = &local.content
    {
        return serialize_blocks(shared_blocks) != content.raw();
    }
    shared_blocks != local.blocks.as_slice()
}

/// Whether a marker value counts as set.
pub(crate) fn marker_set(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => false,
    }
}

fn skip_outbound_empty_slug(ctx: &OutboundContext) -> bool {
    // An empty slug means "use the auto-generated default", not an explicit
    // removal of the shared slug.
    ctx.new_value.as_str().is_some_and(str::is_empty)
}

fn skip_outbound_placeholder_title(ctx: &OutboundContext) -> bool {
    let has_prior = ctx
        .shared_value
        .and_then(RenderedText::raw_of)
        .is_some_and(|raw| !raw.is_empty());
    !has_prior && RenderedText::raw_of(ctx.new_value) == Some(AUTO_DRAFT_TITLE)
}

fn skip_inbound_auto_draft_status(ctx: &InboundContext) -> bool {
    // The not-yet-saved placeholder status never surfaces locally.
    ctx.shared_value.as_str() == Some(PostStatus::AutoDraft.as_str())
}

fn skip_inbound_floating_date(ctx: &InboundContext) -> bool {
    ctx.local.is_date_floating()
}
