//! Note entity, link/anchor descriptors and fname helpers.

use super::custom::CustomFields;
use serde::{Deserialize, Serialize};

/// Fname of every vault's root note.
pub const ROOT_FNAME: &str = "root";
/// Fname prefix hashtags resolve under (`#a.b` -> `tags.a.b`).
pub const TAGS_PREFIX: &str = "tags";
/// Fname prefix user tags resolve under (`@ada` -> `user.ada`).
pub const USERS_PREFIX: &str = "user";

/// Typed task frontmatter (`due`, `owner`, `priority`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFields {
    /// Due date, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    /// Owner handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Priority label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl TaskFields {
    /// Whether no task field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.due.is_none() && self.owner.is_none() && self.priority.is_none()
    }
}

/// Position inside a note body (1-based line/column, 0-based byte offset).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    /// 1-based line.
    pub line: usize,
    /// 1-based column in characters.
    pub column: usize,
    /// Byte offset into the body.
    pub offset: usize,
}

/// Source range of a link or anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// Inclusive start.
    pub start: Point,
    /// Exclusive end.
    pub end: Point,
}

/// Kind of an outbound link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// `[[target]]` / `[[alias|target]]`.
    Wiki,
    /// `((ref: [[target]]))` or `![[target]]`.
    Ref,
    /// `#seg.ment`.
    Hashtag,
    /// `@name`.
    UserTag,
    /// `tags:` frontmatter entry.
    FrontmatterTag,
    /// Plain-text occurrence of another note's title.
    Candidate,
}

impl LinkType {
    /// Link kinds that count as explicit ("Linked" backlinks).
    #[must_use]
    pub const fn is_explicit(self) -> bool {
        !matches!(self, Self::Candidate)
    }

    /// Link kinds reported as broken when they do not resolve.
    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Wiki | Self::Ref)
    }
}

/// Where a link points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkTarget {
    /// Target fname (for same-note anchors, the source fname).
    pub fname: String,
    /// Explicit vault prefix, when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<String>,
    /// Start anchor (`header-slug`, `^block`, or `*`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_start: Option<String>,
    /// Line offset after the start anchor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_start_offset: Option<u32>,
    /// End anchor for range references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_end: Option<String>,
}

impl LinkTarget {
    /// Target without vault or anchors.
    #[must_use]
    pub fn to_fname(fname: impl Into<String>) -> Self {
        Self {
            fname: fname.into(),
            ..Self::default()
        }
    }
}

/// One outbound link extracted from a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteLink {
    /// Link kind.
    #[serde(rename = "type")]
    pub link_type: LinkType,
    /// Display alias (`[[alias|target]]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Resolved-by-name target.
    pub to: LinkTarget,
    /// Exact source text of the link.
    pub value: String,
    /// Body range; `None` for frontmatter-derived links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Kind of an addressable location inside a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    /// Markdown heading.
    Header,
    /// `^block-id` marker.
    Block,
}

/// Addressable location inside a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteAnchor {
    /// Anchor kind.
    pub kind: AnchorKind,
    /// Link value: header slug, or `^id` for blocks.
    pub value: String,
    /// Heading text (empty for blocks).
    pub text: String,
    /// Heading depth (1..=6), `None` for blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u8>,
    /// Range in the body.
    pub position: Position,
}

/// Matched schema for a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRef {
    /// Schema module id.
    pub module_id: String,
    /// Schema id inside the module.
    pub schema_id: String,
}

/// A note in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteProps {
    /// Stable id; survives renames.
    pub id: String,
    /// Dotted hierarchical name.
    pub fname: String,
    /// Owning vault name.
    pub vault: String,
    /// Display title.
    pub title: String,
    /// Short description.
    #[serde(default)]
    pub desc: String,
    /// Creation time (epoch millis).
    pub created: i64,
    /// Last update time (epoch millis).
    pub updated: i64,
    /// Frontmatter tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Typed task fields.
    #[serde(default)]
    pub task: TaskFields,
    /// Every other frontmatter key.
    #[serde(default)]
    pub custom: CustomFields,
    /// Raw Markdown body (after frontmatter).
    #[serde(default)]
    pub body: String,
    /// Parent note id (derived from hierarchy).
    #[serde(default)]
    pub parent: Option<String>,
    /// Child note ids ordered by title (derived).
    #[serde(default)]
    pub children: Vec<String>,
    /// Outbound links (derived from body and frontmatter).
    #[serde(default)]
    pub links: Vec<NoteLink>,
    /// Headers and block anchors (derived from body).
    #[serde(default)]
    pub anchors: Vec<NoteAnchor>,
    /// Hierarchy placeholder without authored content.
    #[serde(default)]
    pub stub: bool,
    /// Matched schema (derived).
    #[serde(default)]
    pub schema: Option<SchemaRef>,
    /// xxh3 hash of the file content this note was loaded from.
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl NoteProps {
    /// New authored note with a fresh id and default title.
    #[must_use]
    pub fn new(fname: impl Into<String>, vault: impl Into<String>, body: impl Into<String>) -> Self {
        let fname = fname.into();
        let now = now_millis();
        Self {
            id: generate_id(),
            title: default_title(&fname),
            fname,
            vault: vault.into(),
            desc: String::new(),
            created: now,
            updated: now,
            tags: Vec::new(),
            task: TaskFields::default(),
            custom: CustomFields::new(),
            body: body.into(),
            parent: None,
            children: Vec::new(),
            links: Vec::new(),
            anchors: Vec::new(),
            stub: false,
            schema: None,
            content_hash: None,
        }
    }

    /// New in-memory hierarchy stub.
    #[must_use]
    pub fn new_stub(fname: impl Into<String>, vault: impl Into<String>) -> Self {
        let mut note = Self::new(fname, vault, "");
        note.stub = true;
        note
    }

    /// Whether this is a vault root note.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.fname == ROOT_FNAME
    }

    /// Location of this note.
    #[must_use]
    pub fn loc(&self) -> NoteLoc {
        NoteLoc {
            fname: self.fname.clone(),
            vault: self.vault.clone(),
        }
    }
}

/// `(fname, vault)` pair addressing a note.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteLoc {
    /// Note name.
    pub fname: String,
    /// Vault name.
    pub vault: String,
}

impl NoteLoc {
    /// Build a location.
    pub fn new(fname: impl Into<String>, vault: impl Into<String>) -> Self {
        Self {
            fname: fname.into(),
            vault: vault.into(),
        }
    }
}

/// Fresh note id.
#[must_use]
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall-clock time in epoch millis.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lowercased key used by fname lookups.
#[must_use]
pub fn fname_key(fname: &str) -> String {
    fname.trim().to_lowercase()
}

/// Dot-separated segments.
#[must_use]
pub fn fname_segments(fname: &str) -> Vec<&str> {
    fname.split('.').collect()
}

/// Immediate hierarchy parent name; `None` for top-level names and `root`.
#[must_use]
pub fn parent_fname(fname: &str) -> Option<&str> {
    if fname == ROOT_FNAME {
        return None;
    }
    fname.rfind('.').map(|idx| &fname[..idx])
}

/// Proper ancestors, nearest first (`a.b.c` -> `a.b`, `a`).
#[must_use]
pub fn ancestor_fnames(fname: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut cursor = fname;
    while let Some(parent) = parent_fname(cursor) {
        out.push(parent);
        cursor = parent;
    }
    out
}

/// Title derived from the last segment: `project.alpha` -> `Alpha`.
#[must_use]
pub fn default_title(fname: &str) -> String {
    let last = fname.rsplit('.').next().unwrap_or(fname);
    let mut chars = last.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

const INVALID_FNAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '#', '[', ']'];

/// Reason an fname is unusable, or `None` when it is valid.
#[must_use]
pub fn fname_problem(fname: &str) -> Option<String> {
    if fname.trim().is_empty() {
        return Some("name is empty".to_string());
    }
    if fname.trim() != fname {
        return Some("name has leading or trailing whitespace".to_string());
    }
    if let Some(bad) = fname.chars().find(|ch| INVALID_FNAME_CHARS.contains(ch) || ch.is_control()) {
        return Some(format!("character `{bad}` is not allowed"));
    }
    if fname.split('.').any(str::is_empty) {
        return Some("name has an empty segment".to_string());
    }
    None
}

/// Replace disallowed characters so the result passes [`fname_problem`].
#[must_use]
pub fn clean_fname(fname: &str) -> String {
    let replaced: String = fname
        .trim()
        .chars()
        .map(|ch| {
            if INVALID_FNAME_CHARS.contains(&ch) || ch.is_control() || ch.is_whitespace() {
                '-'
            } else {
                ch
            }
        })
        .collect();
    replaced
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}
