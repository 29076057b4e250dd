//! Link resolver: typed link and anchor extraction plus target resolution.

pub mod anchors;
pub mod candidates;
pub mod parse;
pub mod resolve;

use crate::model::NoteProps;
use regex::Regex;

pub use anchors::{
    MarkdownScan, WHOLE_NOTE_ANCHOR, extract_anchors, has_anchor, normalize_anchor, scan_markdown,
    slugify,
};
pub use candidates::candidate_links;
pub use parse::{
    CROSS_VAULT_PREFIX, LineIndex, extract_body_links, format_wiki_target, frontmatter_tag_links,
    parse_anchor_spec, parse_wiki_inner,
};
pub use resolve::{LinkStatus, NoteLookup, is_reportable_broken, link_status, resolve_link, resolve_note};

pub(crate) fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(_compile_err) => match Regex::new(r"$^") {
            Ok(fallback) => fallback,
            Err(fallback_err) => panic!("hardcoded fallback regex must compile: {fallback_err}"),
        },
    }
}

/// Recompute `links` and `anchors` from the note's body and tags.
pub fn extract_note_links(note: &mut NoteProps) {
    let scan = scan_markdown(&note.body);
    let mut links = extract_body_links(&note.body, &note.fname, &scan);
    links.extend(frontmatter_tag_links(&note.tags));
    note.links = links;
    note.anchors = extract_anchors(&note.body, &scan);
}
