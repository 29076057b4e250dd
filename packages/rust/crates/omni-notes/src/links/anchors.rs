//! Headers and block anchors.

use super::compile_regex;
use super::parse::{LineIndex, mask_code};
use crate::model::{AnchorKind, NoteAnchor};
use comrak::nodes::{AstNode, NodeValue};
use comrak::{Arena, Options, parse_document};
use regex::Regex;
use std::sync::LazyLock;

/// Anchor value addressing the whole note.
pub const WHOLE_NOTE_ANCHOR: &str = "*";

static BLOCK_ANCHOR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"(?m)(?:^|[ \t])(\^[A-Za-z0-9_-]+)[ \t]*$"));

/// One heading found by the Markdown parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedHeading {
    /// 1..=6.
    pub level: u8,
    /// Plain heading text.
    pub text: String,
    /// 1-based line.
    pub line: usize,
}

/// Block structure needed by link and anchor extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkdownScan {
    /// Inclusive 1-based line ranges of code blocks.
    pub code_lines: Vec<(usize, usize)>,
    /// Headings in document order.
    pub headings: Vec<ScannedHeading>,
}

fn push_text_from_node<'a>(node: &'a AstNode<'a>, out: &mut String) {
    match &node.data.borrow().value {
        NodeValue::Text(value) => out.push_str(value),
        NodeValue::Code(value) => out.push_str(&value.literal),
        NodeValue::SoftBreak | NodeValue::LineBreak => out.push(' '),
        _ => {
            for child in node.children() {
                push_text_from_node(child, out);
            }
        }
    }
}

/// Parse the body once with comrak.
#[must_use]
pub fn scan_markdown(body: &str) -> MarkdownScan {
    let arena = Arena::new();
    let root = parse_document(&arena, body, &Options::default());
    let mut scan = MarkdownScan::default();
    for node in root.descendants() {
        let (value, start, end) = {
            let data = node.data.borrow();
            (
                data.value.clone(),
                data.sourcepos.start.line,
                data.sourcepos.end.line,
            )
        };
        match value {
            NodeValue::CodeBlock(_) => scan.code_lines.push((start, end.max(start))),
            NodeValue::Heading(heading) => {
                let mut text = String::new();
                for child in node.children() {
                    push_text_from_node(child, &mut text);
                }
                scan.headings.push(ScannedHeading {
                    level: heading.level,
                    text: text.trim().to_string(),
                    line: start,
                });
            }
            _ => {}
        }
    }
    scan
}

/// Header slug: lowercase, whitespace to `-`, punctuation dropped.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == '-' {
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Normalize a link anchor for comparison with [`NoteAnchor::value`].
#[must_use]
pub fn normalize_anchor(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('#').trim();
    if trimmed == WHOLE_NOTE_ANCHOR || trimmed.starts_with('^') {
        trimmed.to_string()
    } else {
        slugify(trimmed)
    }
}

/// Headers and block anchors of a body.
#[must_use]
pub fn extract_anchors(body: &str, scan: &MarkdownScan) -> Vec<NoteAnchor> {
    let lines = LineIndex::new(body);
    let mut anchors: Vec<NoteAnchor> = scan
        .headings
        .iter()
        .filter_map(|heading| {
            let range = lines.line_range(heading.line)?;
            Some(NoteAnchor {
                kind: AnchorKind::Header,
                value: slugify(&heading.text),
                text: heading.text.clone(),
                depth: Some(heading.level),
                position: lines.position(range),
            })
        })
        .collect();

    let masked = mask_code(body, scan);
    for caps in BLOCK_ANCHOR_REGEX.captures_iter(&masked) {
        let Some(id) = caps.get(1) else {
            continue;
        };
        anchors.push(NoteAnchor {
            kind: AnchorKind::Block,
            value: id.as_str().to_string(),
            text: String::new(),
            depth: None,
            position: lines.position(id.range()),
        });
    }
    anchors.sort_by_key(|anchor| anchor.position.start.offset);
    anchors
}

/// Whether `anchor` (raw link text) addresses something in `anchors`.
#[must_use]
pub fn has_anchor(anchors: &[NoteAnchor], anchor: &str) -> bool {
    let wanted = normalize_anchor(anchor);
    wanted == WHOLE_NOTE_ANCHOR || anchors.iter().any(|candidate| candidate.value == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Multi   space  "), "multi-space");
        assert_eq!(normalize_anchor("#Intro Section"), "intro-section");
        assert_eq!(normalize_anchor("^blk-1"), "^blk-1");
        assert_eq!(normalize_anchor("*"), "*");
    }

    #[test]
    fn test_extract_anchors() {
        let body = "# Title\n\ntext ^para1\n\n```\n# not a heading ^nope\n```\n\n## Sub `code` part\n";
        let scan = scan_markdown(body);
        let anchors = extract_anchors(body, &scan);
        let values: Vec<&str> = anchors.iter().map(|anchor| anchor.value.as_str()).collect();
        assert_eq!(values, vec!["title", "^para1", "sub-code-part"]);
        assert_eq!(anchors[0].depth, Some(1));
        assert_eq!(anchors[0].position.start.line, 1);
        assert_eq!(anchors[1].kind, AnchorKind::Block);
        assert_eq!(anchors[2].depth, Some(2));
        assert!(has_anchor(&anchors, "Sub code part"));
        assert!(has_anchor(&anchors, "*"));
        assert!(!has_anchor(&anchors, "missing"));
    }
}
