//! Link extraction from note bodies.
//!
//! Code blocks and inline code spans are masked with spaces before any pattern
//! runs, so byte offsets into the masked text are offsets into the body.

use super::anchors::MarkdownScan;
use super::compile_regex;
use crate::model::{LinkTarget, LinkType, NoteLink, Point, Position, TAGS_PREFIX, USERS_PREFIX};
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

/// Prefix that pins a wiki link to one vault: `[[vault://name/fname]]`.
pub const CROSS_VAULT_PREFIX: &str = "vault://";

static REF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r"\(\(ref:\s*\[\[([^\[\]\n]+?)\]\](#[^\s:)]+)?(?::(#[^\s)]+))?\s*\)\)")
});
static EMBED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"!\[\[([^\[\]\n]+?)\]\]"));
static WIKI_REGEX: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"\[\[([^\[\]\n]+?)\]\]"));
static INLINE_CODE_REGEX: LazyLock<Regex> = LazyLock::new(|| compile_regex(r"`[^`\n]+`"));
static HASHTAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r"(?m)(?:^|[\s(\[{,;])#([\p{L}\p{N}_-]+(?:\.[\p{L}\p{N}_-]+)*)")
});
static USERTAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r"(?m)(?:^|[\s(\[{,;])@([\p{L}\p{N}_-]+(?:\.[\p{L}\p{N}_-]+)*)")
});

/// Maps byte offsets in a body to 1-based line/column points.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    /// Index the line starts of `text`.
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(idx, _)| idx + 1));
        Self { text, line_starts }
    }

    /// Point for a byte offset.
    #[must_use]
    pub fn point(&self, offset: usize) -> Point {
        let offset = offset.min(self.text.len());
        let line_idx = self
            .line_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1);
        let line_start = self.line_starts.get(line_idx).copied().unwrap_or(0);
        let column = self
            .text
            .get(line_start..offset)
            .map_or(0, |prefix| prefix.chars().count());
        Point {
            line: line_idx + 1,
            column: column + 1,
            offset,
        }
    }

    /// Position spanning a byte range.
    #[must_use]
    pub fn position(&self, range: Range<usize>) -> Position {
        Position {
            start: self.point(range.start),
            end: self.point(range.end),
        }
    }

    /// Byte range of a 1-based line, without its newline.
    #[must_use]
    pub fn line_range(&self, line: usize) -> Option<Range<usize>> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let end = self
            .line_starts
            .get(line)
            .map_or(self.text.len(), |next| next.saturating_sub(1));
        Some(start..end.max(start))
    }
}

fn blank_range(masked: &mut [u8], range: Range<usize>) {
    for byte in masked.get_mut(range).into_iter().flatten() {
        if *byte != b'\n' {
            *byte = b' ';
        }
    }
}

fn into_string(bytes: Vec<u8>) -> String {
    // Whole chars are blanked, so the result is valid UTF-8.
    String::from_utf8(bytes).unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

/// Body with code blocks and inline code replaced by spaces (same byte length).
#[must_use]
pub fn mask_code(body: &str, scan: &MarkdownScan) -> String {
    let lines = LineIndex::new(body);
    let mut masked = body.as_bytes().to_vec();
    for (first, last) in &scan.code_lines {
        for line in *first..=*last {
            if let Some(range) = lines.line_range(line) {
                blank_range(&mut masked, range);
            }
        }
    }
    let partial = into_string(masked);
    let mut masked = partial.clone().into_bytes();
    for span in INLINE_CODE_REGEX.find_iter(&partial) {
        blank_range(&mut masked, span.range());
    }
    into_string(masked)
}

/// Split an anchor suffix `start[,offset][:#end]` (leading `#` already removed).
#[must_use]
pub fn parse_anchor_spec(raw: &str) -> (Option<String>, Option<u32>, Option<String>) {
    let (start_part, end) = match raw.split_once(":#") {
        Some((start, end)) => (start, Some(end.trim().to_string())),
        None => (raw, None),
    };
    let (start, offset) = match start_part.split_once(',') {
        Some((start, offset)) => (start, offset.trim().parse::<u32>().ok()),
        None => (start_part, None),
    };
    let start = Some(start.trim().to_string()).filter(|value| !value.is_empty());
    (start, offset, end.filter(|value| !value.is_empty()))
}

/// Parse the inside of `[[...]]` into `(alias, target)`.
///
/// `source_fname` fills the target of same-note links (`[[#anchor]]`).
#[must_use]
pub fn parse_wiki_inner(inner: &str, source_fname: &str) -> (Option<String>, LinkTarget) {
    let (alias, target) = match inner.split_once('|') {
        Some((alias, target)) => (Some(alias.trim().to_string()), target.trim()),
        None => (None, inner.trim()),
    };
    let (vault, rest) = match target.strip_prefix(CROSS_VAULT_PREFIX) {
        Some(prefixed) => match prefixed.split_once('/') {
            Some((vault, rest)) => (Some(vault.trim().to_string()), rest),
            None => (None, prefixed),
        },
        None => (None, target),
    };
    let (fname, anchor) = match rest.split_once('#') {
        Some((fname, anchor)) => (fname.trim(), Some(anchor)),
        None => (rest.trim(), None),
    };
    let (anchor_start, anchor_start_offset, anchor_end) =
        anchor.map_or((None, None, None), parse_anchor_spec);
    let fname = if fname.is_empty() { source_fname } else { fname };
    (
        alias.filter(|value| !value.is_empty()),
        LinkTarget {
            fname: fname.to_string(),
            vault,
            anchor_start,
            anchor_start_offset,
            anchor_end,
        },
    )
}

/// Serialize a target back to wiki-link syntax (`alias|vault://v/fname#a,1:#b`).
#[must_use]
pub fn format_wiki_target(alias: Option<&str>, target: &LinkTarget) -> String {
    let mut out = String::new();
    if let Some(alias) = alias {
        out.push_str(alias);
        out.push('|');
    }
    if let Some(vault) = &target.vault {
        out.push_str(CROSS_VAULT_PREFIX);
        out.push_str(vault);
        out.push('/');
    }
    out.push_str(&target.fname);
    if let Some(start) = &target.anchor_start {
        out.push('#');
        out.push_str(start);
        if let Some(offset) = target.anchor_start_offset {
            out.push(',');
            out.push_str(&offset.to_string());
        }
    }
    if let Some(end) = &target.anchor_end {
        out.push_str(":#");
        out.push_str(end);
    }
    out
}

fn tag_link(link_type: LinkType, prefix: &str, name: &str, value: String, position: Option<Position>) -> NoteLink {
    NoteLink {
        link_type,
        alias: None,
        to: LinkTarget::to_fname(format!("{prefix}.{name}")),
        value,
        position,
    }
}

fn is_tag_name(name: &str) -> bool {
    !name.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
}

/// Extract body links in source order.
#[must_use]
pub fn extract_body_links(body: &str, source_fname: &str, scan: &MarkdownScan) -> Vec<NoteLink> {
    let lines = LineIndex::new(body);
    let masked_text = mask_code(body, scan);
    let mut masked = masked_text.clone().into_bytes();
    let mut links: Vec<NoteLink> = Vec::new();
    let slice = |range: Range<usize>| body.get(range).unwrap_or_default().to_string();

    for caps in REF_REGEX.captures_iter(&masked_text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let (_, mut to) = parse_wiki_inner(inner.as_str(), source_fname);
        if let Some(start) = caps.get(2) {
            let (anchor_start, offset, _) = parse_anchor_spec(start.as_str().trim_start_matches('#'));
            to.anchor_start = anchor_start;
            to.anchor_start_offset = offset;
        }
        if let Some(end) = caps.get(3) {
            to.anchor_end = Some(end.as_str().trim_start_matches('#').to_string())
                .filter(|value| !value.is_empty());
        }
        links.push(NoteLink {
            link_type: LinkType::Ref,
            alias: None,
            to,
            value: slice(whole.range()),
            position: Some(lines.position(whole.range())),
        });
        blank_range(&mut masked, whole.range());
    }

    let after_refs = into_string(masked.clone());
    for caps in EMBED_REGEX.captures_iter(&after_refs) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let (_, to) = parse_wiki_inner(inner.as_str(), source_fname);
        links.push(NoteLink {
            link_type: LinkType::Ref,
            alias: None,
            to,
            value: slice(whole.range()),
            position: Some(lines.position(whole.range())),
        });
        blank_range(&mut masked, whole.range());
    }

    let after_embeds = into_string(masked.clone());
    for caps in WIKI_REGEX.captures_iter(&after_embeds) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let (alias, to) = parse_wiki_inner(inner.as_str(), source_fname);
        if to.fname.is_empty() {
            continue;
        }
        links.push(NoteLink {
            link_type: LinkType::Wiki,
            alias,
            to,
            value: slice(whole.range()),
            position: Some(lines.position(whole.range())),
        });
        blank_range(&mut masked, whole.range());
    }

    let plain = into_string(masked);
    for (regex, link_type, prefix, sigil) in [
        (&*HASHTAG_REGEX, LinkType::Hashtag, TAGS_PREFIX, '#'),
        (&*USERTAG_REGEX, LinkType::UserTag, USERS_PREFIX, '@'),
    ] {
        for caps in regex.captures_iter(&plain) {
            let Some(name) = caps.get(1) else {
                continue;
            };
            if !is_tag_name(name.as_str()) {
                continue;
            }
            let range = name.start().saturating_sub(sigil.len_utf8())..name.end();
            links.push(tag_link(
                link_type,
                prefix,
                name.as_str(),
                slice(range.clone()),
                Some(lines.position(range)),
            ));
        }
    }

    links.sort_by_key(|link| link.position.map(|pos| pos.start.offset));
    links
}

/// Links implied by frontmatter `tags`.
#[must_use]
pub fn frontmatter_tag_links(tags: &[String]) -> Vec<NoteLink> {
    tags.iter()
        .map(|tag| tag.trim().trim_start_matches('#'))
        .filter(|tag| !tag.is_empty())
        .map(|tag| tag_link(LinkType::FrontmatterTag, TAGS_PREFIX, tag, tag.to_string(), None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::anchors::scan_markdown;

    fn links_of(body: &str) -> Vec<NoteLink> {
        extract_body_links(body, "source", &scan_markdown(body))
    }

    #[test]
    fn test_wiki_link_forms() {
        let links = links_of("see [[Alias|proj.alpha#intro,2:#outro]] and [[vault://work/x]] and [[#top]]");
        assert_eq!(links.len(), 3);

        let first = &links[0];
        assert_eq!(first.link_type, LinkType::Wiki);
        assert_eq!(first.alias.as_deref(), Some("Alias"));
        assert_eq!(first.to.fname, "proj.alpha");
        assert_eq!(first.to.anchor_start.as_deref(), Some("intro"));
        assert_eq!(first.to.anchor_start_offset, Some(2));
        assert_eq!(first.to.anchor_end.as_deref(), Some("outro"));
        assert_eq!(first.value, "[[Alias|proj.alpha#intro,2:#outro]]");

        assert_eq!(links[1].to.vault.as_deref(), Some("work"));
        assert_eq!(links[1].to.fname, "x");
        assert_eq!(links[2].to.fname, "source");
        assert_eq!(links[2].to.anchor_start.as_deref(), Some("top"));
    }

    #[test]
    fn test_refs_embeds_and_tags() {
        let body = "((ref: [[daily]]#start:#end))\n![[img.note]]\n#proj.alpha and @ada, issue #12\n";
        let links = links_of(body);
        let kinds: Vec<LinkType> = links.iter().map(|link| link.link_type).collect();
        assert_eq!(
            kinds,
            vec![LinkType::Ref, LinkType::Ref, LinkType::Hashtag, LinkType::UserTag]
        );
        assert_eq!(links[0].to.fname, "daily");
        assert_eq!(links[0].to.anchor_start.as_deref(), Some("start"));
        assert_eq!(links[0].to.anchor_end.as_deref(), Some("end"));
        assert_eq!(links[2].to.fname, "tags.proj.alpha");
        assert_eq!(links[2].value, "#proj.alpha");
        assert_eq!(links[3].to.fname, "user.ada");
    }

    #[test]
    fn test_code_is_ignored_and_positions_are_exact() {
        let body = "```\n[[inside]]\n```\n`[[inline]]` then [[real]]\n";
        let links = links_of(body);
        assert_eq!(links.len(), 1);
        let pos = links[0].position.unwrap();
        assert_eq!(pos.start.line, 4);
        assert_eq!(pos.start.column, 19);
        assert_eq!(&body[pos.start.offset..pos.end.offset], "[[real]]");
    }

    #[test]
    fn test_format_wiki_target_round_trips() {
        let (alias, target) = parse_wiki_inner("A|vault://v/n#s,3:#e", "src");
        assert_eq!(format_wiki_target(alias.as_deref(), &target), "A|vault://v/n#s,3:#e");
    }

    #[test]
    fn test_frontmatter_tags() {
        let links = frontmatter_tag_links(&["a.b".to_string(), "#c".to_string()]);
        assert_eq!(links[0].to.fname, "tags.a.b");
        assert_eq!(links[1].to.fname, "tags.c");
        assert!(links.iter().all(|link| link.position.is_none()));
    }
}
