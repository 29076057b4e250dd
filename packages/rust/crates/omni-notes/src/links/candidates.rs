//! Candidate links: plain-text mentions of other notes' titles.
//!
//! Cost is O(notes x body length), so callers only run this when candidates
//! are enabled in the workspace config.

use super::anchors::scan_markdown;
use super::parse::{LineIndex, mask_code};
use crate::model::{LinkTarget, LinkType, NoteLink, NoteProps};

/// Titles shorter than this many chars never produce candidates.
pub const MIN_CANDIDATE_TITLE_LEN: usize = 3;

/// Lowercase every char whose lowercase form keeps its UTF-8 length.
///
/// Byte offsets into the result stay valid for the input, so match positions
/// map straight back onto the note body.
fn fold_case(text: &str) -> String {
    text.chars()
        .map(|ch| {
            let mut lower = ch.to_lowercase();
            match (lower.next(), lower.next()) {
                (Some(single), None) if single.len_utf8() == ch.len_utf8() => single,
                _ => ch,
            }
        })
        .collect()
}

fn plain_text(note: &NoteProps) -> String {
    let scan = scan_markdown(&note.body);
    let mut masked = mask_code(&note.body, &scan).into_bytes();
    for position in note.links.iter().filter_map(|link| link.position) {
        if let Some(bytes) = masked.get_mut(position.start.offset..position.end.offset) {
            bytes.fill(b' ');
        }
    }
    fold_case(&String::from_utf8_lossy(&masked))
}

fn is_word_byte(byte: Option<&u8>) -> bool {
    byte.is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b >= 0x80)
}

/// Occurrences of `targets`' titles in `note`'s body outside code and links.
///
/// Matching is a case-insensitive substring search (Unicode lowercase) that
/// only accepts hits bounded by non-word chars on both sides, so `alpha` never
/// matches inside `alphabet`. Titles under [`MIN_CANDIDATE_TITLE_LEN`] chars are
/// skipped. `note.links` must already hold the body links so they can be masked.
#[must_use]
pub fn candidate_links<'a>(
    note: &NoteProps,
    targets: impl IntoIterator<Item = &'a NoteProps>,
) -> Vec<NoteLink> {
    let haystack = plain_text(note);
    let bytes = haystack.as_bytes();
    let lines = LineIndex::new(&note.body);
    let mut out: Vec<NoteLink> = Vec::new();

    for target in targets {
        if target.id == note.id || target.stub {
            continue;
        }
        let needle = fold_case(target.title.trim());
        if needle.chars().count() < MIN_CANDIDATE_TITLE_LEN {
            continue;
        }
        for (start, _) in haystack.match_indices(&needle) {
            let end = start + needle.len();
            let before = start.checked_sub(1).and_then(|idx| bytes.get(idx));
            if is_word_byte(before) || is_word_byte(bytes.get(end)) {
                continue;
            }
            let Some(value) = note.body.get(start..end) else {
                continue;
            };
            out.push(NoteLink {
                link_type: LinkType::Candidate,
                alias: None,
                to: LinkTarget {
                    vault: Some(target.vault.clone()),
                    ..LinkTarget::to_fname(target.fname.clone())
                },
                value: value.to_string(),
                position: Some(lines.position(start..end)),
            });
        }
    }
    out.sort_by_key(|link| link.position.map(|pos| pos.start.offset));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::extract_note_links;

    #[test]
    fn test_candidates_skip_links_code_and_partial_words() {
        let mut source = NoteProps::new("src", "v", "Project Alpha is here.\n[[project alpha]]\n`project alpha`\nprojectalphas\n");
        extract_note_links(&mut source);
        let mut target = NoteProps::new("proj.alpha", "v", "");
        target.title = "Project Alpha".to_string();

        let found = candidate_links(&source, [&target]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "Project Alpha");
        assert_eq!(found[0].to.fname, "proj.alpha");
        assert_eq!(found[0].to.vault.as_deref(), Some("v"));
        assert_eq!(found[0].position.map(|pos| pos.start.line), Some(1));
    }

    #[test]
    fn test_short_titles_and_stubs_are_ignored() {
        let mut source = NoteProps::new("src", "v", "an ab stub here");
        extract_note_links(&mut source);
        let mut short = NoteProps::new("ab", "v", "");
        short.title = "ab".to_string();
        let mut stub = NoteProps::new_stub("stub", "v");
        stub.title = "stub here".to_string();
        assert!(candidate_links(&source, [&short, &stub]).is_empty());
    }

    #[test]
    fn test_non_ascii_titles_match_case_insensitively() {
        let mut source = NoteProps::new("src", "v", "Siehe ÜBERBLICK und Ökologie.\n");
        extract_note_links(&mut source);
        let mut overview = NoteProps::new("overview", "v", "");
        overview.title = "Überblick".to_string();
        let mut ecology = NoteProps::new("ecology", "v", "");
        ecology.title = "ökologie".to_string();

        let found = candidate_links(&source, [&overview, &ecology]);
        let values: Vec<&str> = found.iter().map(|link| link.value.as_str()).collect();
        assert_eq!(values, vec!["ÜBERBLICK", "Ökologie"]);
        assert_eq!(found[0].position.map(|pos| pos.start.offset), Some("Siehe ".len()));
    }
}
