//! Repair actions as pure functions over a single note.
//!
//! Every function re-checks its own precondition, so applying a fix and
//! running the action again yields `None`.

use crate::graph::BrokenLink;
use crate::links::{LinkStatus, scan_markdown};
use crate::model::{NoteLoc, NoteProps, clean_fname, fname_key, fname_problem, generate_id};
use crate::storage::derived_note_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Doctor repair action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoctorAction {
    /// Report unresolved wiki links and note references.
    FindBrokenLinks,
    /// Write an empty stub note for every missing link target.
    CreateMissingLinkedNotes,
    /// Delete stub files whose body is empty.
    RemoveStubs,
    /// Move a leading level-1 heading into the title.
    H1ToTitle,
    /// Demote level-1 headings to level 2.
    #[serde(rename = "hi_to_h2")]
    HIToH2,
    /// Give notes without a stored id (or a malformed one) a fresh id.
    RegenerateNoteId,
    /// Rename notes whose fname contains disallowed characters.
    FixInvalidFileNames,
}

impl DoctorAction {
    /// Every action.
    pub const ALL: [Self; 7] = [
        Self::FindBrokenLinks,
        Self::CreateMissingLinkedNotes,
        Self::RemoveStubs,
        Self::H1ToTitle,
        Self::HIToH2,
        Self::RegenerateNoteId,
        Self::FixInvalidFileNames,
    ];

    /// Stable action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FindBrokenLinks => "find_broken_links",
            Self::CreateMissingLinkedNotes => "create_missing_linked_notes",
            Self::RemoveStubs => "remove_stubs",
            Self::H1ToTitle => "h1_to_title",
            Self::HIToH2 => "hi_to_h2",
            Self::RegenerateNoteId => "regenerate_note_id",
            Self::FixInvalidFileNames => "fix_invalid_file_names",
        }
    }

    /// Whether the action only reports.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::FindBrokenLinks)
    }
}

impl fmt::Display for DoctorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoctorAction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == wanted)
            .ok_or_else(|| format!("unknown doctor action `{raw}`"))
    }
}

/// One mutation a doctor action asks the engine to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum DoctorFix {
    /// Persist this version of the note (same id, same location).
    Write(NoteProps),
    /// Delete the note.
    Delete,
    /// Replace the note with this copy under a new id.
    Reassign(NoteProps),
    /// Move the note.
    Rename(NoteLoc),
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Byte offset where 1-based `line` starts, and where the next line starts.
fn line_bounds(body: &str, line: usize) -> Option<(usize, usize)> {
    let mut start = 0;
    for (idx, text) in body.split_inclusive('\n').enumerate() {
        if idx + 1 == line {
            return Some((start, start + text.len()));
        }
        start += text.len();
    }
    None
}

/// ATX heading marker (`#` after up to three spaces), byte offset of the first `#`.
fn atx_marker(line: &str) -> Option<usize> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    (indent <= 3 && line[indent..].starts_with('#')).then_some(indent)
}

/// Title taken from the body's only level-1 heading when it opens the note.
#[must_use]
pub fn h1_to_title(note: &NoteProps) -> Option<DoctorFix> {
    if note.stub {
        return None;
    }
    let scan = scan_markdown(&note.body);
    let mut h1s = scan.headings.iter().filter(|heading| heading.level == 1);
    let heading = h1s.next()?;
    if h1s.next().is_some() || heading.text.is_empty() {
        return None;
    }
    let (start, end) = line_bounds(&note.body, heading.line)?;
    let opening = note.body.get(..start)?;
    if !opening.lines().all(is_blank) || atx_marker(note.body.get(start..end)?).is_none() {
        return None;
    }
    let rest = note.body.get(end..)?;
    let rest = match rest.split_inclusive('\n').next() {
        Some(first) if is_blank(first) => rest.get(first.len()..)?,
        _ => rest,
    };
    let mut fixed = note.clone();
    fixed.title.clone_from(&heading.text);
    fixed.body = format!("{opening}{rest}");
    Some(DoctorFix::Write(fixed))
}

/// Demote every level-1 ATX heading outside code to level 2.
#[must_use]
pub fn h1_to_h2(note: &NoteProps) -> Option<DoctorFix> {
    if note.stub {
        return None;
    }
    let scan = scan_markdown(&note.body);
    let mut inserts: Vec<usize> = scan
        .headings
        .iter()
        .filter(|heading| heading.level == 1)
        .filter_map(|heading| {
            let (start, end) = line_bounds(&note.body, heading.line)?;
            atx_marker(note.body.get(start..end)?).map(|marker| start + marker)
        })
        .collect();
    if inserts.is_empty() {
        return None;
    }
    inserts.sort_unstable_by(|left, right| right.cmp(left));
    let mut fixed = note.clone();
    for offset in inserts {
        fixed.body.insert(offset, '#');
    }
    Some(DoctorFix::Write(fixed))
}

/// Delete stub files with nothing in them.
#[must_use]
pub fn remove_stub(note: &NoteProps) -> Option<DoctorFix> {
    (note.stub && !note.is_root() && note.content_hash.is_some() && note.body.trim().is_empty())
        .then_some(DoctorFix::Delete)
}

fn is_wellformed_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// New id for a file-backed note whose id was derived at load or is malformed.
#[must_use]
pub fn regenerate_id(note: &NoteProps) -> Option<DoctorFix> {
    if note.is_root() || note.content_hash.is_none() {
        return None;
    }
    let derived = note.id == derived_note_id(&note.vault, &note.fname);
    if !derived && is_wellformed_id(&note.id) {
        return None;
    }
    let mut fixed = note.clone();
    fixed.id = generate_id();
    fixed.parent = None;
    fixed.children = Vec::new();
    Some(DoctorFix::Reassign(fixed))
}

/// Rename to the cleaned fname when the current one is unusable.
#[must_use]
pub fn fix_fname(note: &NoteProps) -> Option<DoctorFix> {
    if note.is_root() || fname_problem(&note.fname).is_none() {
        return None;
    }
    let cleaned = clean_fname(&note.fname);
    (!cleaned.is_empty() && cleaned != note.fname && fname_problem(&cleaned).is_none())
        .then(|| DoctorFix::Rename(NoteLoc::new(cleaned, note.vault.clone())))
}

/// Per-note fix for `action`; `None` for actions that do not work per note.
#[must_use]
pub fn note_fix(action: DoctorAction, note: &NoteProps) -> Option<DoctorFix> {
    match action {
        DoctorAction::RemoveStubs => remove_stub(note),
        DoctorAction::H1ToTitle => h1_to_title(note),
        DoctorAction::HIToH2 => h1_to_h2(note),
        DoctorAction::RegenerateNoteId => regenerate_id(note),
        DoctorAction::FixInvalidFileNames => fix_fname(note),
        DoctorAction::FindBrokenLinks | DoctorAction::CreateMissingLinkedNotes => None,
    }
}

/// Locations of missing link targets, deduplicated by `(vault, fname)`.
///
/// Links into unknown vaults and links that only miss an anchor are skipped.
#[must_use]
pub fn missing_targets(broken: &[BrokenLink]) -> Vec<NoteLoc> {
    let mut targets: BTreeMap<(String, String), NoteLoc> = BTreeMap::new();
    for link in broken.iter().filter(|link| link.status == LinkStatus::BrokenNote) {
        let vault = link.link.to.vault.clone().unwrap_or_else(|| link.vault.clone());
        let fname = link.link.to.fname.trim();
        if fname_problem(fname).is_some() {
            continue;
        }
        targets
            .entry((vault.clone(), fname_key(fname)))
            .or_insert_with(|| NoteLoc::new(fname, vault));
    }
    targets.into_values().collect()
}

/// Empty note written for a missing link target.
#[must_use]
pub fn placeholder_note(loc: &NoteLoc) -> NoteProps {
    let mut note = NoteProps::new(loc.fname.clone(), loc.vault.clone(), "");
    note.stub = true;
    note
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(body: &str) -> NoteProps {
        let mut note = NoteProps::new("proj.alpha", "v", body);
        note.content_hash = Some("h".to_string());
        note
    }

    fn written(fix: Option<DoctorFix>) -> Option<NoteProps> {
        match fix {
            Some(DoctorFix::Write(note)) => Some(note),
            _ => None,
        }
    }

    #[test]
    fn test_h1_to_title_moves_leading_heading() {
        let fixed = written(h1_to_title(&note("\n# Alpha Plan\n\nBody\n## Part\n")));
        let fixed = fixed.unwrap();
        assert_eq!(fixed.title, "Alpha Plan");
        assert_eq!(fixed.body, "\nBody\n## Part\n");
        assert_eq!(h1_to_title(&fixed), None);
    }

    #[test]
    fn test_h1_to_title_needs_single_leading_h1() {
        assert_eq!(h1_to_title(&note("Intro\n# Late\n")), None);
        assert_eq!(h1_to_title(&note("# One\n# Two\n")), None);
        assert_eq!(h1_to_title(&note("## Only h2\n")), None);
    }

    #[test]
    fn test_h1_to_h2_skips_code_and_is_idempotent() {
        let fixed = written(h1_to_h2(&note("# A\ntext\n```\n# not a heading\n```\n  # B\n"))).unwrap();
        assert_eq!(fixed.body, "## A\ntext\n```\n# not a heading\n```\n  ## B\n");
        assert_eq!(h1_to_h2(&fixed), None);
    }

    #[test]
    fn test_remove_stub_needs_file_and_empty_body() {
        let mut stub = note("  \n");
        stub.stub = true;
        assert_eq!(remove_stub(&stub), Some(DoctorFix::Delete));
        stub.content_hash = None;
        assert_eq!(remove_stub(&stub), None);
        let mut filled = note("text");
        filled.stub = true;
        assert_eq!(remove_stub(&filled), None);
    }

    #[test]
    fn test_regenerate_only_derived_or_malformed_ids() {
        let mut derived = note("");
        derived.id = derived_note_id("v", "proj.alpha");
        let Some(DoctorFix::Reassign(fixed)) = regenerate_id(&derived) else {
            panic!("derived id should be regenerated");
        };
        assert_ne!(fixed.id, derived.id);
        assert_eq!(regenerate_id(&fixed), None);

        let mut malformed = note("");
        malformed.id = "has space".to_string();
        assert!(regenerate_id(&malformed).is_some());

        let mut root = NoteProps::new("root", "v", "");
        root.id = derived_note_id("v", "root");
        root.content_hash = Some("h".to_string());
        assert_eq!(regenerate_id(&root), None);
    }

    #[test]
    fn test_fix_fname_cleans_characters() {
        let mut bad = note("");
        bad.fname = "proj.my note?".to_string();
        assert_eq!(
            fix_fname(&bad),
            Some(DoctorFix::Rename(NoteLoc::new("proj.my-note-", "v")))
        );
        assert_eq!(fix_fname(&note("")), None);
    }

    #[test]
    fn test_action_names_parse() {
        for action in DoctorAction::ALL {
            assert_eq!(action.as_str().parse::<DoctorAction>(), Ok(action));
        }
        assert_eq!("H1-To-Title".parse::<DoctorAction>(), Ok(DoctorAction::H1ToTitle));
        assert!("nope".parse::<DoctorAction>().is_err());
    }
}
