//! Rename planning: the moved note plus every note whose links must follow it.

use crate::error::{EngineError, EngineResult};
use crate::graph::NoteGraph;
use crate::links::{format_wiki_target, parse_wiki_inner, resolve_note};
use crate::model::{LinkType, NoteLoc, NoteProps, fname_key, fname_problem, now_millis};
use super::gate::location_key;
use std::ops::Range;

/// Notes to persist for one rename.
#[derive(Debug, Clone)]
pub struct RenamePlan {
    /// The note at its new location.
    pub note: NoteProps,
    /// The note before the rename.
    pub prev: NoteProps,
    /// Other notes with rewritten links.
    pub updated: Vec<NoteProps>,
}

impl RenamePlan {
    /// Ids touched by the rename.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        std::iter::once(self.note.id.clone())
            .chain(self.updated.iter().map(|note| note.id.clone()))
            .collect()
    }

    /// Gate keys for the rename: every touched id plus the old and new file slots.
    #[must_use]
    pub fn gate_keys(&self) -> Vec<String> {
        let mut keys = self.ids();
        keys.push(location_key(&self.prev.vault, &self.prev.fname));
        keys.push(location_key(&self.note.vault, &self.note.fname));
        keys
    }
}

/// Rewrite the `[[...]]` part of a wiki link, embed or note reference.
///
/// Alias and anchors are kept. A vault prefix is written when the link had one
/// or when the link crosses vaults after the move.
#[must_use]
pub fn rewrite_link_value(
    value: &str,
    source_fname: &str,
    source_vault: &str,
    new_loc: &NoteLoc,
) -> Option<String> {
    let open = value.find("[[")?;
    let close = open + 2 + value.get(open + 2..)?.find("]]")?;
    let inner = value.get(open + 2..close)?;
    let target_part = inner.split_once('|').map_or(inner, |(_, target)| target);
    if target_part.trim_start().starts_with('#') {
        // Same-note anchors keep pointing at the note itself.
        return None;
    }
    let (alias, mut target) = parse_wiki_inner(inner, source_fname);
    let had_prefix = target.vault.is_some();
    target.fname.clone_from(&new_loc.fname);
    target.vault = (had_prefix || source_vault != new_loc.vault).then(|| new_loc.vault.clone());
    let mut out = String::with_capacity(value.len() + new_loc.fname.len());
    out.push_str(value.get(..open + 2)?);
    out.push_str(&format_wiki_target(alias.as_deref(), &target));
    out.push_str(value.get(close..)?);
    Some(out)
}

/// Apply non-overlapping replacements to `body`.
#[must_use]
pub fn apply_edits(body: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));
    let mut out = body.to_string();
    for (range, text) in edits {
        if out.is_char_boundary(range.start) && range.end <= out.len() && out.is_char_boundary(range.end) {
            out.replace_range(range, &text);
        }
    }
    out
}

fn rewritten_body(graph: &NoteGraph, source: &NoteProps, target_id: &str, new_loc: &NoteLoc) -> Option<String> {
    let edits: Vec<(Range<usize>, String)> = source
        .links
        .iter()
        .filter(|link| matches!(link.link_type, LinkType::Wiki | LinkType::Ref))
        .filter(|link| {
            resolve_note(graph, &source.vault, &link.to).is_ok_and(|note| note.id == target_id)
        })
        .filter_map(|link| {
            let position = link.position?;
            let text = rewrite_link_value(&link.value, &source.fname, &source.vault, new_loc)?;
            Some((position.start.offset..position.end.offset, text))
        })
        .collect();
    (!edits.is_empty()).then(|| apply_edits(&source.body, edits))
}

/// Validate a rename and compute the notes it rewrites.
///
/// # Errors
///
/// - [`EngineError::NoteNotFound`] when `old` does not exist
/// - [`EngineError::ReservedNote`] for vault roots
/// - [`EngineError::InvalidFname`] for an unusable new name
/// - [`EngineError::VaultNotFound`] for an undeclared destination vault
/// - [`EngineError::NoteExists`] when an authored note occupies the destination
pub fn plan_rename(graph: &NoteGraph, old: &NoteLoc, new_loc: &NoteLoc) -> EngineResult<RenamePlan> {
    let prev = graph
        .note_by_loc(&old.fname, &old.vault)
        .cloned()
        .ok_or_else(|| EngineError::NoteNotFound(format!("{}/{}", old.vault, old.fname)))?;
    if prev.is_root() {
        return Err(EngineError::ReservedNote(prev.fname));
    }
    if let Some(reason) = fname_problem(&new_loc.fname) {
        return Err(EngineError::InvalidFname {
            fname: new_loc.fname.clone(),
            reason,
        });
    }
    if !graph.vaults().iter().any(|vault| *vault == new_loc.vault) {
        return Err(EngineError::VaultNotFound(new_loc.vault.clone()));
    }
    let same_place = fname_key(&prev.fname) == fname_key(&new_loc.fname) && prev.vault == new_loc.vault;
    if !same_place
        && let Some(existing) = graph.note_by_loc(&new_loc.fname, &new_loc.vault)
        && !existing.stub
    {
        return Err(EngineError::NoteExists {
            fname: new_loc.fname.clone(),
            vault: new_loc.vault.clone(),
        });
    }

    let now = now_millis();
    let mut note = prev.clone();
    note.fname.clone_from(&new_loc.fname);
    note.vault.clone_from(&new_loc.vault);
    note.updated = now;
    if let Some(body) = rewritten_body(graph, &prev, &prev.id, new_loc) {
        note.body = body;
    }

    let mut updated: Vec<NoteProps> = graph
        .notes()
        .filter(|source| source.id != prev.id && !source.stub)
        .filter_map(|source| {
            let body = rewritten_body(graph, source, &prev.id, new_loc)?;
            let mut changed = source.clone();
            changed.body = body;
            changed.updated = now;
            Some(changed)
        })
        .collect();
    updated.sort_by_key(|note| (note.vault.clone(), fname_key(&note.fname)));

    Ok(RenamePlan { note, prev, updated })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_keeps_alias_and_anchors() {
        let same = NoteLoc::new("new.name", "v");
        assert_eq!(
            rewrite_link_value("[[Title|old#intro]]", "src", "v", &same).as_deref(),
            Some("[[Title|new.name#intro]]")
        );
        assert_eq!(
            rewrite_link_value("((ref: [[old]]#a:#b))", "src", "v", &same).as_deref(),
            Some("((ref: [[new.name]]#a:#b))")
        );
        assert_eq!(
            rewrite_link_value("![[old]]", "src", "v", &NoteLoc::new("x", "other")).as_deref(),
            Some("![[vault://other/x]]")
        );
    }

    #[test]
    fn test_apply_edits_from_the_end() {
        let body = "a [[x]] b [[x]]";
        let out = apply_edits(body, vec![(2..7, "[[yy]]".to_string()), (10..15, "[[z]]".to_string())]);
        assert_eq!(out, "a [[yy]] b [[z]]");
    }
}
