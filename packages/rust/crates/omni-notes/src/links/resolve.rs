//! Link target resolution against the current graph.
//!
//! Resolution is always computed from current state; nothing is cached on
//! the link, so backlinks and broken status never go stale.

use super::anchors::has_anchor;
use crate::config::DuplicateNoteBehavior;
use crate::model::{LinkTarget, NoteLink, NoteProps};
use serde::{Deserialize, Serialize};

/// Outcome of resolving one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Target note (and anchors, if any) exist.
    Resolved,
    /// No note with the target fname in the searched vault(s).
    BrokenNote,
    /// Note exists but an anchor does not.
    BrokenAnchor,
    /// The link names a vault the workspace does not declare.
    UnknownVault,
}

impl LinkStatus {
    /// Whether the link is broken in any way.
    #[must_use]
    pub const fn is_broken(self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

/// Read access needed to resolve links.
pub trait NoteLookup {
    /// Declared vault names, in declaration order.
    fn vault_names(&self) -> Vec<&str>;
    /// Policy for unprefixed links that miss in the source vault.
    fn duplicate_behavior(&self) -> &DuplicateNoteBehavior;
    /// Note with `fname` (case-insensitive) in `vault`, including stubs.
    fn note_in_vault(&self, fname: &str, vault: &str) -> Option<&NoteProps>;
}

/// Find the note a target names.
///
/// 1. A vault prefix restricts the lookup to that vault.
/// 2. Otherwise the source vault is searched first.
/// 3. On a miss, [`DuplicateNoteBehavior::UseVault`] tries its vaults in order;
///    the default policy does not look elsewhere.
///
/// # Errors
///
/// Returns [`LinkStatus::UnknownVault`] or [`LinkStatus::BrokenNote`].
pub fn resolve_note<'a, L: NoteLookup + ?Sized>(
    lookup: &'a L,
    source_vault: &str,
    target: &LinkTarget,
) -> Result<&'a NoteProps, LinkStatus> {
    if let Some(vault) = &target.vault {
        if !lookup.vault_names().contains(&vault.as_str()) {
            return Err(LinkStatus::UnknownVault);
        }
        return lookup
            .note_in_vault(&target.fname, vault)
            .ok_or(LinkStatus::BrokenNote);
    }
    if let Some(note) = lookup.note_in_vault(&target.fname, source_vault) {
        return Ok(note);
    }
    match lookup.duplicate_behavior() {
        DuplicateNoteBehavior::SourceVault => Err(LinkStatus::BrokenNote),
        DuplicateNoteBehavior::UseVault(order) => order
            .iter()
            .filter(|vault| vault.as_str() != source_vault)
            .find_map(|vault| lookup.note_in_vault(&target.fname, vault))
            .ok_or(LinkStatus::BrokenNote),
    }
}

/// Resolve a link to its target note and check its anchors.
///
/// # Errors
///
/// Returns the broken [`LinkStatus`].
pub fn resolve_link<'a, L: NoteLookup + ?Sized>(
    lookup: &'a L,
    source_vault: &str,
    link: &NoteLink,
) -> Result<&'a NoteProps, LinkStatus> {
    let note = resolve_note(lookup, source_vault, &link.to)?;
    let anchors_ok = [&link.to.anchor_start, &link.to.anchor_end]
        .into_iter()
        .flatten()
        .all(|anchor| has_anchor(&note.anchors, anchor));
    if anchors_ok {
        Ok(note)
    } else {
        Err(LinkStatus::BrokenAnchor)
    }
}

/// Status of a link from `source`.
#[must_use]
pub fn link_status<L: NoteLookup + ?Sized>(lookup: &L, source: &NoteProps, link: &NoteLink) -> LinkStatus {
    match resolve_link(lookup, &source.vault, link) {
        Ok(_) => LinkStatus::Resolved,
        Err(status) => status,
    }
}

/// Whether a link should be reported as broken (strict kinds only).
#[must_use]
pub fn is_reportable_broken<L: NoteLookup + ?Sized>(
    lookup: &L,
    source: &NoteProps,
    link: &NoteLink,
) -> bool {
    link.link_type.is_strict() && link_status(lookup, source, link).is_broken()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnchorKind, LinkType, NoteAnchor, Position, fname_key};

    struct Fixture {
        vaults: Vec<String>,
        behavior: DuplicateNoteBehavior,
        notes: Vec<NoteProps>,
    }

    impl NoteLookup for Fixture {
        fn vault_names(&self) -> Vec<&str> {
            self.vaults.iter().map(String::as_str).collect()
        }

        fn duplicate_behavior(&self) -> &DuplicateNoteBehavior {
            &self.behavior
        }

        fn note_in_vault(&self, fname: &str, vault: &str) -> Option<&NoteProps> {
            self.notes
                .iter()
                .find(|note| note.vault == vault && fname_key(&note.fname) == fname_key(fname))
        }
    }

    fn fixture(behavior: DuplicateNoteBehavior) -> Fixture {
        let mut x1 = NoteProps::new("x", "v1", "# Intro");
        x1.anchors.push(NoteAnchor {
            kind: AnchorKind::Header,
            value: "intro".to_string(),
            text: "Intro".to_string(),
            depth: Some(1),
            position: Position::default(),
        });
        Fixture {
            vaults: vec!["v1".to_string(), "v2".to_string()],
            behavior,
            notes: vec![x1, NoteProps::new("x", "v2", ""), NoteProps::new("only2", "v2", "")],
        }
    }

    fn wiki(fname: &str) -> NoteLink {
        let (_, to) = crate::links::parse_wiki_inner(fname, "src");
        NoteLink {
            link_type: LinkType::Wiki,
            alias: None,
            to,
            value: format!("[[{fname}]]"),
            position: None,
        }
    }

    #[test]
    fn test_source_vault_wins_for_duplicates() {
        let graph = fixture(DuplicateNoteBehavior::SourceVault);
        let note = resolve_link(&graph, "v1", &wiki("x")).unwrap();
        assert_eq!(note.vault, "v1");
        assert_eq!(resolve_link(&graph, "v1", &wiki("only2")).err(), Some(LinkStatus::BrokenNote));
    }

    #[test]
    fn test_use_vault_policy_falls_back() {
        let graph = fixture(DuplicateNoteBehavior::UseVault(vec!["v2".to_string()]));
        assert_eq!(resolve_link(&graph, "v1", &wiki("only2")).map(|n| n.vault.as_str()), Ok("v2"));
    }

    #[test]
    fn test_prefix_and_anchor_statuses() {
        let graph = fixture(DuplicateNoteBehavior::SourceVault);
        assert_eq!(
            resolve_link(&graph, "v1", &wiki("vault://v2/x")).map(|n| n.vault.as_str()),
            Ok("v2")
        );
        assert_eq!(
            resolve_link(&graph, "v1", &wiki("vault://nope/x")).err(),
            Some(LinkStatus::UnknownVault)
        );
        assert!(resolve_link(&graph, "v1", &wiki("x#Intro")).is_ok());
        assert!(resolve_link(&graph, "v1", &wiki("x#*")).is_ok());
        assert_eq!(
            resolve_link(&graph, "v1", &wiki("x#missing")).err(),
            Some(LinkStatus::BrokenAnchor)
        );
    }
}
