//! Backlink view, recomputed on every read.
//!
//! The result is an arena: nodes address their parent and children by index,
//! so the tree serializes without cycles.

use super::NoteGraph;
use crate::links::{candidate_links, resolve_note};
use crate::model::{NoteLink, NoteProps, fname_key};
use serde::{Deserialize, Serialize};

/// Ordering of source notes inside a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklinkSort {
    /// Creation time, oldest first.
    #[default]
    Default,
    /// Last update, newest first.
    LastUpdated,
    /// Fname, ascending.
    PathName,
}

/// Top-level partition of a backlink tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklinkGroup {
    /// Explicit links (wiki links, refs, tags).
    Linked,
    /// Plain-text title mentions.
    Candidates,
}

/// Payload of one arena node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BacklinkNodeKind {
    /// Group header.
    Group {
        /// Which group.
        group: BacklinkGroup,
    },
    /// A note linking to the target.
    Source {
        /// Source note id.
        note_id: String,
        /// Source fname.
        fname: String,
        /// Source vault.
        vault: String,
        /// Source title.
        title: String,
        /// Creation time.
        created: i64,
        /// Last update.
        updated: i64,
    },
    /// One occurrence inside the source note.
    Reference {
        /// The link.
        link: NoteLink,
    },
}

/// Arena node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklinkNode {
    /// Payload.
    pub kind: BacklinkNodeKind,
    /// Parent index; `None` for group nodes.
    pub parent: Option<usize>,
    /// Child indexes in display order.
    pub children: Vec<usize>,
}

/// Options for [`NoteGraph::backlinks`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklinkOptions {
    /// Order of the linked group.
    pub linked_sort: BacklinkSort,
    /// Order of the candidates group.
    pub candidate_sort: BacklinkSort,
    /// Compute the candidates group.
    pub include_candidates: bool,
}

/// Backlinks of one note: group nodes, source nodes and reference nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacklinkTree {
    /// Arena; group nodes come first.
    pub nodes: Vec<BacklinkNode>,
}

impl BacklinkTree {
    fn push(&mut self, kind: BacklinkNodeKind, parent: Option<usize>) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(BacklinkNode {
            kind,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent
            && let Some(node) = self.nodes.get_mut(parent)
        {
            node.children.push(idx);
        }
        idx
    }

    /// Node at `idx`.
    #[must_use]
    pub fn node(&self, idx: usize) -> Option<&BacklinkNode> {
        self.nodes.get(idx)
    }

    /// Parent of `idx`.
    #[must_use]
    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.nodes.get(idx).and_then(|node| node.parent)
    }

    /// Index of a group node.
    #[must_use]
    pub fn group(&self, group: BacklinkGroup) -> Option<usize> {
        self.nodes.iter().position(|node| {
            matches!(node.kind, BacklinkNodeKind::Group { group: found } if found == group)
        })
    }

    /// Source note ids of a group, in display order.
    #[must_use]
    pub fn source_ids(&self, group: BacklinkGroup) -> Vec<&str> {
        let Some(group_idx) = self.group(group) else {
            return Vec::new();
        };
        self.nodes[group_idx]
            .children
            .iter()
            .filter_map(|idx| match &self.nodes.get(*idx)?.kind {
                BacklinkNodeKind::Source { note_id, .. } => Some(note_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Links under the source node for `note_id` in `group`.
    #[must_use]
    pub fn references(&self, group: BacklinkGroup, note_id: &str) -> Vec<&NoteLink> {
        let Some(group_idx) = self.group(group) else {
            return Vec::new();
        };
        self.nodes[group_idx]
            .children
            .iter()
            .filter_map(|idx| self.nodes.get(*idx))
            .find(|node| {
                matches!(&node.kind, BacklinkNodeKind::Source { note_id: id, .. } if id == note_id)
            })
            .map(|source| {
                source
                    .children
                    .iter()
                    .filter_map(|idx| match &self.nodes.get(*idx)?.kind {
                        BacklinkNodeKind::Reference { link } => Some(link),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether neither group has sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes
            .iter()
            .all(|node| matches!(node.kind, BacklinkNodeKind::Group { .. }))
    }

    fn add_group(&mut self, group: BacklinkGroup, mut sources: Vec<(&NoteProps, Vec<NoteLink>)>, sort: BacklinkSort) {
        sort_sources(&mut sources, sort);
        let group_idx = self.push(BacklinkNodeKind::Group { group }, None);
        for (source, links) in sources {
            let source_idx = self.push(
                BacklinkNodeKind::Source {
                    note_id: source.id.clone(),
                    fname: source.fname.clone(),
                    vault: source.vault.clone(),
                    title: source.title.clone(),
                    created: source.created,
                    updated: source.updated,
                },
                Some(group_idx),
            );
            for link in links {
                self.push(BacklinkNodeKind::Reference { link }, Some(source_idx));
            }
        }
    }
}

fn sort_sources(sources: &mut [(&NoteProps, Vec<NoteLink>)], sort: BacklinkSort) {
    match sort {
        BacklinkSort::Default => {
            sources.sort_by_key(|(note, _)| (note.created, fname_key(&note.fname), note.vault.clone()));
        }
        BacklinkSort::LastUpdated => sources.sort_by(|(left, _), (right, _)| {
            right
                .updated
                .cmp(&left.updated)
                .then_with(|| fname_key(&left.fname).cmp(&fname_key(&right.fname)))
        }),
        BacklinkSort::PathName => {
            sources.sort_by_key(|(note, _)| (fname_key(&note.fname), note.vault.clone()));
        }
    }
}

impl NoteGraph {
    /// Backlinks of note `id`, grouped per source note.
    ///
    /// Links count when they resolve to the target note; anchors are not
    /// checked. Self-links are excluded. Returns `None` for an unknown id.
    #[must_use]
    pub fn backlinks(&self, id: &str, options: &BacklinkOptions) -> Option<BacklinkTree> {
        let target = self.notes.get(id)?;

        let mut linked: Vec<(&NoteProps, Vec<NoteLink>)> = Vec::new();
        for source in self.notes.values().filter(|note| note.id != target.id) {
            let refs: Vec<NoteLink> = source
                .links
                .iter()
                .filter(|link| link.link_type.is_explicit())
                .filter(|link| {
                    resolve_note(self, &source.vault, &link.to).is_ok_and(|note| note.id == target.id)
                })
                .cloned()
                .collect();
            if !refs.is_empty() {
                linked.push((source, refs));
            }
        }

        let mut tree = BacklinkTree::default();
        tree.add_group(BacklinkGroup::Linked, linked, options.linked_sort);

        if options.include_candidates && !target.stub {
            let candidates: Vec<(&NoteProps, Vec<NoteLink>)> = self
                .notes
                .values()
                .filter(|note| note.id != target.id && !note.stub)
                .filter_map(|source| {
                    let found = candidate_links(source, [target]);
                    (!found.is_empty()).then_some((source, found))
                })
                .collect();
            tree.add_group(BacklinkGroup::Candidates, candidates, options.candidate_sort);
        }
        Some(tree)
    }
}
