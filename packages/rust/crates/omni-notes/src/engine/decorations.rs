//! Editor decorations: typed ranges for links and anchors.

use crate::graph::NoteGraph;
use crate::links::link_status;
use crate::model::{AnchorKind, LinkType, NoteProps, Position};
use serde::{Deserialize, Serialize};

/// What a decorated range is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecorationKind {
    /// `[[...]]`.
    WikiLink,
    /// `((ref: ...))` or `![[...]]`.
    NoteRef,
    /// `#tag`.
    Hashtag,
    /// `@user`.
    UserTag,
    /// `^block-id`.
    BlockAnchor,
    /// Markdown heading.
    Header,
    /// Plain-text title mention.
    Candidate,
}

/// One decorated range in a note body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    /// Kind.
    pub kind: DecorationKind,
    /// Body range.
    pub range: Position,
    /// Link does not resolve (wiki links and note refs only).
    pub broken: bool,
    /// Target fname for links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

fn link_kind(link_type: LinkType) -> Option<DecorationKind> {
    match link_type {
        LinkType::Wiki => Some(DecorationKind::WikiLink),
        LinkType::Ref => Some(DecorationKind::NoteRef),
        LinkType::Hashtag => Some(DecorationKind::Hashtag),
        LinkType::UserTag => Some(DecorationKind::UserTag),
        LinkType::Candidate => Some(DecorationKind::Candidate),
        LinkType::FrontmatterTag => None,
    }
}

/// Decorations of `note` in body order.
#[must_use]
pub fn note_decorations(graph: &NoteGraph, note: &NoteProps, candidates: bool) -> Vec<Decoration> {
    let candidate_links = if candidates {
        crate::links::candidate_links(note, graph.notes())
    } else {
        Vec::new()
    };
    let mut out: Vec<Decoration> = note
        .links
        .iter()
        .chain(candidate_links.iter())
        .filter_map(|link| {
            let kind = link_kind(link.link_type)?;
            let range = link.position?;
            let broken = link.link_type.is_strict() && link_status(graph, note, link).is_broken();
            Some(Decoration {
                kind,
                range,
                broken,
                target: Some(link.to.fname.clone()),
            })
        })
        .collect();
    out.extend(note.anchors.iter().map(|anchor| Decoration {
        kind: match anchor.kind {
            AnchorKind::Header => DecorationKind::Header,
            AnchorKind::Block => DecorationKind::BlockAnchor,
        },
        range: anchor.position,
        broken: false,
        target: None,
    }));
    out.sort_by_key(|decoration| (decoration.range.start.offset, decoration.range.end.offset));
    out
}
