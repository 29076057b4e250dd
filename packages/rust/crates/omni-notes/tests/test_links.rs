//! Integration tests for link resolution across vaults.

use omni_notes::links::{resolve_link, resolve_note};
use omni_notes::model::LinkTarget;
use omni_notes::{DuplicateNoteBehavior, LinkStatus, LinkType, NoteChangeEntry, NoteGraph, NoteProps};

fn graph_with(
    behavior: DuplicateNoteBehavior,
    notes: Vec<NoteProps>,
) -> Result<NoteGraph, Box<dyn std::error::Error>> {
    let mut graph = NoteGraph::new(vec!["v1".to_string(), "v2".to_string()], behavior);
    graph.apply_changes(notes.into_iter().map(NoteChangeEntry::create).collect())?;
    Ok(graph)
}

fn id_of(graph: &NoteGraph, fname: &str, vault: &str) -> Result<String, Box<dyn std::error::Error>> {
    Ok(graph
        .note_by_loc(fname, vault)
        .map(|note| note.id.clone())
        .ok_or_else(|| format!("{vault}/{fname} not found"))?)
}

#[test]
fn test_unprefixed_link_prefers_source_vault() -> Result<(), Box<dyn std::error::Error>> {
    let graph = graph_with(
        DuplicateNoteBehavior::SourceVault,
        vec![
            NoteProps::new("x", "v1", "in v1"),
            NoteProps::new("x", "v2", "in v2"),
            NoteProps::new("src", "v1", "go to [[x]]"),
        ],
    )?;
    let src = id_of(&graph, "src", "v1")?;
    let x1 = id_of(&graph, "x", "v1")?;

    let links = graph.links_with_status(&src);
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].1, LinkStatus::Resolved);
    let target = resolve_link(&graph, "v1", &links[0].0).map_err(|status| format!("{status:?}"))?;
    assert_eq!(target.id, x1);
    Ok(())
}

#[test]
fn test_use_vault_policy_and_prefixes() -> Result<(), Box<dyn std::error::Error>> {
    let graph = graph_with(
        DuplicateNoteBehavior::UseVault(vec!["v2".to_string()]),
        vec![
            NoteProps::new("only.two", "v2", "# Heading\n"),
            NoteProps::new(
                "src",
                "v1",
                "[[only.two]] [[vault://v2/only.two#heading]] [[vault://v1/only.two]] [[vault://nope/x]] [[only.two#nothing]]",
            ),
        ],
    )?;
    let src = id_of(&graph, "src", "v1")?;
    let statuses: Vec<LinkStatus> = graph
        .links_with_status(&src)
        .into_iter()
        .map(|(_, status)| status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            LinkStatus::Resolved,
            LinkStatus::Resolved,
            LinkStatus::BrokenNote,
            LinkStatus::UnknownVault,
            LinkStatus::BrokenAnchor,
        ]
    );
    assert_eq!(graph.broken_links(None).len(), 3);
    Ok(())
}

#[test]
fn test_source_vault_policy_does_not_fall_back() -> Result<(), Box<dyn std::error::Error>> {
    let graph = graph_with(
        DuplicateNoteBehavior::SourceVault,
        vec![NoteProps::new("only.two", "v2", "")],
    )?;
    assert_eq!(
        resolve_note(&graph, "v1", &LinkTarget::to_fname("only.two")).err(),
        Some(LinkStatus::BrokenNote)
    );
    Ok(())
}

#[test]
fn test_implicit_links_are_never_reported_broken() -> Result<(), Box<dyn std::error::Error>> {
    let mut note = NoteProps::new("src", "v1", "#someday and @nobody\n");
    note.tags = vec!["unfiled".to_string()];
    let graph = graph_with(DuplicateNoteBehavior::SourceVault, vec![note])?;
    let src = id_of(&graph, "src", "v1")?;

    let links = graph.links_with_status(&src);
    let kinds: Vec<LinkType> = links.iter().map(|(link, _)| link.link_type).collect();
    assert!(kinds.contains(&LinkType::Hashtag));
    assert!(kinds.contains(&LinkType::UserTag));
    assert!(kinds.contains(&LinkType::FrontmatterTag));
    assert!(links.iter().all(|(_, status)| *status == LinkStatus::BrokenNote));
    assert!(graph.broken_links(None).is_empty());
    Ok(())
}

#[test]
fn test_hierarchy_stubs_satisfy_links() -> Result<(), Box<dyn std::error::Error>> {
    let graph = graph_with(
        DuplicateNoteBehavior::SourceVault,
        vec![
            NoteProps::new("a.b.c", "v1", ""),
            NoteProps::new("src", "v1", "[[a.b]] and ![[a]]"),
        ],
    )?;
    let src = id_of(&graph, "src", "v1")?;
    assert!(
        graph
            .links_with_status(&src)
            .iter()
            .all(|(_, status)| *status == LinkStatus::Resolved)
    );
    Ok(())
}
