//! Integration tests for doctor repairs run through the engine.

use omni_notes::storage::derived_note_id;
use omni_notes::{
    DoctorAction, DoctorCandidates, DoctorOptions, DoctorService, LinkStatus, NoteEngine, Vault,
    WorkspaceConfig,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn write_file(path: &Path, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

async fn engine_with(tmp: &TempDir, files: &[(&str, &str)]) -> Result<NoteEngine, Box<dyn std::error::Error>> {
    for (name, content) in files {
        write_file(&tmp.path().join("main").join(name), content)?;
    }
    let config = WorkspaceConfig::new(tmp.path(), vec![Vault::new("main", tmp.path().join("main"))]);
    let engine = NoteEngine::new(config);
    engine.init().await?;
    Ok(engine)
}

#[tokio::test]
async fn test_missing_link_target_is_created_once() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine_with(
        &tmp,
        &[
            ("alpha.md", "See [[missing]] and again [[missing]].\n"),
            ("beta.md", "Also [[Missing|missing]].\n"),
        ],
    )
    .await?;
    let doctor = DoctorService::new(engine.clone());

    let found = doctor.run(&DoctorOptions::new(DoctorAction::FindBrokenLinks)).await?;
    assert_eq!(found.findings.len(), 3);
    assert!(found.findings.iter().all(|link| link.status == LinkStatus::BrokenNote));
    assert!(found.is_noop());

    let created = doctor
        .run(&DoctorOptions::new(DoctorAction::CreateMissingLinkedNotes))
        .await?;
    assert_eq!(created.changed_ids.len(), 1);
    assert!(tmp.path().join("main/missing.md").is_file());
    let note = engine.get_note(&created.changed_ids[0]).ok_or("placeholder not loaded")?;
    assert_eq!(note.fname, "missing");

    let again = doctor
        .run(&DoctorOptions::new(DoctorAction::CreateMissingLinkedNotes))
        .await?;
    assert!(again.findings.is_empty());
    assert!(again.is_noop());
    Ok(())
}

#[tokio::test]
async fn test_h1_to_title_moves_heading_into_frontmatter() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine_with(
        &tmp,
        &[
            ("post.md", "---\nid: post\n---\n# Hello World\n\nBody text.\n"),
            ("two.md", "---\nid: two\n---\n# One\n\n# Two\n"),
        ],
    )
    .await?;
    let doctor = DoctorService::new(engine.clone());

    let report = doctor.run(&DoctorOptions::new(DoctorAction::H1ToTitle)).await?;
    assert_eq!(report.changed_ids, vec!["post".to_string()]);
    let post = engine.get_note("post").ok_or("post missing")?;
    assert_eq!(post.title, "Hello World");
    assert_eq!(post.body, "Body text.\n");
    let on_disk = fs::read_to_string(tmp.path().join("main/post.md"))?;
    assert!(on_disk.contains("title: Hello World"));

    assert!(doctor.run(&DoctorOptions::new(DoctorAction::H1ToTitle)).await?.is_noop());
    Ok(())
}

#[tokio::test]
async fn test_h1_to_h2_skips_code_blocks() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine_with(
        &tmp,
        &[(
            "doc.md",
            "---\nid: doc\n---\n# Top\ntext\n```\n# not a heading\n```\n# Second\n",
        )],
    )
    .await?;
    let doctor = DoctorService::new(engine.clone());

    let report = doctor.run(&DoctorOptions::new(DoctorAction::HIToH2)).await?;
    assert_eq!(report.changed_ids, vec!["doc".to_string()]);
    let doc = engine.get_note("doc").ok_or("doc missing")?;
    assert_eq!(doc.body, "## Top\ntext\n```\n# not a heading\n```\n## Second\n");

    assert!(doctor.run(&DoctorOptions::new(DoctorAction::HIToH2)).await?.is_noop());
    Ok(())
}

#[tokio::test]
async fn test_remove_stubs_deletes_only_empty_stub_files() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine_with(
        &tmp,
        &[
            ("empty.md", "---\nid: empty\nstub: true\n---\n"),
            ("kept.md", "---\nid: kept\nstub: true\n---\nsomething written\n"),
            ("deep.a.b.md", "leaf\n"),
        ],
    )
    .await?;
    let doctor = DoctorService::new(engine.clone());

    let report = doctor.run(&DoctorOptions::new(DoctorAction::RemoveStubs)).await?;
    assert_eq!(report.changed_ids, vec!["empty".to_string()]);
    assert!(!tmp.path().join("main/empty.md").exists());
    assert!(tmp.path().join("main/kept.md").is_file());
    assert!(engine.with_graph(|graph| graph.note_by_loc("deep.a", "main").is_some()));

    assert!(doctor.run(&DoctorOptions::new(DoctorAction::RemoveStubs)).await?.is_noop());
    Ok(())
}

#[tokio::test]
async fn test_regenerate_ids_respects_limit() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine_with(
        &tmp,
        &[
            ("one.md", "no id here\n"),
            ("two.md", "none here either\n"),
            ("three.md", "---\nid: stable-id\n---\nkeeps its id\n"),
        ],
    )
    .await?;
    let doctor = DoctorService::new(engine.clone());
    let derived_one = derived_note_id("main", "one");

    let first = doctor
        .run(&DoctorOptions::new(DoctorAction::RegenerateNoteId).with_limit(1))
        .await?;
    assert!(first.truncated);
    assert_eq!(first.changed_ids.len(), 1);

    let second = doctor.run(&DoctorOptions::new(DoctorAction::RegenerateNoteId)).await?;
    assert!(!second.truncated);
    assert_eq!(second.changed_ids.len(), 1);

    assert!(engine.get_note(&derived_one).is_none());
    let one = engine
        .with_graph(|graph| graph.note_by_loc("one", "main").cloned())
        .ok_or("one missing")?;
    assert_ne!(one.id, derived_one);
    assert_eq!(one.body, "no id here\n");
    assert!(fs::read_to_string(tmp.path().join("main/one.md"))?.contains(&format!("id: {}", one.id)));
    assert!(engine.get_note("stable-id").is_some());

    assert!(doctor.run(&DoctorOptions::new(DoctorAction::RegenerateNoteId)).await?.is_noop());
    Ok(())
}

#[tokio::test]
async fn test_fix_invalid_file_names_renames_file() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine_with(
        &tmp,
        &[
            ("bad#name.md", "---\nid: bad\n---\nbody\n"),
            ("ok.md", "---\nid: ok\n---\nfine\n"),
        ],
    )
    .await?;
    let doctor = DoctorService::new(engine.clone());

    let report = doctor
        .run(&DoctorOptions::new(DoctorAction::FixInvalidFileNames))
        .await?;
    assert_eq!(report.changed_ids, vec!["bad".to_string()]);
    assert!(!tmp.path().join("main/bad#name.md").exists());
    assert!(tmp.path().join("main/bad-name.md").is_file());
    assert_eq!(engine.get_note("bad").map(|note| note.fname), Some("bad-name".to_string()));

    assert!(
        doctor
            .run(&DoctorOptions::new(DoctorAction::FixInvalidFileNames))
            .await?
            .is_noop()
    );
    Ok(())
}

#[tokio::test]
async fn test_candidates_restrict_the_run() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = engine_with(
        &tmp,
        &[
            ("a.md", "---\nid: a\n---\n# A\n"),
            ("b.md", "---\nid: b\n---\n# B\n"),
        ],
    )
    .await?;
    let doctor = DoctorService::new(engine.clone());

    let opts = DoctorOptions::new(DoctorAction::HIToH2).with_candidates(DoctorCandidates::Ids(vec![
        "b".to_string(),
        "b".to_string(),
        "unknown".to_string(),
    ]));
    let report = doctor.run(&opts).await?;
    assert_eq!(report.changed_ids, vec!["b".to_string()]);
    assert_eq!(engine.get_note("a").map(|note| note.body), Some("# A\n".to_string()));
    Ok(())
}

#[test]
fn test_doctor_action_names_parse() -> TestResult {
    assert_eq!("create-missing-linked-notes".parse::<DoctorAction>()?, DoctorAction::CreateMissingLinkedNotes);
    assert_eq!("HI_TO_H2".parse::<DoctorAction>()?, DoctorAction::HIToH2);
    assert!("unknown".parse::<DoctorAction>().is_err());
    Ok(())
}
