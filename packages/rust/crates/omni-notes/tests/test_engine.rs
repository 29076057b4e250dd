//! Integration tests for the async engine facade.

use omni_notes::engine::discovery::{PortCaller, read_port_file};
use omni_notes::engine::{LoadProgress, ProgressFn};
use omni_notes::storage::parse_schema_module;
use omni_notes::{
    BacklinkGroup, BacklinkOptions, ChangeStatus, DeleteNoteOpts, EngineError, GetNoteByPathOpts,
    LinkStatus, NoteEngine, NoteLoc, NoteProps, NoteSyncState, QueryOptions, RenameNoteOpts, Vault,
    StorageDriver, VaultStatus, WorkspaceConfig, WriteNoteOpts,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn write_file(path: &Path, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

fn single_vault(tmp: &TempDir) -> WorkspaceConfig {
    WorkspaceConfig::new(tmp.path(), vec![Vault::new("main", tmp.path().join("main"))])
}

fn id_of(engine: &NoteEngine, fname: &str, vault: &str) -> Result<String, Box<dyn std::error::Error>> {
    engine
        .with_graph(|graph| graph.note_by_loc(fname, vault).map(|note| note.id.clone()))
        .ok_or_else(|| format!("{vault}/{fname} not loaded").into())
}

#[tokio::test]
async fn test_init_alpha_links_to_beta() -> TestResult {
    let tmp = TempDir::new()?;
    write_file(&tmp.path().join("main/alpha.md"), "[[beta]]\n")?;
    write_file(&tmp.path().join("main/beta.md"), "")?;
    let engine = NoteEngine::new(single_vault(&tmp));

    let report = engine.init().await?;
    assert_eq!(report.vaults.len(), 1);
    assert_eq!(report.vaults[0].status, VaultStatus::Loaded);
    assert!(report.errors.is_empty());

    let alpha = id_of(&engine, "alpha", "main")?;
    let beta = id_of(&engine, "beta", "main")?;
    let tree = engine.get_backlinks(&beta, &BacklinkOptions::default())?;
    assert_eq!(tree.source_ids(BacklinkGroup::Linked), vec![alpha.as_str()]);
    assert_eq!(engine.note_state(&alpha), NoteSyncState::Loaded);

    let links = engine.get_links(&alpha)?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].1, LinkStatus::Resolved);
    Ok(())
}

#[tokio::test]
async fn test_init_synthesizes_hierarchy_stubs() -> TestResult {
    let tmp = TempDir::new()?;
    write_file(&tmp.path().join("main/a.b.c.md"), "leaf\n")?;
    let engine = NoteEngine::new(single_vault(&tmp));
    engine.init().await?;

    let leaf = id_of(&engine, "a.b.c", "main")?;
    let children = engine.with_graph(|graph| {
        graph
            .note_by_loc("a.b", "main")
            .filter(|note| note.stub)
            .map(|note| note.children.clone())
    });
    assert_eq!(children, Some(vec![leaf]));
    assert!(engine.with_graph(|graph| graph.note_by_loc("a", "main").is_some_and(|note| note.stub)));

    // A second sync with no file changes reports nothing.
    assert_eq!(engine.sync().await?.changed, 0);
    Ok(())
}

#[tokio::test]
async fn test_same_fname_in_two_vaults_resolves_locally() -> TestResult {
    let tmp = TempDir::new()?;
    write_file(&tmp.path().join("one/x.md"), "---\nid: x-one\n---\n")?;
    write_file(&tmp.path().join("two/x.md"), "---\nid: x-two\n---\n")?;
    write_file(&tmp.path().join("one/src.md"), "[[x]]\n")?;
    let config = WorkspaceConfig::new(
        tmp.path(),
        vec![
            Vault::new("one", tmp.path().join("one")),
            Vault::new("two", tmp.path().join("two")),
        ],
    );
    let engine = NoteEngine::new(config);
    engine.init().await?;

    let src = id_of(&engine, "src", "one")?;
    let one = engine.get_backlinks("x-one", &BacklinkOptions::default())?;
    let two = engine.get_backlinks("x-two", &BacklinkOptions::default())?;
    assert_eq!(one.source_ids(BacklinkGroup::Linked), vec![src.as_str()]);
    assert!(two.source_ids(BacklinkGroup::Linked).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_vault_does_not_block_siblings() -> TestResult {
    let tmp = TempDir::new()?;
    write_file(&tmp.path().join("present/note.md"), "hi\n")?;
    let config = WorkspaceConfig::new(
        tmp.path(),
        vec![
            Vault::new("absent", tmp.path().join("absent")),
            Vault::new("present", tmp.path().join("present")),
        ],
    );
    let engine = NoteEngine::new(config);

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let progress: ProgressFn = Arc::new(move |step: &LoadProgress| {
        assert_eq!(step.total, 2);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let report = engine.sync_with_progress(progress).await?;

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(report.vaults[0].status, VaultStatus::Missing);
    assert_eq!(report.vaults[1].status, VaultStatus::Loaded);
    assert!(engine.with_graph(|graph| graph.note_by_loc("note", "present").is_some()));
    Ok(())
}

#[tokio::test]
async fn test_operations_require_init() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = NoteEngine::new(single_vault(&tmp));
    assert!(matches!(
        engine.query_notes_sync("x", &QueryOptions::default()),
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(engine.sync().await, Err(EngineError::NotInitialized)));
    Ok(())
}

#[tokio::test]
async fn test_write_update_delete_lifecycle() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = NoteEngine::new(single_vault(&tmp));
    engine.init().await?;

    let note = NoteProps::new("proj.plan", "main", "first\n");
    let id = note.id.clone();
    engine.write_note(note, WriteNoteOpts::default()).await?;
    assert!(tmp.path().join("main/proj.plan.md").is_file());
    assert_eq!(engine.note_state(&id), NoteSyncState::Loaded);

    let mut edited = engine.get_note(&id).ok_or("written note missing")?;
    edited.body = "second\n".to_string();
    engine.update_note(edited.clone()).await?;
    assert_eq!(engine.note_state(&id), NoteSyncState::Dirty);
    assert!(fs::read_to_string(tmp.path().join("main/proj.plan.md"))?.ends_with("first\n"));

    let pending = engine.delete_note(&id, DeleteNoteOpts::default()).await;
    assert!(matches!(pending, Err(EngineError::PendingWrite(_))));

    engine.write_note(edited, WriteNoteOpts::default()).await?;
    assert_eq!(engine.note_state(&id), NoteSyncState::Loaded);
    assert!(fs::read_to_string(tmp.path().join("main/proj.plan.md"))?.ends_with("second\n"));

    let child = NoteProps::new("proj.plan.step", "main", "");
    let child_id = child.id.clone();
    engine.write_note(child, WriteNoteOpts::default()).await?;

    engine.delete_note(&id, DeleteNoteOpts::default()).await?;
    assert_eq!(engine.note_state(&id), NoteSyncState::Deleted);
    assert!(!tmp.path().join("main/proj.plan.md").exists());
    assert!(engine.get_note(&child_id).is_some());
    assert!(tmp.path().join("main/proj.plan.step.md").is_file());
    Ok(())
}

#[tokio::test]
async fn test_write_rejects_conflicts_and_bad_names() -> TestResult {
    let tmp = TempDir::new()?;
    write_file(&tmp.path().join("main/taken.md"), "---\nid: taken\n---\n")?;
    let engine = NoteEngine::new(single_vault(&tmp));
    engine.init().await?;

    let clash = engine
        .write_note(NoteProps::new("taken", "main", ""), WriteNoteOpts::default())
        .await;
    assert!(matches!(clash, Err(EngineError::NoteExists { .. })));

    let bad = engine
        .write_note(NoteProps::new("bad..name", "main", ""), WriteNoteOpts::default())
        .await;
    assert!(matches!(bad, Err(EngineError::InvalidFname { .. })));

    let unknown = engine
        .write_note(NoteProps::new("x", "elsewhere", ""), WriteNoteOpts::default())
        .await;
    assert!(matches!(unknown, Err(EngineError::VaultNotFound(_))));

    let replaced = engine
        .write_note(
            NoteProps::new("taken", "main", "replaced\n"),
            WriteNoteOpts { update_existing: true },
        )
        .await?;
    assert!(replaced.iter().any(|entry| entry.note.id == "taken"));

    let root = id_of(&engine, "root", "main")?;
    let reserved = engine.delete_note(&root, DeleteNoteOpts::default()).await;
    assert!(matches!(reserved, Err(EngineError::ReservedNote(_))));
    Ok(())
}

#[tokio::test]
async fn test_rename_rewrites_inbound_links_in_one_batch() -> TestResult {
    let tmp = TempDir::new()?;
    write_file(&tmp.path().join("main/alpha.md"), "See [[Beta|beta#intro]] and [[beta]].\n")?;
    write_file(&tmp.path().join("main/beta.md"), "---\nid: beta\n---\n# Intro\n")?;
    let engine = NoteEngine::new(single_vault(&tmp));
    engine.init().await?;
    let mut events = engine.subscribe();

    let changes = engine
        .rename_note(&RenameNoteOpts {
            old_loc: NoteLoc::new("beta", "main"),
            new_loc: NoteLoc::new("archive.beta", "main"),
        })
        .await?;
    assert!(changes.iter().any(|entry| entry.note.id == "beta"));

    let batch = events.try_recv()?;
    assert!(!batch.is_empty());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    assert!(!tmp.path().join("main/beta.md").exists());
    assert!(tmp.path().join("main/archive.beta.md").is_file());
    let alpha = fs::read_to_string(tmp.path().join("main/alpha.md"))?;
    assert!(alpha.ends_with("See [[Beta|archive.beta#intro]] and [[archive.beta]].\n"));

    let renamed = engine.get_note("beta").ok_or("renamed note missing")?;
    assert_eq!(renamed.fname, "archive.beta");
    assert!(engine.broken_links(None)?.is_empty());
    Ok(())
}

async fn disk_body(tmp: &TempDir, fname: &str) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let vault = Vault::new("main", tmp.path().join("main"));
    let note = StorageDriver::new(false).read_note(&vault, fname).await?;
    Ok(note.map(|note| note.body))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_to_one_fname_keep_disk_and_graph_equal() -> TestResult {
    for _ in 0..10 {
        let tmp = TempDir::new()?;
        let engine = NoteEngine::new(single_vault(&tmp));
        engine.init().await?;

        let first = NoteProps::new("shared", "main", "FIRST\n");
        let second = NoteProps::new("shared", "main", "SECOND\n");
        let (left, right) = tokio::join!(
            engine.write_note(first, WriteNoteOpts::default()),
            engine.write_note(second, WriteNoteOpts::default()),
        );
        assert_eq!(usize::from(left.is_ok()) + usize::from(right.is_ok()), 1);
        let loser = if left.is_ok() { right } else { left };
        assert!(matches!(loser, Err(EngineError::NoteExists { .. })));

        let in_graph = engine
            .with_graph(|graph| graph.note_by_loc("shared", "main").map(|note| note.body.clone()))
            .ok_or("shared missing from graph")?;
        assert_eq!(disk_body(&tmp, "shared").await?, Some(in_graph));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rename_racing_an_inbound_edit_keeps_disk_and_graph_equal() -> TestResult {
    for _ in 0..10 {
        let tmp = TempDir::new()?;
        write_file(&tmp.path().join("main/beta.md"), "---\nid: beta\n---\nbeta\n")?;
        write_file(&tmp.path().join("main/gamma.md"), "---\nid: gamma\n---\nno links yet\n")?;
        let engine = NoteEngine::new(single_vault(&tmp));
        engine.init().await?;

        let mut gamma = engine.get_note("gamma").ok_or("gamma missing")?;
        gamma.body = "now [[beta]]\n".to_string();
        let rename = RenameNoteOpts {
            old_loc: NoteLoc::new("beta", "main"),
            new_loc: NoteLoc::new("archive.beta", "main"),
        };
        let (renamed, written) = tokio::join!(
            engine.rename_note(&rename),
            engine.write_note(gamma, WriteNoteOpts::default()),
        );
        renamed?;
        written?;

        assert!(tmp.path().join("main/archive.beta.md").is_file());
        assert!(!tmp.path().join("main/beta.md").exists());
        let in_graph = engine.get_note("gamma").ok_or("gamma missing")?.body;
        assert_eq!(disk_body(&tmp, "gamma").await?, Some(in_graph.clone()));
        assert!(in_graph == "now [[archive.beta]]\n" || in_graph == "now [[beta]]\n");
    }
    Ok(())
}

#[tokio::test]
async fn test_sync_publishes_external_edits() -> TestResult {
    let tmp = TempDir::new()?;
    write_file(&tmp.path().join("main/a.md"), "---\nid: a\n---\nfirst\n")?;
    let engine = NoteEngine::new(single_vault(&tmp));
    engine.init().await?;
    let mut events = engine.subscribe();

    write_file(&tmp.path().join("main/a.md"), "---\nid: a\n---\nchanged\n")?;
    write_file(&tmp.path().join("main/b.md"), "---\nid: b\n---\nnew\n")?;
    let report = engine.sync().await?;

    // The vault root also changes: it gains `b` as a child.
    let batch = events.recv().await?;
    assert_eq!(report.changed, batch.len());
    assert_eq!(batch.len(), 3);
    let statuses: Vec<(String, ChangeStatus)> = batch
        .iter()
        .map(|entry| (entry.note.id.clone(), entry.status))
        .collect();
    assert!(statuses.contains(&("a".to_string(), ChangeStatus::Update)));
    assert!(statuses.contains(&("b".to_string(), ChangeStatus::Create)));
    assert_eq!(engine.get_note("a").map(|note| note.body), Some("changed\n".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_schema_write_assigns_and_delete_clears() -> TestResult {
    let tmp = TempDir::new()?;
    write_file(&tmp.path().join("main/daily.journal.2024.md"), "")?;
    let engine = NoteEngine::new(single_vault(&tmp));
    engine.init().await?;

    let module = parse_schema_module(
        "version: 1\nschemas:\n  - id: daily\n    parent: root\n    children: [journal]\n  - id: journal\n    namespace: true\n",
        "daily",
        "main",
    )?;
    let changes = engine.write_schema(module).await?;
    assert!(tmp.path().join("main/daily.schema.yml").is_file());
    assert!(!changes.is_empty());

    let note_id = id_of(&engine, "daily.journal.2024", "main")?;
    let schema = engine.get_note(&note_id).and_then(|note| note.schema);
    assert_eq!(schema.map(|schema| schema.schema_id).as_deref(), Some("journal"));
    assert_eq!(engine.query_schemas("dai")?.len(), 1);

    engine.delete_schema("daily").await?;
    assert!(engine.get_note(&note_id).and_then(|note| note.schema).is_none());
    assert!(matches!(
        engine.delete_schema("daily").await,
        Err(EngineError::SchemaNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_get_note_by_path_creates_when_asked() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = NoteEngine::new(single_vault(&tmp));
    engine.init().await?;

    let opts = GetNoteByPathOpts {
        fname: "inbox.today".to_string(),
        vault: Some("main".to_string()),
        create_if_new: false,
    };
    assert!(engine.get_note_by_path(&opts).await?.note.is_none());

    let created = engine
        .get_note_by_path(&GetNoteByPathOpts {
            create_if_new: true,
            ..opts.clone()
        })
        .await?;
    let note = created.note.ok_or("note was not created")?;
    assert!(!created.changes.is_empty());
    assert!(tmp.path().join("main/inbox.today.md").is_file());

    let again = engine.get_note_by_path(&opts).await?;
    assert_eq!(again.note.map(|found| found.id), Some(note.id));
    Ok(())
}

#[tokio::test]
async fn test_dispose_removes_port_files() -> TestResult {
    let tmp = TempDir::new()?;
    let engine = NoteEngine::new(single_vault(&tmp));
    engine.init().await?;

    let path = engine.write_port_file(43_117, PortCaller::Workspace).await?;
    assert!(path.is_file());
    assert_eq!(read_port_file(tmp.path(), PortCaller::Workspace).await?, Some(43_117));

    engine.dispose().await?;
    assert!(!path.exists());
    assert!(!engine.is_initialized());
    assert!(engine.get_note("anything").is_none());
    Ok(())
}
