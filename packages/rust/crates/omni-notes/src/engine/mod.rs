//! Engine facade: the single entry point over storage, links and the graph.
//!
//! Modular design:
//! - `mod.rs`: `NoteEngine` lifecycle, note CRUD, queries
//! - `events.rs`: change-batch broadcast bus
//! - `gate.rs`: per-note mutation serialization
//! - `pool.rs`: bounded-concurrency task pool
//! - `discovery.rs`: port files
//! - `decorations.rs`: editor ranges
//! - `rename.rs`: rename planning and link rewriting
//!
//! `NoteEngine` is a cheap handle (`Clone` shares state), created with
//! [`NoteEngine::new`], started with [`NoteEngine::init`] and released with
//! [`NoteEngine::dispose`]. No state is global.

pub mod decorations;
pub mod discovery;
pub mod events;
pub mod gate;
pub mod pool;
pub mod rename;

use crate::config::WorkspaceConfig;
use crate::error::{EngineError, EngineResult, LoadError};
use crate::graph::{
    BacklinkOptions, BacklinkTree, BrokenLink, GraphStats, NoteGraph, QueryOptions, SchemaIssue,
    SharedGraph, read_lock, write_lock,
};
use crate::links::{LinkStatus, candidate_links};
use crate::model::{
    NoteAnchor, NoteChangeEntry, NoteLink, NoteLoc, NoteProps, SchemaModule, Vault, fname_key,
    fname_problem, now_millis,
};
use crate::storage::{StorageDriver, VaultLoad, VaultStatus, validate_schema_module};
use decorations::{Decoration, note_decorations};
use discovery::PortCaller;
use events::{ChangeBatch, NoteEventBus};
use gate::{NoteGate, location_key};
use pool::TaskPool;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Gate rounds before a mutation whose target keeps moving gives up.
const MAX_GATE_ROUNDS: usize = 4;

/// Sync state of one note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteSyncState {
    /// Not in the graph.
    Unloaded,
    /// In the graph and matching its file (or an in-memory stub).
    Loaded,
    /// Changed in memory; a write is pending.
    Dirty,
    /// Removed.
    Deleted,
}

/// Per-vault outcome of a load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultReport {
    /// Vault name.
    pub vault: String,
    /// Outcome.
    pub status: VaultStatus,
    /// Notes read from disk.
    pub notes: usize,
    /// Notes whose metadata came from the cache.
    pub cache_hits: usize,
}

/// Result of [`NoteEngine::init`] or [`NoteEngine::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// One entry per declared vault.
    pub vaults: Vec<VaultReport>,
    /// Files left out of the graph.
    pub errors: Vec<LoadError>,
    /// Notes in the graph afterwards, stubs included.
    pub notes: usize,
    /// Schema modules in the graph afterwards.
    pub schemas: usize,
    /// Notes created, updated or deleted relative to the previous graph.
    pub changed: usize,
}

/// Progress of a full load: called once per finished vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    /// Vault that finished.
    pub vault: String,
    /// Its outcome.
    pub status: VaultStatus,
    /// Vaults finished so far.
    pub done: usize,
    /// Vaults in total.
    pub total: usize,
}

/// Callback receiving [`LoadProgress`].
pub type ProgressFn = Arc<dyn Fn(&LoadProgress) + Send + Sync>;

/// Options for [`NoteEngine::write_note`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteNoteOpts {
    /// When another authored note holds the fname, overwrite it and keep its id.
    pub update_existing: bool,
}

/// Options for [`NoteEngine::delete_note`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteNoteOpts {
    /// Delete even if an in-memory update has not been written.
    pub discard_pending: bool,
}

/// Options for [`NoteEngine::get_note_by_path`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetNoteByPathOpts {
    /// Note name.
    pub fname: String,
    /// Vault; `None` searches vaults in declaration order.
    pub vault: Option<String>,
    /// Create (and write) an empty note when none exists or only a stub does.
    pub create_if_new: bool,
}

/// Result of [`NoteEngine::get_note_by_path`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetNoteResult {
    /// The note, if found or created.
    pub note: Option<NoteProps>,
    /// Changes made when the note was created.
    pub changes: Vec<NoteChangeEntry>,
}

/// Options for [`NoteEngine::rename_note`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameNoteOpts {
    /// Current location.
    pub old_loc: NoteLoc,
    /// New location.
    pub new_loc: NoteLoc,
}

struct EngineInner {
    config: WorkspaceConfig,
    storage: StorageDriver,
    graph: SharedGraph,
    load_errors: RwLock<Vec<LoadError>>,
    vault_reports: RwLock<Vec<VaultReport>>,
    states: RwLock<HashMap<String, NoteSyncState>>,
    port_files: RwLock<Vec<PortCaller>>,
    gate: NoteGate,
    pool: TaskPool,
    events: NoteEventBus,
    initialized: AtomicBool,
}

/// Note engine handle.
#[derive(Clone)]
pub struct NoteEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for NoteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteEngine")
            .field("root", &self.inner.config.root)
            .field("vaults", &self.inner.config.vaults.len())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl NoteEngine {
    /// Engine over `config`; nothing is read until [`Self::init`].
    #[must_use]
    pub fn new(config: WorkspaceConfig) -> Self {
        let vault_names: Vec<String> = config.vaults.iter().map(|vault| vault.name.clone()).collect();
        let graph = NoteGraph::new(vault_names, config.duplicate_note_behavior.clone());
        Self {
            inner: Arc::new(EngineInner {
                storage: StorageDriver::new(config.enable_cache),
                graph: Arc::new(RwLock::new(graph)),
                load_errors: RwLock::new(Vec::new()),
                vault_reports: RwLock::new(Vec::new()),
                states: RwLock::new(HashMap::new()),
                port_files: RwLock::new(Vec::new()),
                gate: NoteGate::default(),
                pool: TaskPool::new(config.max_concurrency),
                events: NoteEventBus::new(config.event_capacity),
                initialized: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Workspace configuration.
    #[must_use]
    pub fn config(&self) -> &WorkspaceConfig {
        &self.inner.config
    }

    /// Shared batch pool.
    #[must_use]
    pub fn pool(&self) -> &TaskPool {
        &self.inner.pool
    }

    /// Whether [`Self::init`] has completed and [`Self::dispose`] has not run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    fn ensure_init(&self) -> EngineResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    fn vault(&self, name: &str) -> EngineResult<&Vault> {
        self.inner
            .config
            .vault(name)
            .ok_or_else(|| EngineError::VaultNotFound(name.to_string()))
    }

    fn set_state(&self, id: &str, state: NoteSyncState) {
        write_lock(&self.inner.states).insert(id.to_string(), state);
    }

    fn publish(&self, changes: &[NoteChangeEntry]) {
        {
            let mut states = write_lock(&self.inner.states);
            for entry in changes {
                let state = match entry.status {
                    crate::model::ChangeStatus::Delete => NoteSyncState::Deleted,
                    _ => states
                        .get(&entry.note.id)
                        .copied()
                        .filter(|state| *state == NoteSyncState::Dirty)
                        .unwrap_or(NoteSyncState::Loaded),
                };
                states.insert(entry.note.id.clone(), state);
            }
        }
        let receivers = self.inner.events.publish(changes.to_vec());
        log::debug!("Published {} changes to {receivers} subscribers", changes.len());
    }

    /// Run `read` against the current graph.
    pub fn with_graph<R>(&self, read: impl FnOnce(&NoteGraph) -> R) -> R {
        read(&read_lock(&self.inner.graph))
    }

    // ---- lifecycle ------------------------------------------------------

    /// Load every vault and build the graph.
    ///
    /// A vault that fails to load is reported in [`InitReport::vaults`] and does
    /// not stop the others.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Task`] when the build task fails.
    pub async fn init(&self) -> EngineResult<InitReport> {
        self.load_all(None).await
    }

    /// Reload every vault from disk and publish the difference as one batch.
    ///
    /// In-memory updates that were never written are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before [`Self::init`].
    pub async fn sync(&self) -> EngineResult<InitReport> {
        self.ensure_init()?;
        self.load_all(None).await
    }

    /// [`Self::sync`] (or [`Self::init`] on a fresh engine) reporting per-vault progress.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Task`] when the build task fails.
    pub async fn sync_with_progress(&self, progress: ProgressFn) -> EngineResult<InitReport> {
        self.load_all(Some(progress)).await
    }

    async fn load_vaults(&self, progress: Option<ProgressFn>) -> EngineResult<Vec<VaultLoad>> {
        let total = self.inner.config.vaults.len();
        let done = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = self
            .inner
            .config
            .vaults
            .iter()
            .cloned()
            .map(|vault| {
                let storage = self.inner.storage;
                let progress = progress.clone();
                let done = Arc::clone(&done);
                async move {
                    let name = vault.name.clone();
                    let load = match tokio::task::spawn_blocking(move || storage.load_vault(&vault)).await {
                        Ok(load) => load,
                        Err(err) => {
                            log::warn!("Loading vault `{name}` failed: {err}");
                            VaultLoad::failed(&name, err.to_string())
                        }
                    };
                    if let Some(progress) = progress {
                        progress(&LoadProgress {
                            vault: name,
                            status: load.status.clone(),
                            done: done.fetch_add(1, Ordering::AcqRel) + 1,
                            total,
                        });
                    }
                    load
                }
            })
            .collect();
        self.inner.pool.run_all(tasks).await
    }

    async fn load_all(&self, progress: Option<ProgressFn>) -> EngineResult<InitReport> {
        let loads = self.load_vaults(progress).await?;
        let reports: Vec<VaultReport> = loads
            .iter()
            .map(|load| VaultReport {
                vault: load.vault.clone(),
                status: load.status.clone(),
                notes: load.notes.len(),
                cache_hits: load.cache_hits,
            })
            .collect();

        let config = self.inner.config.clone();
        let (graph, errors) = self
            .inner
            .pool
            .run_blocking(move || NoteGraph::build(&config, loads))
            .await?;

        let was_initialized = self.is_initialized();
        let changes = {
            let mut current = write_lock(&self.inner.graph);
            let changes = if was_initialized { diff_graphs(&current, &graph) } else { Vec::new() };
            *current = graph;
            changes
        };
        {
            let graph = read_lock(&self.inner.graph);
            let mut states = write_lock(&self.inner.states);
            states.clear();
            states.extend(graph.notes().map(|note| (note.id.clone(), NoteSyncState::Loaded)));
        }
        *write_lock(&self.inner.load_errors) = errors.clone();
        *write_lock(&self.inner.vault_reports) = reports.clone();
        self.inner.initialized.store(true, Ordering::Release);
        if !changes.is_empty() {
            self.publish(&changes);
        }

        let (notes, schemas) = self.with_graph(|graph| (graph.len(), graph.schemas().count()));
        log::info!(
            "Note engine {}: {} vaults, {notes} notes, {schemas} schemas, {} errors",
            if was_initialized { "synced" } else { "initialized" },
            reports.len(),
            errors.len()
        );
        Ok(InitReport {
            vaults: reports,
            errors,
            notes,
            schemas,
            changed: changes.len(),
        })
    }

    /// Write a port file under the workspace root; it is removed by [`Self::dispose`].
    ///
    /// # Errors
    ///
    /// Returns I/O errors.
    pub async fn write_port_file(&self, port: u16, caller: PortCaller) -> EngineResult<PathBuf> {
        let path = discovery::write_port_file(&self.inner.config.root, caller, port).await?;
        write_lock(&self.inner.port_files).push(caller);
        Ok(path)
    }

    /// Drop the graph and remove port files written by this engine.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from removing port files; the graph is cleared regardless.
    pub async fn dispose(&self) -> EngineResult<()> {
        self.inner.initialized.store(false, Ordering::Release);
        {
            let mut graph = write_lock(&self.inner.graph);
            *graph = NoteGraph::new(graph.vaults().to_vec(), self.inner.config.duplicate_note_behavior.clone());
        }
        write_lock(&self.inner.states).clear();
        let callers: Vec<PortCaller> = std::mem::take(&mut *write_lock(&self.inner.port_files));
        let mut first_err: Option<EngineError> = None;
        for caller in callers {
            if let Err(err) = discovery::remove_port_file(&self.inner.config.root, caller).await {
                first_err.get_or_insert(err);
            }
        }
        log::info!("Note engine disposed");
        first_err.map_or(Ok(()), Err)
    }

    /// Receive every change batch published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.inner.events.subscribe()
    }

    // ---- reads ------------------------------------------------------------

    /// Ranked note lookup.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before [`Self::init`].
    #[allow(clippy::unused_async)]
    pub async fn query_notes(&self, query: &str, options: &QueryOptions) -> EngineResult<Vec<NoteProps>> {
        self.query_notes_sync(query, options)
    }

    /// Ranked note lookup without suspending.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before [`Self::init`].
    pub fn query_notes_sync(&self, query: &str, options: &QueryOptions) -> EngineResult<Vec<NoteProps>> {
        self.ensure_init()?;
        Ok(self.with_graph(|graph| graph.query(query, options)))
    }

    /// Note by id.
    #[must_use]
    pub fn get_note(&self, id: &str) -> Option<NoteProps> {
        self.with_graph(|graph| graph.get(id).cloned())
    }

    fn require_note(&self, id: &str) -> EngineResult<NoteProps> {
        self.ensure_init()?;
        self.get_note(id)
            .ok_or_else(|| EngineError::NoteNotFound(id.to_string()))
    }

    /// Note by fname, optionally creating it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::VaultNotFound`] for an undeclared vault and any
    /// error from [`Self::write_note`] when creating.
    pub async fn get_note_by_path(&self, opts: &GetNoteByPathOpts) -> EngineResult<GetNoteResult> {
        self.ensure_init()?;
        if let Some(vault) = &opts.vault {
            self.vault(vault)?;
        }
        let found = self.with_graph(|graph| {
            graph
                .find_by_fname(&opts.fname, opts.vault.as_deref())
                .first()
                .map(|note| (*note).clone())
        });
        match found {
            Some(note) if !(note.stub && opts.create_if_new) => {
                return Ok(GetNoteResult {
                    note: Some(note),
                    changes: Vec::new(),
                });
            }
            None if !opts.create_if_new => return Ok(GetNoteResult::default()),
            _ => {}
        }
        let vault = match &opts.vault {
            Some(vault) => vault.clone(),
            None => self
                .inner
                .config
                .vaults
                .first()
                .map(|vault| vault.name.clone())
                .ok_or_else(|| EngineError::VaultNotFound(String::new()))?,
        };
        let changes = self
            .write_note(NoteProps::new(opts.fname.clone(), vault.clone(), ""), WriteNoteOpts::default())
            .await?;
        let note = self.with_graph(|graph| graph.note_by_loc(&opts.fname, &vault).cloned());
        Ok(GetNoteResult { note, changes })
    }

    /// Outbound links with their resolution status (plus candidates when enabled).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoteNotFound`] for an unknown id.
    pub fn get_links(&self, id: &str) -> EngineResult<Vec<(NoteLink, LinkStatus)>> {
        let note = self.require_note(id)?;
        Ok(self.with_graph(|graph| {
            let mut links = graph.links_with_status(id);
            if self.inner.config.enable_candidates {
                links.extend(
                    candidate_links(&note, graph.notes())
                        .into_iter()
                        .map(|link| (link, LinkStatus::Resolved)),
                );
            }
            links
        }))
    }

    /// Headers and block anchors of a note.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoteNotFound`] for an unknown id.
    pub fn get_anchors(&self, id: &str) -> EngineResult<Vec<NoteAnchor>> {
        Ok(self.require_note(id)?.anchors)
    }

    /// Editor decorations of a note.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoteNotFound`] for an unknown id.
    pub fn get_decorations(&self, id: &str) -> EngineResult<Vec<Decoration>> {
        let note = self.require_note(id)?;
        let candidates = self.inner.config.enable_candidates;
        Ok(self.with_graph(|graph| note_decorations(graph, &note, candidates)))
    }

    /// Backlinks of a note. Candidates are only computed when enabled in config.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoteNotFound`] for an unknown id.
    pub fn get_backlinks(&self, id: &str, options: &BacklinkOptions) -> EngineResult<BacklinkTree> {
        self.ensure_init()?;
        let options = BacklinkOptions {
            include_candidates: options.include_candidates && self.inner.config.enable_candidates,
            ..*options
        };
        self.with_graph(|graph| graph.backlinks(id, &options))
            .ok_or_else(|| EngineError::NoteNotFound(id.to_string()))
    }

    /// Unresolved wiki links and note references (for `ids`, or all notes).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before [`Self::init`].
    pub fn broken_links(&self, ids: Option<&[String]>) -> EngineResult<Vec<BrokenLink>> {
        self.ensure_init()?;
        Ok(self.with_graph(|graph| graph.broken_links(ids)))
    }

    /// Schema problems of a note.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoteNotFound`] for an unknown id.
    pub fn validate_note(&self, id: &str) -> EngineResult<Vec<SchemaIssue>> {
        self.require_note(id)?;
        Ok(self.with_graph(|graph| graph.validate_note(id)))
    }

    /// Child names declared by the schema of `fname` that do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::VaultNotFound`] for an undeclared vault.
    pub fn schema_suggestions(&self, fname: &str, vault: &str) -> EngineResult<Vec<String>> {
        self.ensure_init()?;
        self.vault(vault)?;
        Ok(self.with_graph(|graph| graph.schema_suggestions(fname, vault)))
    }

    /// Graph counters.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        self.with_graph(NoteGraph::stats)
    }

    /// Files left out by the last load.
    #[must_use]
    pub fn load_errors(&self) -> Vec<LoadError> {
        read_lock(&self.inner.load_errors).clone()
    }

    /// Per-vault outcome of the last load.
    #[must_use]
    pub fn vault_reports(&self) -> Vec<VaultReport> {
        read_lock(&self.inner.vault_reports).clone()
    }

    /// Sync state of a note id.
    #[must_use]
    pub fn note_state(&self, id: &str) -> NoteSyncState {
        read_lock(&self.inner.states)
            .get(id)
            .copied()
            .unwrap_or(NoteSyncState::Unloaded)
    }

    // ---- note mutations -------------------------------------------------

    /// Persist a note and apply it to the graph (create or update by id).
    ///
    /// The graph is only changed after the file write succeeds. A changed
    /// fname or vault moves the file.
    ///
    /// # Errors
    ///
    /// - [`EngineError::VaultNotFound`], [`EngineError::InvalidFname`]
    /// - [`EngineError::NoteExists`] when another authored note holds the fname
    /// - [`EngineError::Inconsistent`] when the target slot keeps changing hands
    /// - I/O and YAML errors from the write
    pub async fn write_note(&self, mut note: NoteProps, opts: WriteNoteOpts) -> EngineResult<Vec<NoteChangeEntry>> {
        self.ensure_init()?;
        let vault = self.vault(&note.vault)?.clone();
        if let Some(reason) = fname_problem(&note.fname) {
            return Err(EngineError::InvalidFname {
                fname: note.fname,
                reason,
            });
        }

        let keys = vec![note.id.clone(), location_key(&note.vault, &note.fname)];
        let settled = self
            .inner
            .gate
            .acquire_settled(keys, MAX_GATE_ROUNDS, || {
                if opts.update_existing && self.get_note(&note.id).is_none() {
                    let existing_id = self.with_graph(|graph| {
                        graph
                            .note_by_loc(&note.fname, &note.vault)
                            .filter(|existing| !existing.stub && existing.id != note.id)
                            .map(|existing| existing.id.clone())
                    });
                    if let Some(id) = existing_id {
                        note.id = id;
                    }
                }
                let prev = self.with_graph(|graph| -> EngineResult<Option<NoteProps>> {
                    let prev = graph.get(&note.id).cloned();
                    let moving = prev.as_ref().is_none_or(|prev| {
                        fname_key(&prev.fname) != fname_key(&note.fname) || prev.vault != note.vault
                    });
                    if moving
                        && let Some(existing) = graph.note_by_loc(&note.fname, &note.vault)
                        && !existing.stub
                        && existing.id != note.id
                    {
                        return Err(EngineError::NoteExists {
                            fname: note.fname.clone(),
                            vault: note.vault.clone(),
                        });
                    }
                    Ok(prev)
                })?;
                Ok::<_, EngineError>((vec![note.id.clone(), location_key(&note.vault, &note.fname)], prev))
            })
            .await?;
        let Some((_guards, prev)) = settled else {
            return Err(EngineError::inconsistent(
                format!("`{}/{}` kept changing while being written", note.vault, note.fname),
                vec![note.id],
            ));
        };

        let restore = self.note_state(&note.id);
        self.set_state(&note.id, NoteSyncState::Dirty);
        if prev.is_some() {
            note.updated = note.updated.max(now_millis());
        }
        let hash = match self.inner.storage.write_note(&vault, &note).await {
            Ok(hash) => hash,
            Err(err) => {
                self.set_state(&note.id, restore);
                return Err(err);
            }
        };
        note.content_hash = Some(hash);

        if let Some(prev) = &prev
            && (fname_key(&prev.fname) != fname_key(&note.fname) || prev.vault != note.vault)
        {
            let prev_vault = self.vault(&prev.vault)?;
            self.inner.storage.delete_note(prev_vault, &prev.fname).await?;
        }

        let entry = match prev {
            Some(prev) => NoteChangeEntry::update(note.clone(), prev),
            None => NoteChangeEntry::create(note.clone()),
        };
        let applied = write_lock(&self.inner.graph).apply_changes(vec![entry]);
        let changes = match applied {
            Ok(changes) => changes,
            Err(err) => {
                self.set_state(&note.id, restore);
                return Err(err);
            }
        };
        self.set_state(&note.id, NoteSyncState::Loaded);
        self.publish(&changes);
        Ok(changes)
    }

    /// Replace a note in memory only; it stays [`NoteSyncState::Dirty`] until written.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoteNotFound`] for an unknown id and graph errors.
    pub async fn update_note(&self, note: NoteProps) -> EngineResult<Vec<NoteChangeEntry>> {
        self.ensure_init()?;
        let _guard = self.inner.gate.acquire(&note.id).await;
        let Some(prev) = self.get_note(&note.id) else {
            return Err(EngineError::NoteNotFound(note.id));
        };
        let id = note.id.clone();
        let changes = write_lock(&self.inner.graph).apply_changes(vec![NoteChangeEntry::update(note, prev)])?;
        self.set_state(&id, NoteSyncState::Dirty);
        self.publish(&changes);
        Ok(changes)
    }

    /// Delete a note file and remove the note; children are kept.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoteNotFound`] for an unknown id
    /// - [`EngineError::ReservedNote`] for a vault root
    /// - [`EngineError::PendingWrite`] when the note is dirty and not discarded
    pub async fn delete_note(&self, id: &str, opts: DeleteNoteOpts) -> EngineResult<Vec<NoteChangeEntry>> {
        self.ensure_init()?;
        let note = self.require_note(id)?;
        let keys = vec![id.to_string(), location_key(&note.vault, &note.fname)];
        let settled = self
            .inner
            .gate
            .acquire_settled(keys, MAX_GATE_ROUNDS, || {
                let note = self.require_note(id)?;
                Ok::<_, EngineError>((vec![id.to_string(), location_key(&note.vault, &note.fname)], note))
            })
            .await?;
        let Some((_guards, note)) = settled else {
            return Err(EngineError::inconsistent("note moved while being deleted", vec![id.to_string()]));
        };
        if note.is_root() {
            return Err(EngineError::ReservedNote(note.fname));
        }
        if self.note_state(id) == NoteSyncState::Dirty && !opts.discard_pending {
            return Err(EngineError::PendingWrite(id.to_string()));
        }
        if !note.stub || note.content_hash.is_some() {
            let vault = self.vault(&note.vault)?;
            self.inner.storage.delete_note(vault, &note.fname).await?;
        }
        let changes = write_lock(&self.inner.graph).apply_changes(vec![NoteChangeEntry::delete(note)])?;
        self.publish(&changes);
        Ok(changes)
    }

    /// Move a note and rewrite the links that point at it; one change batch.
    ///
    /// # Errors
    ///
    /// See [`rename::plan_rename`]; I/O errors abort before the graph changes.
    pub async fn rename_note(&self, opts: &RenameNoteOpts) -> EngineResult<Vec<NoteChangeEntry>> {
        self.ensure_init()?;
        let first = self.with_graph(|graph| rename::plan_rename(graph, &opts.old_loc, &opts.new_loc))?;
        let settled = self
            .inner
            .gate
            .acquire_settled(first.gate_keys(), MAX_GATE_ROUNDS, || {
                let plan = self.with_graph(|graph| rename::plan_rename(graph, &opts.old_loc, &opts.new_loc))?;
                Ok::<_, EngineError>((plan.gate_keys(), plan))
            })
            .await?;
        let Some((_guards, mut plan)) = settled else {
            return Err(EngineError::inconsistent(
                "notes linking to the renamed note kept changing",
                first.ids(),
            ));
        };

        let dest = self.vault(&plan.note.vault)?.clone();
        plan.note.content_hash = Some(self.inner.storage.write_note(&dest, &plan.note).await?);
        let moved = fname_key(&plan.prev.fname) != fname_key(&plan.note.fname) || plan.prev.vault != plan.note.vault;
        if moved {
            let src = self.vault(&plan.prev.vault)?;
            self.inner.storage.delete_note(src, &plan.prev.fname).await?;
        }
        for note in &mut plan.updated {
            let vault = self.vault(&note.vault)?.clone();
            note.content_hash = Some(self.inner.storage.write_note(&vault, note).await?);
        }

        let mut entries = vec![NoteChangeEntry::update(plan.note.clone(), plan.prev.clone())];
        entries.extend(
            plan.updated
                .iter()
                .map(|note| NoteChangeEntry::update(note.clone(), note.clone())),
        );
        let changes = write_lock(&self.inner.graph).apply_changes(entries)?;
        log::info!(
            "Renamed `{}/{}` to `{}/{}`, rewrote links in {} notes",
            plan.prev.vault,
            plan.prev.fname,
            plan.note.vault,
            plan.note.fname,
            plan.updated.len()
        );
        self.publish(&changes);
        Ok(changes)
    }

    // ---- schemas ----------------------------------------------------------

    /// Schema module by id.
    #[must_use]
    pub fn get_schema(&self, id: &str) -> Option<SchemaModule> {
        self.with_graph(|graph| graph.schema(id).cloned())
    }

    /// Schema modules whose id or file name contains `query` (`*` or empty: all).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before [`Self::init`].
    pub fn query_schemas(&self, query: &str) -> EngineResult<Vec<SchemaModule>> {
        self.ensure_init()?;
        let needle = query.trim().to_lowercase();
        let mut modules: Vec<SchemaModule> = self.with_graph(|graph| {
            graph
                .schemas()
                .filter(|module| {
                    needle.is_empty()
                        || needle == "*"
                        || module.id.to_lowercase().contains(&needle)
                        || module.fname.to_lowercase().contains(&needle)
                })
                .cloned()
                .collect()
        });
        modules.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(modules)
    }

    /// Validate, persist and load a schema module; returns notes whose schema changed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSchema`], [`EngineError::VaultNotFound`] or I/O errors.
    pub async fn write_schema(&self, module: SchemaModule) -> EngineResult<Vec<NoteChangeEntry>> {
        self.ensure_init()?;
        validate_schema_module(&module).map_err(|message| EngineError::InvalidSchema {
            id: module.id.clone(),
            message,
        })?;
        let vault = self.vault(&module.vault)?.clone();
        let _guard = self.inner.gate.acquire(&format!("schema:{}", module.id)).await;
        let previous = self.get_schema(&module.id);
        self.inner.storage.write_schema(&vault, &module).await?;
        if let Some(previous) = previous
            && (previous.fname != module.fname || previous.vault != module.vault)
        {
            let old_vault = self.vault(&previous.vault)?;
            self.inner.storage.delete_schema(old_vault, &previous.fname).await?;
        }
        let changes = write_lock(&self.inner.graph).upsert_schema(module);
        self.publish(&changes);
        Ok(changes)
    }

    /// Delete a schema module file and unload it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SchemaNotFound`] or I/O errors.
    pub async fn delete_schema(&self, id: &str) -> EngineResult<Vec<NoteChangeEntry>> {
        self.ensure_init()?;
        let _guard = self.inner.gate.acquire(&format!("schema:{id}")).await;
        let module = self
            .get_schema(id)
            .ok_or_else(|| EngineError::SchemaNotFound(id.to_string()))?;
        let vault = self.vault(&module.vault)?;
        self.inner.storage.delete_schema(vault, &module.fname).await?;
        let changes = write_lock(&self.inner.graph)
            .remove_schema(id)
            .map(|(_, changes)| changes)
            .unwrap_or_default();
        self.publish(&changes);
        Ok(changes)
    }
}

/// In-memory stubs get fresh timestamps on every build; compare them by place.
fn unchanged(prev: &NoteProps, note: &NoteProps) -> bool {
    let memory_stub = |note: &NoteProps| note.stub && note.content_hash.is_none();
    if memory_stub(prev) && memory_stub(note) {
        prev.fname == note.fname
            && prev.vault == note.vault
            && prev.parent == note.parent
            && prev.children == note.children
            && prev.schema == note.schema
    } else {
        prev == note
    }
}

fn diff_graphs(old: &NoteGraph, new: &NoteGraph) -> Vec<NoteChangeEntry> {
    let mut changes: Vec<NoteChangeEntry> = Vec::new();
    for note in new.notes() {
        match old.get(&note.id) {
            None => changes.push(NoteChangeEntry::create(note.clone())),
            Some(prev) if !unchanged(prev, note) => {
                changes.push(NoteChangeEntry::update(note.clone(), prev.clone()));
            }
            Some(_) => {}
        }
    }
    changes.extend(
        old.notes()
            .filter(|note| new.get(&note.id).is_none())
            .map(|note| NoteChangeEntry::delete(note.clone())),
    );
    changes.sort_by_key(|entry| (entry.note.vault.clone(), fname_key(&entry.note.fname)));
    changes
}
