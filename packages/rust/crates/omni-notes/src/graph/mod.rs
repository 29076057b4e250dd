//! Note graph: the authoritative in-memory notes, schemas and indexes.
//!
//! Modular design:
//! - `mod.rs`: `NoteGraph` state, build from vault loads, `apply_changes`
//! - `hierarchy.rs`: parent/child maintenance, stubs and pruning
//! - `query.rs`: fuzzy lookup index and ranking
//! - `backlinks.rs`: derived backlink tree (arena)
//! - `schema_match.rs`: schema assignment, validation and suggestions
//!
//! Every mutation goes through [`NoteGraph::apply_changes`], which returns the
//! effective changes (including derived stub and parent updates).

mod backlinks;
mod hierarchy;
mod query;
mod schema_match;

use crate::config::{DuplicateNoteBehavior, WorkspaceConfig};
use crate::error::{EngineError, EngineResult, LoadError, LoadErrorKind};
use crate::links::{NoteLookup, extract_note_links, is_reportable_broken, link_status, LinkStatus};
use crate::model::{
    ChangeStatus, NoteChangeEntry, NoteLink, NoteProps, ROOT_FNAME, SchemaModule, fname_key,
};
use crate::storage::{VaultLoad, derived_note_id};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use backlinks::{
    BacklinkGroup, BacklinkNode, BacklinkNodeKind, BacklinkOptions, BacklinkSort, BacklinkTree,
};
pub use query::{QUERY_ALL, QueryOptions};
pub use schema_match::SchemaIssue;

/// Graph shared between the engine facade and its tasks.
pub type SharedGraph = Arc<RwLock<NoteGraph>>;

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Graph counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Vaults in the workspace.
    pub vaults: usize,
    /// Notes, stubs included.
    pub notes: usize,
    /// Stub notes.
    pub stubs: usize,
    /// Schema modules.
    pub schemas: usize,
    /// Outbound links across all notes.
    pub links: usize,
    /// Wiki links and note references that do not resolve.
    pub broken_links: usize,
}

/// A strict link that does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    /// Source note id.
    pub source_id: String,
    /// Source note fname.
    pub source_fname: String,
    /// Source vault.
    pub vault: String,
    /// The link.
    pub link: NoteLink,
    /// Why it is broken.
    pub status: LinkStatus,
}

/// Collects effective changes, folding repeated entries for the same note.
#[derive(Debug, Default)]
struct ChangeLog {
    entries: Vec<Option<NoteChangeEntry>>,
    positions: HashMap<String, usize>,
}

impl ChangeLog {
    fn push(&mut self, entry: NoteChangeEntry) {
        let id = entry.note.id.clone();
        let Some(&pos) = self.positions.get(&id) else {
            self.positions.insert(id, self.entries.len());
            self.entries.push(Some(entry));
            return;
        };
        let previous = self.entries.get_mut(pos).and_then(Option::take);
        let merged = match (previous, entry.status) {
            (None, _) => Some(entry),
            (Some(prev), ChangeStatus::Create) if prev.status == ChangeStatus::Delete => {
                Some(NoteChangeEntry::update(entry.note, prev.note))
            }
            (Some(prev), ChangeStatus::Update) => match prev.status {
                ChangeStatus::Create => Some(NoteChangeEntry::create(entry.note)),
                ChangeStatus::Update => match prev.prev_note {
                    Some(original) => Some(NoteChangeEntry::update(entry.note, original)),
                    None => Some(entry),
                },
                ChangeStatus::Delete => Some(entry),
            },
            (Some(prev), ChangeStatus::Delete) => match prev.status {
                ChangeStatus::Create => None,
                _ => Some(entry),
            },
            (Some(_), _) => Some(entry),
        };
        if merged.is_none() {
            self.positions.remove(&id);
        }
        if let Some(slot) = self.entries.get_mut(pos) {
            *slot = merged;
        }
    }

    fn into_entries(self) -> Vec<NoteChangeEntry> {
        self.entries.into_iter().flatten().collect()
    }
}

/// In-memory note graph.
#[derive(Debug, Clone, Default)]
pub struct NoteGraph {
    notes: HashMap<String, NoteProps>,
    schemas: HashMap<String, SchemaModule>,
    fname_index: HashMap<String, BTreeSet<String>>,
    search: query::SearchIndex,
    vaults: Vec<String>,
    duplicate_behavior: DuplicateNoteBehavior,
}

impl NoteLookup for NoteGraph {
    fn vault_names(&self) -> Vec<&str> {
        self.vaults.iter().map(String::as_str).collect()
    }

    fn duplicate_behavior(&self) -> &DuplicateNoteBehavior {
        &self.duplicate_behavior
    }

    fn note_in_vault(&self, fname: &str, vault: &str) -> Option<&NoteProps> {
        self.fname_index
            .get(&fname_key(fname))?
            .iter()
            .filter_map(|id| self.notes.get(id))
            .find(|note| note.vault == vault)
    }
}

impl NoteGraph {
    /// Empty graph for the given vaults.
    #[must_use]
    pub fn new(vaults: Vec<String>, duplicate_behavior: DuplicateNoteBehavior) -> Self {
        Self {
            vaults,
            duplicate_behavior,
            ..Self::default()
        }
    }

    /// Assemble a graph from vault loads.
    ///
    /// Cross-vault id collisions and duplicate schema module ids are returned as
    /// load errors; the first occurrence (in vault order) is kept. Missing
    /// hierarchy levels and vault roots are synthesized as stubs.
    #[must_use]
    pub fn build(config: &WorkspaceConfig, loads: Vec<VaultLoad>) -> (Self, Vec<LoadError>) {
        let vaults: Vec<String> = config.vaults.iter().map(|vault| vault.name.clone()).collect();
        let mut graph = Self::new(vaults, config.duplicate_note_behavior.clone());
        let mut errors: Vec<LoadError> = Vec::new();

        let mut ordered = loads;
        ordered.sort_by_key(|load| graph.vault_rank(&load.vault));

        let mut notes: Vec<NoteProps> = Vec::new();
        let mut seen_ids: HashMap<String, String> = HashMap::new();
        for load in ordered {
            errors.extend(load.errors);
            for note in load.notes {
                if let Some(existing) = seen_ids.get(&note.id) {
                    errors.push(LoadError {
                        vault: note.vault.clone(),
                        path: format!("{}.md", note.fname),
                        kind: LoadErrorKind::DuplicateId {
                            id: note.id.clone(),
                            existing: existing.clone(),
                        },
                    });
                    continue;
                }
                seen_ids.insert(note.id.clone(), format!("{}/{}", note.vault, note.fname));
                notes.push(note);
            }
            for module in load.schemas {
                if graph.schemas.contains_key(&module.id) {
                    errors.push(LoadError {
                        vault: module.vault.clone(),
                        path: format!("{}.schema.yml", module.fname),
                        kind: LoadErrorKind::InvalidSchema(format!(
                            "duplicate schema module id `{}`",
                            module.id
                        )),
                    });
                    continue;
                }
                graph.schemas.insert(module.id.clone(), module);
            }
        }

        notes.par_iter_mut().for_each(extract_note_links);
        for note in notes {
            graph.insert_raw(note);
        }
        for vault in graph.vaults.clone() {
            if graph.note_in_vault(ROOT_FNAME, &vault).is_none() {
                let mut root = NoteProps::new_stub(ROOT_FNAME, vault.as_str());
                root.id = derived_note_id(&vault, ROOT_FNAME);
                graph.insert_raw(root);
            }
        }
        graph.link_hierarchy();
        graph.refresh_schemas();

        log::info!(
            "Built note graph: {} notes, {} schemas, {} load errors",
            graph.notes.len(),
            graph.schemas.len(),
            errors.len()
        );
        (graph, errors)
    }

    fn vault_rank(&self, vault: &str) -> usize {
        self.vaults
            .iter()
            .position(|name| name == vault)
            .unwrap_or(self.vaults.len())
    }

    /// Declared vault names in order.
    #[must_use]
    pub fn vaults(&self) -> &[String] {
        &self.vaults
    }

    /// Note by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&NoteProps> {
        self.notes.get(id)
    }

    /// Note at `(fname, vault)`.
    #[must_use]
    pub fn note_by_loc(&self, fname: &str, vault: &str) -> Option<&NoteProps> {
        self.note_in_vault(fname, vault)
    }

    /// Notes named `fname` in any vault (or one vault), in vault order.
    #[must_use]
    pub fn find_by_fname(&self, fname: &str, vault: Option<&str>) -> Vec<&NoteProps> {
        let mut found: Vec<&NoteProps> = self
            .fname_index
            .get(&fname_key(fname))
            .into_iter()
            .flatten()
            .filter_map(|id| self.notes.get(id))
            .filter(|note| vault.is_none_or(|name| note.vault == name))
            .collect();
        found.sort_by_key(|note| self.vault_rank(&note.vault));
        found
    }

    /// Root note of a vault.
    #[must_use]
    pub fn vault_root(&self, vault: &str) -> Option<&NoteProps> {
        self.note_in_vault(ROOT_FNAME, vault)
    }

    /// All notes, unordered.
    pub fn notes(&self) -> impl Iterator<Item = &NoteProps> {
        self.notes.values()
    }

    /// Number of notes, stubs included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Whether the graph holds no notes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Schema module by id.
    #[must_use]
    pub fn schema(&self, id: &str) -> Option<&SchemaModule> {
        self.schemas.get(id)
    }

    /// All schema modules, unordered.
    pub fn schemas(&self) -> impl Iterator<Item = &SchemaModule> {
        self.schemas.values()
    }

    /// Insert or replace a schema module and re-match every note.
    pub fn upsert_schema(&mut self, module: SchemaModule) -> Vec<NoteChangeEntry> {
        self.schemas.insert(module.id.clone(), module);
        self.refresh_schemas()
    }

    /// Remove a schema module and re-match every note.
    pub fn remove_schema(&mut self, id: &str) -> Option<(SchemaModule, Vec<NoteChangeEntry>)> {
        let module = self.schemas.remove(id)?;
        Some((module, self.refresh_schemas()))
    }

    /// Resolution status of every outbound link of a note.
    #[must_use]
    pub fn links_with_status(&self, id: &str) -> Vec<(NoteLink, LinkStatus)> {
        let Some(note) = self.notes.get(id) else {
            return Vec::new();
        };
        note.links
            .iter()
            .map(|link| (link.clone(), link_status(self, note, link)))
            .collect()
    }

    /// Strict links that do not resolve, for the given notes (or all notes).
    #[must_use]
    pub fn broken_links(&self, ids: Option<&[String]>) -> Vec<BrokenLink> {
        let sources: Vec<&NoteProps> = match ids {
            Some(ids) => ids.iter().filter_map(|id| self.notes.get(id)).collect(),
            None => self.notes.values().collect(),
        };
        let mut out: Vec<BrokenLink> = sources
            .into_iter()
            .flat_map(|note| {
                note.links
                    .iter()
                    .filter(|link| link.link_type.is_strict())
                    .filter_map(move |link| {
                        let status = link_status(self, note, link);
                        status.is_broken().then(|| BrokenLink {
                            source_id: note.id.clone(),
                            source_fname: note.fname.clone(),
                            vault: note.vault.clone(),
                            link: link.clone(),
                            status,
                        })
                    })
            })
            .collect();
        out.sort_by(|left, right| {
            (&left.vault, &left.source_fname, left.link.position)
                .cmp(&(&right.vault, &right.source_fname, right.link.position))
        });
        out
    }

    /// Graph counters.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            vaults: self.vaults.len(),
            notes: self.notes.len(),
            stubs: self.notes.values().filter(|note| note.stub).count(),
            schemas: self.schemas.len(),
            links: self.notes.values().map(|note| note.links.len()).sum(),
            broken_links: self
                .notes
                .values()
                .map(|note| {
                    note.links
                        .iter()
                        .filter(|link| is_reportable_broken(self, note, link))
                        .count()
                })
                .sum(),
        }
    }

    /// Apply create/update/delete entries in order.
    ///
    /// Body-derived fields (`links`, `anchors`) are re-extracted and hierarchy
    /// fields (`parent`, `children`) and `schema` are recomputed; the values in
    /// the entries are ignored. Returns the effective changes.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoteExists`] when creating over an authored note
    /// - [`EngineError::NoteNotFound`] when updating or deleting a missing id
    /// - [`EngineError::ReservedNote`] when deleting a vault root
    /// - [`EngineError::VaultNotFound`] for an undeclared vault
    ///
    /// Entries before the failing one stay applied.
    pub fn apply_changes(&mut self, entries: Vec<NoteChangeEntry>) -> EngineResult<Vec<NoteChangeEntry>> {
        let mut log = ChangeLog::default();
        for entry in entries {
            match entry.status {
                ChangeStatus::Create => {
                    self.check_vault(&entry.note.vault)?;
                    self.insert_note(entry.note, &mut log)?;
                }
                ChangeStatus::Update => {
                    self.check_vault(&entry.note.vault)?;
                    self.update_note(entry.note, &mut log)?;
                }
                ChangeStatus::Delete => self.delete_note(&entry.note.id, &mut log)?,
            }
        }
        let changes = log.into_entries();
        log::debug!("Applied {} note changes", changes.len());
        Ok(changes)
    }

    fn check_vault(&self, vault: &str) -> EngineResult<()> {
        if self.vaults.iter().any(|name| name == vault) {
            Ok(())
        } else {
            Err(EngineError::VaultNotFound(vault.to_string()))
        }
    }

    fn insert_raw(&mut self, note: NoteProps) {
        self.fname_index
            .entry(fname_key(&note.fname))
            .or_default()
            .insert(note.id.clone());
        self.search.upsert(&note);
        self.notes.insert(note.id.clone(), note);
    }

    fn remove_raw(&mut self, id: &str) -> Option<NoteProps> {
        let note = self.notes.remove(id)?;
        let key = fname_key(&note.fname);
        if let Some(ids) = self.fname_index.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.fname_index.remove(&key);
            }
        }
        self.search.remove(id);
        Some(note)
    }

    fn prepare(&self, mut note: NoteProps) -> NoteProps {
        extract_note_links(&mut note);
        note.schema = self.match_schema(&note.fname, &note.vault);
        note
    }

    fn update_note(&mut self, note: NoteProps, log: &mut ChangeLog) -> EngineResult<()> {
        let Some(prev) = self.notes.get(&note.id).cloned() else {
            return Err(EngineError::NoteNotFound(note.id));
        };
        let moved = fname_key(&prev.fname) != fname_key(&note.fname) || prev.vault != note.vault;
        if moved {
            if prev.is_root() {
                return Err(EngineError::ReservedNote(prev.fname));
            }
            if let Some(existing) = self.note_in_vault(&note.fname, &note.vault)
                && !existing.stub
            {
                return Err(EngineError::NoteExists {
                    fname: note.fname,
                    vault: note.vault,
                });
            }
            self.delete_note(&prev.id, log)?;
            return self.insert_note(note, log);
        }

        let mut note = self.prepare(note);
        note.parent.clone_from(&prev.parent);
        note.children.clone_from(&prev.children);
        let resort = note.title != prev.title;
        let parent = note.parent.clone();
        self.remove_raw(&prev.id);
        self.insert_raw(note.clone());
        log.push(NoteChangeEntry::update(note, prev));
        if resort && let Some(parent) = parent {
            self.sort_children_logged(&parent, log);
        }
        Ok(())
    }
}
