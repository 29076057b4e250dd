//! Storage driver: Markdown note files, schema files and the per-vault cache.
//!
//! Loading is blocking (walkdir + rayon) and runs on a blocking thread when
//! called from the engine; single-file reads and writes use `tokio::fs`.

pub mod cache;
pub mod discover;
pub mod frontmatter;
pub mod schema_file;

use crate::error::{EngineError, EngineResult, LoadError, LoadErrorKind};
use crate::model::{NoteProps, SchemaModule, Vault, fname_key};
use cache::{VaultCache, compute_hash, load_cache, save_cache};
use discover::{discover_files, note_fname, relative_path_string, schema_fname};
use frontmatter::{NoteMeta, parse_meta, serialize_note, split_frontmatter};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

pub use cache::{CACHE_FILE_NAME, CACHE_VERSION};
pub use schema_file::{parse_schema_module, serialize_schema_module, validate_schema_module};

/// Outcome of loading one vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum VaultStatus {
    /// Vault directory was read (individual files may still have failed).
    Loaded,
    /// The notes directory does not exist.
    Missing,
    /// The load could not run at all.
    Failed(String),
}

/// Notes, schemas and per-file errors read from one vault.
#[derive(Debug, Clone)]
pub struct VaultLoad {
    /// Vault name.
    pub vault: String,
    /// Vault-level outcome.
    pub status: VaultStatus,
    /// Parsed notes (links and anchors not yet extracted).
    pub notes: Vec<NoteProps>,
    /// Parsed schema modules.
    pub schemas: Vec<SchemaModule>,
    /// Files left out of the load.
    pub errors: Vec<LoadError>,
    /// Notes whose metadata came from the cache.
    pub cache_hits: usize,
}

impl VaultLoad {
    fn empty(vault: &str, status: VaultStatus) -> Self {
        Self {
            vault: vault.to_string(),
            status,
            notes: Vec::new(),
            schemas: Vec::new(),
            errors: Vec::new(),
            cache_hits: 0,
        }
    }

    /// Vault that could not be loaded.
    #[must_use]
    pub fn failed(vault: &str, reason: impl Into<String>) -> Self {
        Self::empty(vault, VaultStatus::Failed(reason.into()))
    }
}

/// Stable id for a note file that has no `id` in its frontmatter.
#[must_use]
pub fn derived_note_id(vault: &str, fname: &str) -> String {
    compute_hash(&format!("{vault}/{}", fname_key(fname)))
}

fn modified_millis(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let millis = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
    i64::try_from(millis).ok()
}

/// Parse file content into a note, using `cache` to skip YAML when the hash matches.
///
/// Ids and timestamps missing from the file are filled after the cache lookup,
/// so the cached [`ParsedNote::meta`] only holds what the file says.
///
/// # Errors
///
/// Returns a [`LoadErrorKind`] for bad frontmatter.
pub fn parse_note_content(
    content: &str,
    fname: &str,
    vault: &str,
    fallback_ts: i64,
    cached: Option<(&VaultCache, &str)>,
) -> Result<ParsedNote, LoadErrorKind> {
    let hash = compute_hash(content);
    let (yaml, body) = split_frontmatter(content);
    let hit = cached.and_then(|(cache, rel)| cache.lookup(rel, &hash)).cloned();
    let cache_hit = hit.is_some();
    let meta = match hit {
        Some(meta) => meta,
        None => parse_meta(yaml, fname)?,
    };
    let mut note = meta.clone().into_note(fname, vault, body.to_string(), fallback_ts);
    if note.id.is_empty() {
        note.id = derived_note_id(vault, fname);
    }
    note.content_hash = Some(hash);
    Ok(ParsedNote {
        note,
        meta,
        cache_hit,
    })
}

/// One parsed note file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNote {
    /// The note, with derived id and fallback timestamps applied.
    pub note: NoteProps,
    /// Frontmatter exactly as parsed; this is what the cache stores.
    pub meta: NoteMeta,
    /// Whether `meta` came from the cache.
    pub cache_hit: bool,
}

/// Reads and writes vault files.
#[derive(Debug, Clone, Copy)]
pub struct StorageDriver {
    use_cache: bool,
}

impl StorageDriver {
    /// Driver with the metadata cache on or off.
    #[must_use]
    pub const fn new(use_cache: bool) -> Self {
        Self { use_cache }
    }

    /// Whether the metadata cache is used.
    #[must_use]
    pub const fn use_cache(&self) -> bool {
        self.use_cache
    }

    /// Load every note and schema in a vault. Blocking.
    ///
    /// Bad files are reported in [`VaultLoad::errors`] and skipped. When two
    /// files share a fname (case-insensitively) or an id, the first by sorted
    /// path is kept.
    #[must_use]
    pub fn load_vault(&self, vault: &Vault) -> VaultLoad {
        let notes_dir = vault.notes_dir();
        if !notes_dir.is_dir() {
            log::warn!(
                "Vault `{}` notes directory {} does not exist",
                vault.name,
                notes_dir.display()
            );
            return VaultLoad::empty(&vault.name, VaultStatus::Missing);
        }

        let files = discover_files(&notes_dir);
        let cache = if self.use_cache {
            load_cache(&notes_dir)
        } else {
            VaultCache::default()
        };

        let parsed: Vec<(String, Result<ParsedNote, LoadErrorKind>)> = files
            .notes
            .par_iter()
            .filter_map(|path| {
                let fname = note_fname(path)?;
                let rel = relative_path_string(path, &notes_dir);
                let result = match std::fs::read_to_string(path) {
                    Ok(content) => parse_note_content(
                        &content,
                        &fname,
                        &vault.name,
                        modified_millis(path).unwrap_or_default(),
                        self.use_cache.then_some((&cache, rel.as_str())),
                    ),
                    Err(err) => Err(LoadErrorKind::Unreadable(err.to_string())),
                };
                Some((rel, result))
            })
            .collect();

        let mut load = VaultLoad::empty(&vault.name, VaultStatus::Loaded);
        let mut next_cache = VaultCache::default();
        let mut by_fname: HashMap<String, String> = HashMap::new();
        let mut by_id: HashMap<String, String> = HashMap::new();
        for (rel, result) in parsed {
            let ParsedNote {
                note,
                meta,
                cache_hit,
            } = match result {
                Ok(parsed) => parsed,
                Err(kind) => {
                    load.push_error(rel, kind);
                    continue;
                }
            };
            if let Some(existing) = by_fname.get(&fname_key(&note.fname)) {
                let kind = LoadErrorKind::DuplicateFname {
                    existing: existing.clone(),
                };
                load.push_error(rel, kind);
                continue;
            }
            if let Some(existing) = by_id.get(&note.id) {
                let kind = LoadErrorKind::DuplicateId {
                    id: note.id.clone(),
                    existing: existing.clone(),
                };
                load.push_error(rel, kind);
                continue;
            }
            by_fname.insert(fname_key(&note.fname), rel.clone());
            by_id.insert(note.id.clone(), note.fname.clone());
            if let Some(hash) = &note.content_hash {
                next_cache.insert(rel, hash.clone(), meta);
            }
            load.cache_hits += usize::from(cache_hit);
            load.notes.push(note);
        }

        for path in &files.schemas {
            let rel = relative_path_string(path, &notes_dir);
            let Some(fname) = schema_fname(path) else {
                continue;
            };
            let result = std::fs::read_to_string(path)
                .map_err(|err| LoadErrorKind::Unreadable(err.to_string()))
                .and_then(|content| {
                    parse_schema_module(&content, &fname, &vault.name)
                        .map_err(LoadErrorKind::InvalidSchema)
                });
            match result {
                Ok(module) => load.schemas.push(module),
                Err(kind) => load.push_error(rel, kind),
            }
        }

        if self.use_cache
            && next_cache != cache
            && let Err(err) = save_cache(&notes_dir, &next_cache)
        {
            log::warn!("Failed to write note cache for vault `{}`: {err}", vault.name);
        }

        log::info!(
            "Loaded vault `{}`: {} notes, {} schemas, {} cache hits, {} errors",
            vault.name,
            load.notes.len(),
            load.schemas.len(),
            load.cache_hits,
            load.errors.len()
        );
        load
    }

    /// Read one note file; `Ok(None)` when it does not exist. Bypasses the cache.
    ///
    /// # Errors
    ///
    /// Returns I/O errors, or [`EngineError::Inconsistent`] for bad frontmatter.
    pub async fn read_note(&self, vault: &Vault, fname: &str) -> EngineResult<Option<NoteProps>> {
        let path = vault.note_path(fname);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(EngineError::io(&path, err)),
        };
        let fallback_ts = modified_millis(&path).unwrap_or_default();
        parse_note_content(&content, fname, &vault.name, fallback_ts, None)
            .map(|parsed| Some(parsed.note))
            .map_err(|kind| {
                EngineError::inconsistent(
                    format!("{}: {kind:?}", path.display()),
                    vec![derived_note_id(&vault.name, fname)],
                )
            })
    }

    /// Persist a note; returns the content hash of the written file.
    ///
    /// # Errors
    ///
    /// Returns YAML or I/O errors.
    pub async fn write_note(&self, vault: &Vault, note: &NoteProps) -> EngineResult<String> {
        let content = serialize_note(note)?;
        let notes_dir = vault.notes_dir();
        tokio::fs::create_dir_all(&notes_dir)
            .await
            .map_err(|err| EngineError::io(&notes_dir, err))?;
        let path = vault.note_path(&note.fname);
        tokio::fs::write(&path, &content)
            .await
            .map_err(|err| EngineError::io(&path, err))?;
        log::debug!("Wrote note `{}` to {}", note.fname, path.display());
        Ok(compute_hash(&content))
    }

    /// Remove a note file; returns whether a file existed.
    ///
    /// # Errors
    ///
    /// Returns I/O errors other than "not found".
    pub async fn delete_note(&self, vault: &Vault, fname: &str) -> EngineResult<bool> {
        remove_file(&vault.note_path(fname)).await
    }

    /// Persist a schema module.
    ///
    /// # Errors
    ///
    /// Returns YAML or I/O errors.
    pub async fn write_schema(&self, vault: &Vault, module: &SchemaModule) -> EngineResult<()> {
        let content = serialize_schema_module(module)?;
        let notes_dir = vault.notes_dir();
        tokio::fs::create_dir_all(&notes_dir)
            .await
            .map_err(|err| EngineError::io(&notes_dir, err))?;
        let path = vault.schema_path(&module.fname);
        tokio::fs::write(&path, content)
            .await
            .map_err(|err| EngineError::io(&path, err))
    }

    /// Remove a schema file; returns whether a file existed.
    ///
    /// # Errors
    ///
    /// Returns I/O errors other than "not found".
    pub async fn delete_schema(&self, vault: &Vault, fname: &str) -> EngineResult<bool> {
        remove_file(&vault.schema_path(fname)).await
    }
}

impl VaultLoad {
    fn push_error(&mut self, path: String, kind: LoadErrorKind) {
        let error = LoadError {
            vault: self.vault.clone(),
            path,
            kind,
        };
        log::warn!("Skipping {error}");
        self.errors.push(error);
    }
}

async fn remove_file(path: &Path) -> EngineResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(EngineError::io(path, err)),
    }
}
