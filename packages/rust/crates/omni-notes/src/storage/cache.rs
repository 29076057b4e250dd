//! Per-vault metadata cache keyed by content hash.
//!
//! The cache only lets a load skip YAML parsing for unchanged files. It is never
//! consulted for graph state, so deleting it changes load cost and nothing else.

use super::frontmatter::NoteMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3;

/// Cache file name inside a vault's notes directory.
pub const CACHE_FILE_NAME: &str = ".omni-notes.cache.json";
/// Cache format version; other versions are discarded.
pub const CACHE_VERSION: u32 = 2;

/// Cached metadata for one note file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Parsed frontmatter metadata.
    pub data: NoteMeta,
    /// Content hash of the file the data was parsed from.
    pub hash: String,
}

/// On-disk cache content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultCache {
    /// Format version.
    pub version: u32,
    /// Entries by path relative to the notes directory.
    pub notes: BTreeMap<String, CacheEntry>,
}

impl Default for VaultCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            notes: BTreeMap::new(),
        }
    }
}

impl VaultCache {
    /// Metadata for `path` when the stored hash matches.
    #[must_use]
    pub fn lookup(&self, path: &str, hash: &str) -> Option<&NoteMeta> {
        self.notes
            .get(path)
            .filter(|entry| entry.hash == hash)
            .map(|entry| &entry.data)
    }

    /// Record metadata for `path`.
    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>, data: NoteMeta) {
        self.notes.insert(
            path.into(),
            CacheEntry {
                data,
                hash: hash.into(),
            },
        );
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// Content hash used for cache keys and `NoteProps::content_hash`.
#[must_use]
pub fn compute_hash(content: &str) -> String {
    format!("{:016x}", xxh3::xxh3_64(content.as_bytes()))
}

/// Path of the cache file for a notes directory.
#[must_use]
pub fn cache_path(notes_dir: &Path) -> PathBuf {
    notes_dir.join(CACHE_FILE_NAME)
}

/// Load the cache; missing, corrupt or other-version files yield an empty cache.
#[must_use]
pub fn load_cache(notes_dir: &Path) -> VaultCache {
    let path = cache_path(notes_dir);
    if path.exists()
        && let Ok(content) = std::fs::read_to_string(&path)
    {
        match serde_json::from_str::<VaultCache>(&content) {
            Ok(cache) if cache.version == CACHE_VERSION => return cache,
            Ok(cache) => log::debug!(
                "Ignoring note cache {} with version {}",
                path.display(),
                cache.version
            ),
            Err(err) => log::warn!("Ignoring corrupt note cache {}: {err}", path.display()),
        }
    }
    VaultCache::default()
}

/// Write the cache through a temp file and rename.
///
/// # Errors
///
/// Returns I/O or JSON errors; callers treat them as non-fatal.
pub fn save_cache(notes_dir: &Path, cache: &VaultCache) -> std::io::Result<()> {
    let path = cache_path(notes_dir);
    let tmp = notes_dir.join(format!("{CACHE_FILE_NAME}.tmp"));
    let content = serde_json::to_string(cache)?;
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NoteProps;

    #[test]
    fn test_lookup_requires_matching_hash() {
        let mut cache = VaultCache::default();
        let meta = NoteMeta::from_note(&NoteProps::new("a", "v", ""));
        cache.insert("a.md", compute_hash("one"), meta.clone());

        assert_eq!(cache.lookup("a.md", &compute_hash("one")), Some(&meta));
        assert!(cache.lookup("a.md", &compute_hash("two")).is_none());
        assert!(cache.lookup("b.md", &compute_hash("one")).is_none());
    }

    #[test]
    fn test_save_and_load_cache() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = tempfile::tempdir()?;
        let mut cache = VaultCache::default();
        cache.insert(
            "a.md",
            "00",
            NoteMeta::from_note(&NoteProps::new("a", "v", "")),
        );
        save_cache(tmp.path(), &cache)?;
        assert_eq!(load_cache(tmp.path()), cache);
        assert!(!tmp.path().join(format!("{CACHE_FILE_NAME}.tmp")).exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_or_stale_cache_is_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = tempfile::tempdir()?;
        std::fs::write(cache_path(tmp.path()), "{not json")?;
        assert!(load_cache(tmp.path()).is_empty());

        std::fs::write(cache_path(tmp.path()), r#"{"version": 99, "notes": {}}"#)?;
        assert_eq!(load_cache(tmp.path()).version, CACHE_VERSION);
        Ok(())
    }
}
