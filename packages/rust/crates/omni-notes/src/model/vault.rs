//! Vault locations on disk.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding notes inside a self-contained vault.
pub const SELF_CONTAINED_NOTES_DIR: &str = "notes";

/// A storage root with its own note/schema namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Unique name used in links (`[[vault://name/fname]]`).
    pub name: String,
    /// Root directory.
    pub fs_path: PathBuf,
    /// Notes live in `<fs_path>/notes` instead of `<fs_path>`.
    #[serde(default)]
    pub self_contained: bool,
}

impl Vault {
    /// Plain vault rooted at `fs_path`.
    pub fn new(name: impl Into<String>, fs_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            fs_path: fs_path.into(),
            self_contained: false,
        }
    }

    /// Mark the vault as self-contained.
    #[must_use]
    pub fn self_contained(mut self) -> Self {
        self.self_contained = true;
        self
    }

    /// Directory that holds note and schema files.
    #[must_use]
    pub fn notes_dir(&self) -> PathBuf {
        if self.self_contained {
            self.fs_path.join(SELF_CONTAINED_NOTES_DIR)
        } else {
            self.fs_path.clone()
        }
    }

    /// Absolute file path of a note.
    #[must_use]
    pub fn note_path(&self, fname: &str) -> PathBuf {
        self.notes_dir().join(format!("{fname}.md"))
    }

    /// Absolute file path of a schema module.
    #[must_use]
    pub fn schema_path(&self, fname: &str) -> PathBuf {
        self.notes_dir().join(format!("{fname}.schema.yml"))
    }

    /// Whether the vault root exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        Path::new(&self.fs_path).is_dir()
    }
}
