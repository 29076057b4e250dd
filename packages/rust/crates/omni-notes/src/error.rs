//! Error types for the note engine.
//!
//! Library errors are explicit `thiserror` enums. Per-file load failures and
//! broken links are not errors: they are returned as data ([`LoadError`],
//! [`crate::links::LinkStatus`]) so a bad file never aborts a vault load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used across the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by engine, graph, storage and doctor operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No note with this id (or location) is loaded.
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    /// No schema module with this id is loaded.
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// The vault name is not declared in the workspace.
    #[error("Vault not found: {0}")]
    VaultNotFound(String),

    /// An authored note with this fname already exists in the vault.
    #[error("Note `{fname}` already exists in vault `{vault}`")]
    NoteExists {
        /// Conflicting fname.
        fname: String,
        /// Vault holding the existing note.
        vault: String,
    },

    /// The fname cannot be used as a note name.
    #[error("Invalid note name `{fname}`: {reason}")]
    InvalidFname {
        /// Rejected fname.
        fname: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The operation touches a reserved note (vault roots).
    #[error("Note `{0}` is reserved and cannot be modified this way")]
    ReservedNote(String),

    /// A write for this note has not completed yet.
    #[error("Note {0} has a pending write")]
    PendingWrite(String),

    /// `init()` has not been called (or the engine was disposed).
    #[error("Engine is not initialized")]
    NotInitialized,

    /// Schema module content is invalid.
    #[error("Invalid schema `{id}`: {message}")]
    InvalidSchema {
        /// Module id (or file path).
        id: String,
        /// Validation message.
        message: String,
    },

    /// An underlying call returned no data or left state inconsistent.
    #[error("{message} (ids: {ids:?})")]
    Inconsistent {
        /// Human-readable description.
        message: String,
        /// Affected note ids.
        ids: Vec<String>,
    },

    /// File system failure.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Original error.
        #[source]
        source: std::io::Error,
    },

    /// YAML (de)serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),
}

impl EngineError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Build an [`EngineError::Inconsistent`] carrying affected ids.
    pub fn inconsistent(message: impl Into<String>, ids: Vec<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
            ids,
        }
    }
}

/// Why a single file was left out of the graph during a vault load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LoadErrorKind {
    /// YAML frontmatter did not parse.
    Frontmatter(String),
    /// Frontmatter parsed but is not a mapping.
    FrontmatterNotMapping,
    /// The file could not be read.
    Unreadable(String),
    /// Another file in the same vault already defines this fname.
    DuplicateFname {
        /// Path of the file that was kept.
        existing: String,
    },
    /// Another note already uses this id.
    DuplicateId {
        /// Conflicting id.
        id: String,
        /// Fname of the note that was kept.
        existing: String,
    },
    /// A schema file did not parse or failed validation.
    InvalidSchema(String),
}

/// One per-file failure collected during a vault load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadError {
    /// Vault name.
    pub vault: String,
    /// Path relative to the vault's notes directory.
    pub path: String,
    /// Failure detail.
    pub kind: LoadErrorKind,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            LoadErrorKind::Frontmatter(message) => {
                write!(f, "{}/{}: bad frontmatter: {message}", self.vault, self.path)
            }
            LoadErrorKind::FrontmatterNotMapping => {
                write!(f, "{}/{}: frontmatter is not a mapping", self.vault, self.path)
            }
            LoadErrorKind::Unreadable(message) => {
                write!(f, "{}/{}: unreadable: {message}", self.vault, self.path)
            }
            LoadErrorKind::DuplicateFname { existing } => write!(
                f,
                "{}/{}: duplicate note name (kept {existing})",
                self.vault, self.path
            ),
            LoadErrorKind::DuplicateId { id, existing } => write!(
                f,
                "{}/{}: duplicate id {id} (kept {existing})",
                self.vault, self.path
            ),
            LoadErrorKind::InvalidSchema(message) => {
                write!(f, "{}/{}: invalid schema: {message}", self.vault, self.path)
            }
        }
    }
}
