//! omni-notes - Local-first note engine.
//!
//! Module layout (by domain):
//! - `model`: notes, links, anchors, schemas, vaults, change entries
//! - `storage`: Markdown files with YAML frontmatter, schema files, parse cache
//! - `links`: link/anchor extraction and cross-vault resolution
//! - `graph`: in-memory note graph (hierarchy, query, backlinks, schema match)
//! - `engine`: async facade (`NoteEngine`), change bus, per-note gate, task pool
//! - `doctor`: batch repairs driven through the engine
//!
//! # Examples
//!
//! ```rust,no_run
//! use omni_notes::{NoteEngine, QueryOptions, Vault, WorkspaceConfig};
//!
//! # async fn demo() -> Result<(), omni_notes::EngineError> {
//! let config = WorkspaceConfig::new("/tmp/ws", vec![Vault::new("main", "/tmp/ws/main")]);
//! let engine = NoteEngine::new(config);
//! engine.init().await?;
//! let hits = engine.query_notes("proj", &QueryOptions::default()).await?;
//! println!("{} notes match", hits.len());
//! engine.dispose().await?;
//! # Ok(())
//! # }
//! ```

// ---------------------------------------------------------------------------
// Data and storage
// ---------------------------------------------------------------------------
pub mod config;
pub mod error;
pub mod model;
pub mod storage;

// ---------------------------------------------------------------------------
// Links and graph
// ---------------------------------------------------------------------------
pub mod graph;
pub mod links;

// ---------------------------------------------------------------------------
// Engine facade and repairs
// ---------------------------------------------------------------------------
pub mod doctor;
pub mod engine;

pub use config::{CONFIG_FILE_NAME, DuplicateNoteBehavior, WorkspaceConfig};
pub use doctor::{DoctorAction, DoctorCandidates, DoctorOptions, DoctorReport, DoctorService};
pub use engine::{
    DeleteNoteOpts, GetNoteByPathOpts, GetNoteResult, InitReport, NoteEngine, NoteSyncState,
    RenameNoteOpts, WriteNoteOpts,
};
pub use error::{EngineError, EngineResult, LoadError, LoadErrorKind};
pub use graph::{
    BacklinkGroup, BacklinkOptions, BacklinkSort, BacklinkTree, BrokenLink, GraphStats, NoteGraph,
    QueryOptions,
};
pub use links::LinkStatus;
pub use model::{
    ChangeStatus, LinkType, NoteAnchor, NoteChangeEntry, NoteLink, NoteLoc, NoteProps, SchemaModule,
    SchemaProps, Vault,
};
pub use storage::{StorageDriver, VaultStatus};
