//! Change entries delivered to graph subscribers.

use super::note::NoteProps;
use serde::{Deserialize, Serialize};

/// Kind of graph mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Note inserted.
    Create,
    /// Note replaced in place.
    Update,
    /// Note removed.
    Delete,
}

/// One mutation applied to the graph, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteChangeEntry {
    /// What happened.
    pub status: ChangeStatus,
    /// Note after the change (for deletes, the removed note).
    pub note: NoteProps,
    /// Note before an update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_note: Option<NoteProps>,
}

impl NoteChangeEntry {
    /// Creation entry.
    #[must_use]
    pub fn create(note: NoteProps) -> Self {
        Self {
            status: ChangeStatus::Create,
            note,
            prev_note: None,
        }
    }

    /// Update entry.
    #[must_use]
    pub fn update(note: NoteProps, prev_note: NoteProps) -> Self {
        Self {
            status: ChangeStatus::Update,
            note,
            prev_note: Some(prev_note),
        }
    }

    /// Deletion entry.
    #[must_use]
    pub fn delete(note: NoteProps) -> Self {
        Self {
            status: ChangeStatus::Delete,
            note,
            prev_note: None,
        }
    }
}
