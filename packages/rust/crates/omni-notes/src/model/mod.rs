//! Note, schema and vault data model.

mod change;
mod custom;
mod note;
mod schema;
mod vault;

pub use change::{ChangeStatus, NoteChangeEntry};
pub use custom::{CustomFields, CustomValue, TASK_STATUS_KEY};
pub(crate) use custom::yaml_key_to_string;
pub use note::{
    AnchorKind, LinkTarget, LinkType, NoteAnchor, NoteLink, NoteLoc, NoteProps, Point, Position,
    ROOT_FNAME, SchemaRef, TAGS_PREFIX, TaskFields, USERS_PREFIX, ancestor_fnames, clean_fname,
    default_title, fname_key, fname_problem, fname_segments, generate_id, now_millis,
    parent_fname,
};
pub use schema::{SCHEMA_FILE_VERSION, SchemaModule, SchemaProps, SchemaTemplate};
pub use vault::{SELF_CONTAINED_NOTES_DIR, Vault};
