//! Schema modules: hierarchical declarations of expected note structure.
//!
//! A module is one `<name>.schema.yml` file. Its root schema matches the first
//! fname segment(s) by pattern; children match the following segments. A
//! `namespace` schema additionally admits any single segment below it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema file format version written by the engine.
pub const SCHEMA_FILE_VERSION: u32 = 1;

/// Template applied when a note is created under a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTemplate {
    /// Template note fname.
    pub id: String,
    /// Template kind (`note`).
    #[serde(rename = "type", default = "default_template_type")]
    pub template_type: String,
}

fn default_template_type() -> String {
    "note".to_string()
}

/// One schema node inside a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaProps {
    /// Id, unique in the module.
    pub id: String,
    /// Display title (defaults to the id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Parent schema id (`root` marks the module root).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Child schema ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    /// Glob for one fname segment; defaults to the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Admit any single child segment.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub namespace: bool,
    /// Optional template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<SchemaTemplate>,
}

impl SchemaProps {
    /// Effective pattern (falls back to the id).
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_deref().unwrap_or(&self.id)
    }

    /// Effective title (falls back to the id).
    #[must_use]
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

/// A loaded schema module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaModule {
    /// Module id: the id of its root schema.
    pub id: String,
    /// File stem (`<fname>.schema.yml`).
    pub fname: String,
    /// Owning vault name.
    pub vault: String,
    /// File format version.
    pub version: u32,
    /// Imported module names.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Schemas by id.
    pub schemas: BTreeMap<String, SchemaProps>,
}

impl SchemaModule {
    /// Root schema of the module.
    #[must_use]
    pub fn root(&self) -> Option<&SchemaProps> {
        self.schemas.get(&self.id)
    }

    /// Lookup a schema by id.
    #[must_use]
    pub fn schema(&self, id: &str) -> Option<&SchemaProps> {
        self.schemas.get(id)
    }

    /// Resolved child schemas of `id`, skipping dangling ids.
    #[must_use]
    pub fn children_of(&self, id: &str) -> Vec<&SchemaProps> {
        self.schemas
            .get(id)
            .map(|schema| {
                schema
                    .children
                    .iter()
                    .filter_map(|child| self.schemas.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }
}
