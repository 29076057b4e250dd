//! Schema assignment, validation and lookup suggestions.

use super::NoteGraph;
use crate::links::NoteLookup;
use crate::model::{
    NoteChangeEntry, NoteProps, ROOT_FNAME, SchemaModule, SchemaProps, SchemaRef, fname_key,
    parent_fname,
};
use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};

/// A schema rule a note breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
    /// Offending note.
    pub fname: String,
    /// What is wrong.
    pub message: String,
}

fn segment_matcher(pattern: &str) -> Option<GlobMatcher> {
    GlobBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .ok()
        .map(|glob| glob.compile_matcher())
}

fn is_literal_pattern(pattern: &str) -> bool {
    !pattern.contains(['*', '?', '[', '{'])
}

/// Schema matched for a full fname.
struct SchemaHit<'a> {
    module: &'a SchemaModule,
    schema: &'a SchemaProps,
    /// Matched through a namespace's wildcard segment.
    via_namespace: bool,
}

fn match_from<'a>(
    module: &'a SchemaModule,
    schema: &'a SchemaProps,
    segments: &[&str],
    idx: usize,
) -> Option<SchemaHit<'a>> {
    let segment = segments.get(idx)?;
    if !segment_matcher(schema.pattern()).is_some_and(|matcher| matcher.is_match(segment)) {
        return None;
    }
    let last = segments.len() - 1;
    if idx == last {
        return Some(SchemaHit {
            module,
            schema,
            via_namespace: false,
        });
    }
    let mut next = idx + 1;
    if schema.namespace {
        if next == last {
            return Some(SchemaHit {
                module,
                schema,
                via_namespace: true,
            });
        }
        next += 1;
    }
    module
        .children_of(&schema.id)
        .into_iter()
        .find_map(|child| match_from(module, child, segments, next))
}

impl NoteGraph {
    fn ordered_modules(&self, vault: &str) -> Vec<&SchemaModule> {
        let mut modules: Vec<&SchemaModule> = self.schemas.values().collect();
        modules.sort_by_key(|module| {
            (module.vault != vault, self.vault_rank(&module.vault), module.id.clone())
        });
        modules
    }

    fn schema_hit(&self, fname: &str, vault: &str) -> Option<SchemaHit<'_>> {
        let key = fname_key(fname);
        if key == ROOT_FNAME {
            return None;
        }
        let segments: Vec<&str> = key.split('.').collect();
        self.ordered_modules(vault).into_iter().find_map(|module| {
            module
                .root()
                .and_then(|root| match_from(module, root, &segments, 0))
        })
    }

    /// Schema for a note at `(fname, vault)`; modules of the same vault win.
    #[must_use]
    pub fn match_schema(&self, fname: &str, vault: &str) -> Option<SchemaRef> {
        self.schema_hit(fname, vault).map(|hit| SchemaRef {
            module_id: hit.module.id.clone(),
            schema_id: hit.schema.id.clone(),
        })
    }

    /// Re-match every note after schema changes; returns the notes that changed.
    pub(super) fn refresh_schemas(&mut self) -> Vec<NoteChangeEntry> {
        let updates: Vec<(String, Option<SchemaRef>)> = self
            .notes
            .values()
            .filter_map(|note| {
                let matched = self.match_schema(&note.fname, &note.vault);
                (matched != note.schema).then(|| (note.id.clone(), matched))
            })
            .collect();
        let mut changes = Vec::with_capacity(updates.len());
        for (id, schema) in updates {
            if let Some(note) = self.notes.get_mut(&id) {
                let prev = note.clone();
                note.schema = schema;
                changes.push(NoteChangeEntry::update(note.clone(), prev));
            }
        }
        if !changes.is_empty() {
            log::debug!("Schema refresh changed {} notes", changes.len());
        }
        changes
    }

    fn admits_child(&self, parent: &NoteProps, child: &NoteProps) -> Option<String> {
        let hit = self.schema_hit(&parent.fname, &parent.vault)?;
        if hit.schema.namespace && !hit.via_namespace {
            return None;
        }
        let allowed = hit.module.children_of(&hit.schema.id);
        if allowed.is_empty() {
            return None;
        }
        let leaf = fname_key(&child.fname);
        let leaf = leaf.rsplit('.').next().unwrap_or_default();
        let admitted = allowed.iter().any(|schema| {
            segment_matcher(schema.pattern()).is_some_and(|matcher| matcher.is_match(leaf))
        });
        (!admitted).then(|| {
            format!(
                "`{}` is not allowed under schema `{}.{}` (expected one of: {})",
                child.fname,
                hit.module.id,
                hit.schema.id,
                allowed
                    .iter()
                    .map(|schema| schema.pattern())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }

    /// Schema problems of a note: its own placement and each of its children.
    #[must_use]
    pub fn validate_note(&self, id: &str) -> Vec<SchemaIssue> {
        let Some(note) = self.notes.get(id) else {
            return Vec::new();
        };
        let mut issues = Vec::new();
        if let Some(parent) = parent_fname(&note.fname).and_then(|p| self.note_in_vault(p, &note.vault))
            && let Some(message) = self.admits_child(parent, note)
        {
            issues.push(SchemaIssue {
                fname: note.fname.clone(),
                message,
            });
        }
        for child in note.children.iter().filter_map(|child| self.notes.get(child)) {
            if let Some(message) = self.admits_child(note, child) {
                issues.push(SchemaIssue {
                    fname: child.fname.clone(),
                    message,
                });
            }
        }
        issues
    }

    /// Child fnames the matched schema declares that do not exist yet.
    #[must_use]
    pub fn schema_suggestions(&self, fname: &str, vault: &str) -> Vec<String> {
        let Some(hit) = self.schema_hit(fname, vault) else {
            return Vec::new();
        };
        if hit.schema.namespace && !hit.via_namespace {
            return Vec::new();
        }
        let mut out: Vec<String> = hit
            .module
            .children_of(&hit.schema.id)
            .into_iter()
            .map(SchemaProps::pattern)
            .filter(|pattern| is_literal_pattern(pattern))
            .map(|pattern| format!("{fname}.{pattern}"))
            .filter(|candidate| {
                self.note_in_vault(candidate, vault)
                    .is_none_or(|existing| existing.stub)
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }
}
