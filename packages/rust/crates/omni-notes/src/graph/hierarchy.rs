//! Parent/child maintenance.
//!
//! Invariant: a note's parent is its nearest existing ancestor in the same
//! vault, or the vault root. Inserting a note creates stubs for missing
//! intermediate levels; deleting one re-parents its children upward and prunes
//! stub ancestors left without children.

use super::{ChangeLog, NoteGraph};
use crate::error::{EngineError, EngineResult};
use crate::model::{NoteChangeEntry, NoteProps, ROOT_FNAME, ancestor_fnames, fname_key};
use crate::storage::derived_note_id;
use std::collections::HashMap;

fn is_under(child_fname: &str, parent_fname: &str) -> bool {
    let child = fname_key(child_fname);
    let parent = fname_key(parent_fname);
    child.len() > parent.len() + 1
        && child.starts_with(&parent)
        && child.as_bytes().get(parent.len()) == Some(&b'.')
}

impl NoteGraph {
    /// Id of the nearest existing ancestor of `fname` in `vault` (root fallback).
    pub(super) fn nearest_ancestor(&self, fname: &str, vault: &str) -> Option<String> {
        if fname_key(fname) == ROOT_FNAME {
            return None;
        }
        ancestor_fnames(fname)
            .into_iter()
            .find_map(|ancestor| self.note_by_loc(ancestor, vault))
            .or_else(|| self.vault_root(vault))
            .map(|note| note.id.clone())
    }

    fn child_sort_key(&self, id: &str) -> (String, String) {
        // Siblings missing from a partial batch sort by their id.
        self.notes.get(id).map_or_else(
            || (id.to_lowercase(), id.to_string()),
            |note| (note.title.to_lowercase(), fname_key(&note.fname)),
        )
    }

    fn sorted_children(&self, children: &[String]) -> Vec<String> {
        let mut keyed: Vec<((String, String), String)> = children
            .iter()
            .map(|id| (self.child_sort_key(id), id.clone()))
            .collect();
        keyed.sort();
        keyed.dedup_by(|left, right| left.1 == right.1);
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    /// Re-sort a note's children, logging an update when the order changed.
    pub(super) fn sort_children_logged(&mut self, parent_id: &str, log: &mut ChangeLog) {
        let Some(parent) = self.notes.get(parent_id) else {
            return;
        };
        let sorted = self.sorted_children(&parent.children);
        if sorted == parent.children {
            return;
        }
        let prev = parent.clone();
        if let Some(parent) = self.notes.get_mut(parent_id) {
            parent.children = sorted;
            log.push(NoteChangeEntry::update(parent.clone(), prev));
        }
    }

    fn edit_logged(&mut self, id: &str, log: &mut ChangeLog, edit: impl FnOnce(&mut NoteProps)) {
        let Some(note) = self.notes.get_mut(id) else {
            return;
        };
        let prev = note.clone();
        edit(note);
        if *note != prev {
            log.push(NoteChangeEntry::update(note.clone(), prev));
        }
    }

    /// In-memory stub whose id is derived from its location when that id is free.
    fn stub_for(&self, fname: String, vault: &str) -> NoteProps {
        let mut stub = NoteProps::new_stub(fname, vault);
        let derived = derived_note_id(vault, &stub.fname);
        if !self.notes.contains_key(&derived) {
            stub.id = derived;
        }
        stub
    }

    fn ensure_ancestor_stubs(&mut self, fname: &str, vault: &str, log: &mut ChangeLog) -> EngineResult<()> {
        let mut ancestors: Vec<String> = ancestor_fnames(fname).into_iter().map(str::to_string).collect();
        ancestors.reverse();
        for ancestor in ancestors {
            if self.note_by_loc(&ancestor, vault).is_none() {
                let stub = self.stub_for(ancestor, vault);
                self.insert_note(stub, log)?;
            }
        }
        Ok(())
    }

    /// Insert a note, creating missing ancestors and adopting orphaned descendants.
    ///
    /// Inserting over an in-memory stub replaces the stub and keeps its children.
    pub(super) fn insert_note(&mut self, note: NoteProps, log: &mut ChangeLog) -> EngineResult<()> {
        if let Some(existing) = self.note_by_loc(&note.fname, &note.vault) {
            if existing.id == note.id {
                return self.update_note(note, log);
            }
            if !existing.stub {
                return Err(EngineError::NoteExists {
                    fname: note.fname,
                    vault: note.vault,
                });
            }
            let stub_id = existing.id.clone();
            return self.replace_stub(&stub_id, note, log);
        }
        if self.notes.contains_key(&note.id) {
            return Err(EngineError::inconsistent(
                format!("note id already used by another note (creating `{}`)", note.fname),
                vec![note.id],
            ));
        }

        if fname_key(&note.fname) != ROOT_FNAME {
            self.ensure_ancestor_stubs(&note.fname, &note.vault, log)?;
        }
        let mut note = self.prepare(note);
        note.parent = self.nearest_ancestor(&note.fname, &note.vault);
        note.children = Vec::new();
        let id = note.id.clone();
        let fname = note.fname.clone();
        let parent_id = note.parent.clone();
        self.insert_raw(note);

        let adopted: Vec<String> = match &parent_id {
            Some(parent_id) => self
                .notes
                .get(parent_id)
                .map(|parent| {
                    parent
                        .children
                        .iter()
                        .filter(|child| {
                            self.notes
                                .get(*child)
                                .is_some_and(|child| is_under(&child.fname, &fname))
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            // A new root adopts every parentless note of its vault.
            None => {
                let vault = self.notes.get(&id).map(|note| note.vault.clone()).unwrap_or_default();
                self.notes
                    .values()
                    .filter(|other| other.vault == vault && other.parent.is_none() && other.id != id)
                    .map(|other| other.id.clone())
                    .collect()
            }
        };
        for child in &adopted {
            let new_parent = id.clone();
            self.edit_logged(child, log, |child| child.parent = Some(new_parent));
        }
        let sorted = self.sorted_children(&adopted);
        if let Some(note) = self.notes.get_mut(&id) {
            note.children = sorted;
            log.push(NoteChangeEntry::create(note.clone()));
        }

        if let Some(parent_id) = parent_id {
            let new_child = id.clone();
            self.edit_logged(&parent_id, log, |parent| {
                parent.children.retain(|child| !adopted.contains(child));
                parent.children.push(new_child);
            });
            self.sort_children_logged(&parent_id, log);
        }
        Ok(())
    }

    fn replace_stub(&mut self, stub_id: &str, note: NoteProps, log: &mut ChangeLog) -> EngineResult<()> {
        let Some(stub) = self.remove_raw(stub_id) else {
            return Err(EngineError::NoteNotFound(stub_id.to_string()));
        };
        let mut note = self.prepare(note);
        note.parent.clone_from(&stub.parent);
        note.children.clone_from(&stub.children);
        let id = note.id.clone();
        let children = note.children.clone();
        let parent_id = note.parent.clone();
        log.push(NoteChangeEntry::delete(stub));
        self.insert_raw(note.clone());
        log.push(NoteChangeEntry::create(note));

        for child in &children {
            let new_parent = id.clone();
            self.edit_logged(child, log, |child| child.parent = Some(new_parent));
        }
        if let Some(parent_id) = parent_id {
            let (old, new) = (stub_id.to_string(), id);
            self.edit_logged(&parent_id, log, |parent| {
                for child in &mut parent.children {
                    if *child == old {
                        child.clone_from(&new);
                    }
                }
            });
            self.sort_children_logged(&parent_id, log);
        }
        Ok(())
    }

    /// Remove a note; children move to its parent, childless stub ancestors are pruned.
    pub(super) fn delete_note(&mut self, id: &str, log: &mut ChangeLog) -> EngineResult<()> {
        let Some(note) = self.notes.get(id) else {
            return Err(EngineError::NoteNotFound(id.to_string()));
        };
        if note.is_root() {
            return Err(EngineError::ReservedNote(note.fname.clone()));
        }
        let parent_id = note.parent.clone();
        self.remove_with_reparent(id, log);

        let mut cursor = parent_id;
        while let Some(candidate) = cursor {
            let Some(parent) = self.notes.get(&candidate) else {
                break;
            };
            // Stubs backed by a file are only removed explicitly.
            if !parent.stub
                || parent.is_root()
                || parent.content_hash.is_some()
                || !parent.children.is_empty()
            {
                break;
            }
            cursor = parent.parent.clone();
            self.remove_with_reparent(&candidate, log);
        }
        Ok(())
    }

    fn remove_with_reparent(&mut self, id: &str, log: &mut ChangeLog) {
        let Some(note) = self.remove_raw(id) else {
            return;
        };
        let parent_id = note.parent.clone();
        for child in &note.children {
            let new_parent = parent_id.clone();
            self.edit_logged(child, log, |child| child.parent = new_parent);
        }
        if let Some(parent_id) = &parent_id {
            let (removed, moved) = (id.to_string(), note.children.clone());
            self.edit_logged(parent_id, log, |parent| {
                parent.children.retain(|child| *child != removed);
                parent.children.extend(moved);
            });
            self.sort_children_logged(parent_id, log);
        }
        log.push(NoteChangeEntry::delete(note));
    }

    /// Compute `parent`/`children` for every note and synthesize missing levels.
    pub(super) fn link_hierarchy(&mut self) {
        let mut missing: Vec<(String, String)> = Vec::new();
        for note in self.notes.values() {
            for ancestor in ancestor_fnames(&note.fname) {
                if self.note_by_loc(ancestor, &note.vault).is_none() {
                    missing.push((ancestor.to_string(), note.vault.clone()));
                }
            }
        }
        missing.sort_by_key(|(fname, vault)| (vault.clone(), fname_key(fname)));
        missing.dedup_by(|left, right| fname_key(&left.0) == fname_key(&right.0) && left.1 == right.1);
        for (fname, vault) in missing {
            let stub = self.stub_for(fname, &vault);
            self.insert_raw(stub);
        }

        let parents: Vec<(String, Option<String>)> = self
            .notes
            .values()
            .map(|note| (note.id.clone(), self.nearest_ancestor(&note.fname, &note.vault)))
            .collect();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for (id, parent) in &parents {
            if let Some(parent) = parent {
                children.entry(parent.clone()).or_default().push(id.clone());
            }
        }
        let sorted: HashMap<String, Vec<String>> = children
            .into_iter()
            .map(|(parent, kids)| (parent, self.sorted_children(&kids)))
            .collect();
        for (id, parent) in parents {
            if let Some(note) = self.notes.get_mut(&id) {
                note.parent = parent;
                note.children = sorted.get(&id).cloned().unwrap_or_default();
            }
        }
    }
}
