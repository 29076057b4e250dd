//! Doctor: batch repairs over the note graph.
//!
//! The service works only through [`NoteEngine`] operations. Each planned fix
//! runs as its own task on the engine's [`crate::engine::pool::TaskPool`] and
//! re-checks its action against the current note before mutating, so a second
//! run over the same notes changes nothing.

pub mod actions;

use crate::engine::{DeleteNoteOpts, NoteEngine, RenameNoteOpts, WriteNoteOpts};
use crate::error::{EngineError, EngineResult};
use crate::graph::{BrokenLink, QUERY_ALL, QueryOptions};
use crate::model::{NoteLoc, NoteProps};
use actions::{DoctorFix, missing_targets, note_fix, placeholder_note};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use actions::DoctorAction;

/// Notes a doctor run looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DoctorCandidates {
    /// Every note.
    #[default]
    All,
    /// These note ids; unknown ids are ignored.
    Ids(Vec<String>),
    /// Result of a note query.
    Query(String),
}

/// Options for one doctor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorOptions {
    /// Action to run.
    pub action: DoctorAction,
    /// Notes to consider.
    #[serde(default)]
    pub candidates: DoctorCandidates,
    /// Maximum notes to mutate; `None` uses the workspace default.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl DoctorOptions {
    /// Run `action` over every note.
    #[must_use]
    pub fn new(action: DoctorAction) -> Self {
        Self {
            action,
            candidates: DoctorCandidates::All,
            limit: None,
        }
    }

    /// Restrict the candidate set.
    #[must_use]
    pub fn with_candidates(mut self, candidates: DoctorCandidates) -> Self {
        self.candidates = candidates;
        self
    }

    /// Cap mutations for this run.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A planned fix that did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorSkip {
    /// Note the fix was for.
    pub fname: String,
    /// Vault of that note.
    pub vault: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Outcome of a doctor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorReport {
    /// Action that ran.
    pub action: DoctorAction,
    /// Ids of notes written, created or deleted (new ids for reassigned notes).
    pub changed_ids: Vec<String>,
    /// Broken links found ([`DoctorAction::FindBrokenLinks`] and
    /// [`DoctorAction::CreateMissingLinkedNotes`]).
    pub findings: Vec<BrokenLink>,
    /// Fixes that were planned but not applied.
    pub skipped: Vec<DoctorSkip>,
    /// Whether the mutation limit cut the run short.
    pub truncated: bool,
}

impl DoctorReport {
    fn new(action: DoctorAction) -> Self {
        Self {
            action,
            changed_ids: Vec::new(),
            findings: Vec::new(),
            skipped: Vec::new(),
            truncated: false,
        }
    }

    /// Whether the run changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changed_ids.is_empty()
    }
}

/// Planned work item: which note (or missing location) and what to do.
#[derive(Debug, Clone)]
enum DoctorTask {
    Note { id: String, loc: NoteLoc },
    Missing(NoteLoc),
}

impl DoctorTask {
    fn loc(&self) -> &NoteLoc {
        match self {
            Self::Note { loc, .. } | Self::Missing(loc) => loc,
        }
    }
}

enum TaskOutcome {
    Changed(String),
    Skipped(String),
}

/// Runs doctor actions against an engine.
#[derive(Debug, Clone)]
pub struct DoctorService {
    engine: NoteEngine,
}

impl DoctorService {
    /// Doctor over `engine`.
    #[must_use]
    pub fn new(engine: NoteEngine) -> Self {
        Self { engine }
    }

    fn candidate_notes(&self, candidates: &DoctorCandidates) -> EngineResult<Vec<NoteProps>> {
        let notes = match candidates {
            DoctorCandidates::All => self.engine.query_notes_sync(QUERY_ALL, &QueryOptions::default())?,
            DoctorCandidates::Query(query) => self.engine.query_notes_sync(query, &QueryOptions::default())?,
            DoctorCandidates::Ids(ids) => {
                let mut seen = BTreeSet::new();
                ids.iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .filter_map(|id| self.engine.get_note(id))
                    .collect()
            }
        };
        Ok(notes)
    }

    /// Run one action and report what changed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before the engine is initialized
    /// and [`EngineError::Task`] when a repair task panics. Failures of single
    /// fixes are reported in [`DoctorReport::skipped`].
    pub async fn run(&self, opts: &DoctorOptions) -> EngineResult<DoctorReport> {
        let candidates = self.candidate_notes(&opts.candidates)?;
        let mut report = DoctorReport::new(opts.action);

        let mut planned: Vec<DoctorTask> = match opts.action {
            DoctorAction::FindBrokenLinks | DoctorAction::CreateMissingLinkedNotes => {
                let ids: Vec<String> = candidates.iter().map(|note| note.id.clone()).collect();
                report.findings = self.engine.broken_links(Some(&ids))?;
                if opts.action.is_read_only() {
                    Vec::new()
                } else {
                    missing_targets(&report.findings)
                        .into_iter()
                        .map(DoctorTask::Missing)
                        .collect()
                }
            }
            action => candidates
                .iter()
                .filter(|note| note_fix(action, note).is_some())
                .map(|note| DoctorTask::Note {
                    id: note.id.clone(),
                    loc: note.loc(),
                })
                .collect(),
        };

        let limit = opts.limit.or(self.engine.config().doctor_limit);
        if let Some(limit) = limit
            && planned.len() > limit
        {
            planned.truncate(limit);
            report.truncated = true;
        }

        let tasks: Vec<_> = planned
            .iter()
            .cloned()
            .map(|task| {
                let engine = self.engine.clone();
                let action = opts.action;
                async move { apply_task(&engine, action, task).await }
            })
            .collect();
        let outcomes = self.engine.pool().run_all(tasks).await?;

        for (task, outcome) in planned.iter().zip(outcomes) {
            match outcome {
                Ok(TaskOutcome::Changed(id)) => report.changed_ids.push(id),
                Ok(TaskOutcome::Skipped(reason)) => report.skipped.push(skip(task, reason)),
                Err(err) => {
                    log::warn!(
                        "Doctor {} failed for `{}/{}`: {err}",
                        opts.action,
                        task.loc().vault,
                        task.loc().fname
                    );
                    report.skipped.push(skip(task, err.to_string()));
                }
            }
        }

        log::info!(
            "Doctor {}: {} candidates, {} changed, {} findings, {} skipped{}",
            opts.action,
            candidates.len(),
            report.changed_ids.len(),
            report.findings.len(),
            report.skipped.len(),
            if report.truncated { " (limit reached)" } else { "" }
        );
        Ok(report)
    }
}

fn skip(task: &DoctorTask, reason: String) -> DoctorSkip {
    let loc = task.loc();
    DoctorSkip {
        fname: loc.fname.clone(),
        vault: loc.vault.clone(),
        reason,
    }
}

async fn apply_task(engine: &NoteEngine, action: DoctorAction, task: DoctorTask) -> EngineResult<TaskOutcome> {
    match task {
        DoctorTask::Missing(loc) => {
            let taken = engine.with_graph(|graph| graph.note_by_loc(&loc.fname, &loc.vault).is_some());
            if taken {
                return Ok(TaskOutcome::Skipped("note already exists".to_string()));
            }
            let note = placeholder_note(&loc);
            let id = note.id.clone();
            engine.write_note(note, WriteNoteOpts::default()).await?;
            Ok(TaskOutcome::Changed(id))
        }
        DoctorTask::Note { id, .. } => {
            let Some(note) = engine.get_note(&id) else {
                return Ok(TaskOutcome::Skipped("note no longer exists".to_string()));
            };
            let Some(fix) = note_fix(action, &note) else {
                return Ok(TaskOutcome::Skipped("already fixed".to_string()));
            };
            apply_fix(engine, &note, fix).await
        }
    }
}

async fn apply_fix(engine: &NoteEngine, note: &NoteProps, fix: DoctorFix) -> EngineResult<TaskOutcome> {
    match fix {
        DoctorFix::Write(fixed) => {
            let id = fixed.id.clone();
            engine.write_note(fixed, WriteNoteOpts::default()).await?;
            Ok(TaskOutcome::Changed(id))
        }
        DoctorFix::Delete => {
            engine.delete_note(&note.id, DeleteNoteOpts::default()).await?;
            Ok(TaskOutcome::Changed(note.id.clone()))
        }
        DoctorFix::Reassign(fixed) => {
            let id = fixed.id.clone();
            engine.delete_note(&note.id, DeleteNoteOpts::default()).await?;
            if let Err(err) = engine.write_note(fixed, WriteNoteOpts::default()).await {
                // Put the original back so the note is not lost.
                let mut original = note.clone();
                original.parent = None;
                original.children = Vec::new();
                engine.write_note(original, WriteNoteOpts::default()).await?;
                return Err(err);
            }
            Ok(TaskOutcome::Changed(id))
        }
        DoctorFix::Rename(new_loc) => {
            let renamed = engine
                .rename_note(&RenameNoteOpts {
                    old_loc: note.loc(),
                    new_loc,
                })
                .await;
            match renamed {
                Ok(_) => Ok(TaskOutcome::Changed(note.id.clone())),
                Err(EngineError::NoteExists { fname, .. }) => {
                    Ok(TaskOutcome::Skipped(format!("`{fname}` already exists")))
                }
                Err(err) => Err(err),
            }
        }
    }
}
