//! Fuzzy lookup over `(fname, title)`.

use super::NoteGraph;
use crate::model::{NoteProps, ROOT_FNAME, fname_key};
use std::collections::HashMap;

/// Query string that returns every note.
pub const QUERY_ALL: &str = "*";

/// Options for [`NoteGraph::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Only notes directly below the prefix before the query's last `.`.
    pub only_direct_children: bool,
    /// Restrict to one vault.
    pub vault: Option<String>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl QueryOptions {
    /// Direct-children lookup.
    #[must_use]
    pub fn direct_children() -> Self {
        Self {
            only_direct_children: true,
            ..Self::default()
        }
    }

    /// Restrict to a vault.
    #[must_use]
    pub fn in_vault(mut self, vault: impl Into<String>) -> Self {
        self.vault = Some(vault.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
struct SearchEntry {
    fname_lower: String,
    title_lower: String,
    tokens: Vec<String>,
}

impl SearchEntry {
    fn from_note(note: &NoteProps) -> Self {
        let fname_lower = fname_key(&note.fname);
        let title_lower = note.title.to_lowercase();
        let mut tokens: Vec<String> = tokenize(&fname_lower);
        tokens.extend(tokenize(&title_lower));
        tokens.sort();
        tokens.dedup();
        Self {
            fname_lower,
            title_lower,
            tokens,
        }
    }
}

/// Lowercased fname/title rows keyed by note id.
#[derive(Debug, Clone, Default)]
pub(super) struct SearchIndex {
    entries: HashMap<String, SearchEntry>,
}

impl SearchIndex {
    pub(super) fn upsert(&mut self, note: &NoteProps) {
        self.entries.insert(note.id.clone(), SearchEntry::from_note(note));
    }

    pub(super) fn remove(&mut self, id: &str) {
        self.entries.remove(id);
    }

    fn score(&self, id: &str, query: &str, query_tokens: &[String]) -> f64 {
        self.entries
            .get(id)
            .map_or(0.0, |entry| score_entry(entry, query, query_tokens))
    }
}

fn tokenize(value: &str) -> Vec<String> {
    value
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '-'))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut chars = haystack.chars();
    needle.chars().all(|wanted| chars.any(|ch| ch == wanted))
}

#[allow(clippy::cast_precision_loss)]
fn score_entry(entry: &SearchEntry, query: &str, query_tokens: &[String]) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let mut score: f64 = 0.0;
    if entry.fname_lower == query {
        score = score.max(1.0);
    }
    if entry.title_lower == query {
        score = score.max(0.95);
    }
    if entry.fname_lower.starts_with(query) {
        score = score.max(0.85);
    }
    if entry.fname_lower.contains(query) || entry.title_lower.contains(query) {
        score = score.max(0.7);
    }
    if !query_tokens.is_empty() {
        let matched = query_tokens
            .iter()
            .filter(|token| entry.tokens.iter().any(|have| have.contains(token.as_str())))
            .count();
        if matched > 0 {
            let ratio = matched as f64 / query_tokens.len() as f64;
            score = score.max(0.4 + ratio * 0.25);
        }
    }
    if score == 0.0 && is_subsequence(query, &entry.fname_lower) {
        score = 0.3;
    }
    score.clamp(0.0, 1.0)
}

impl NoteGraph {
    /// Ranked lookup by fname and title.
    ///
    /// - `*` returns every note (sorted by fname).
    /// - An empty query returns the children of the vault roots.
    /// - With `only_direct_children`, the part before the last `.` selects the
    ///   parent and the rest is matched against its children.
    ///
    /// An exact fname match always ranks first; ties sort by fname length then name.
    #[must_use]
    pub fn query(&self, query: &str, options: &QueryOptions) -> Vec<NoteProps> {
        let query = query.trim().to_lowercase();
        let in_vault = |note: &&NoteProps| {
            options
                .vault
                .as_deref()
                .is_none_or(|vault| note.vault == vault)
        };

        let mut results: Vec<&NoteProps> = if query == QUERY_ALL {
            let mut all: Vec<&NoteProps> = self.notes.values().filter(in_vault).collect();
            all.sort_by_key(|note| (fname_key(&note.fname), self.vault_rank(&note.vault)));
            all
        } else if query.is_empty() {
            self.root_children(options.vault.as_deref())
        } else if options.only_direct_children {
            self.direct_children_query(&query)
                .into_iter()
                .filter(in_vault)
                .collect()
        } else {
            let tokens = tokenize(&query);
            self.ranked(self.notes.values().filter(in_vault), &query, &tokens)
        };

        if let Some(limit) = options.limit {
            results.truncate(limit);
        }
        results.into_iter().cloned().collect()
    }

    fn root_children(&self, vault: Option<&str>) -> Vec<&NoteProps> {
        self.vaults
            .iter()
            .filter(|name| vault.is_none_or(|wanted| wanted == name.as_str()))
            .filter_map(|name| self.vault_root(name))
            .flat_map(|root| root.children.iter().filter_map(|id| self.notes.get(id)))
            .collect()
    }

    fn direct_children_query(&self, query: &str) -> Vec<&NoteProps> {
        let (prefix, rest) = match query.rfind('.') {
            Some(idx) => (&query[..idx], &query[idx + 1..]),
            None => ("", query),
        };
        let depth = if prefix.is_empty() {
            0
        } else {
            prefix.matches('.').count() + 1
        };
        let children = self.notes.values().filter(|note| {
            let key = fname_key(&note.fname);
            key != ROOT_FNAME
                && key.matches('.').count() == depth
                && (prefix.is_empty() || key.starts_with(&format!("{prefix}.")))
        });
        if rest.is_empty() {
            let mut all: Vec<&NoteProps> = children.collect();
            all.sort_by_key(|note| (note.title.to_lowercase(), fname_key(&note.fname)));
            return all;
        }
        let full = query.to_string();
        let tokens = tokenize(rest);
        let mut ranked: Vec<(f64, &NoteProps)> = children
            .map(|note| {
                let leaf = self.search.score(&note.id, rest, &tokens);
                let exact = if fname_key(&note.fname) == full { 1.0 } else { 0.0 };
                (leaf.max(exact), note)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        sort_ranked(&mut ranked, &full);
        ranked.into_iter().map(|(_, note)| note).collect()
    }

    fn ranked<'a>(
        &'a self,
        candidates: impl Iterator<Item = &'a NoteProps>,
        query: &str,
        tokens: &[String],
    ) -> Vec<&'a NoteProps> {
        let mut ranked: Vec<(f64, &NoteProps)> = candidates
            .map(|note| (self.search.score(&note.id, query, tokens), note))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        sort_ranked(&mut ranked, query);
        ranked.into_iter().map(|(_, note)| note).collect()
    }
}

fn sort_ranked(ranked: &mut [(f64, &NoteProps)], query: &str) {
    ranked.sort_by(|(left_score, left), (right_score, right)| {
        let left_exact = fname_key(&left.fname) == query;
        let right_exact = fname_key(&right.fname) == query;
        right_exact
            .cmp(&left_exact)
            .then_with(|| right_score.total_cmp(left_score))
            .then_with(|| left.fname.len().cmp(&right.fname.len()))
            .then_with(|| fname_key(&left.fname).cmp(&fname_key(&right.fname)))
            .then_with(|| left.vault.cmp(&right.vault))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_prefers_exact_then_prefix() {
        let exact = SearchEntry::from_note(&NoteProps::new("proj", "v", ""));
        let prefix = SearchEntry::from_note(&NoteProps::new("project", "v", ""));
        let sub = SearchEntry::from_note(&NoteProps::new("my.proj.x", "v", ""));
        let fuzzy = SearchEntry::from_note(&NoteProps::new("p.r.o.j", "v", ""));
        let tokens = tokenize("proj");

        let scores: Vec<f64> = [&exact, &prefix, &sub, &fuzzy]
            .iter()
            .map(|entry| score_entry(entry, "proj", &tokens))
            .collect();
        assert!(scores[0] > scores[1]);
        assert!(scores[1] > scores[2]);
        assert!(scores[2] > scores[3]);
        assert!(scores[3] > 0.0);
    }

    #[test]
    fn test_subsequence() {
        assert!(is_subsequence("pja", "proj.alpha"));
        assert!(!is_subsequence("zz", "proj.alpha"));
    }
}
