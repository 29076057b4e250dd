//! YAML frontmatter parsing and serialization.

use crate::error::LoadErrorKind;
use crate::links::compile_regex;
use crate::model::{
    CustomFields, CustomValue, NoteProps, TaskFields, default_title, yaml_key_to_string,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::sync::LazyLock;

// Closing fence must start a line; the single newline after it belongs to the
// fence so bodies round-trip unchanged.
static FRONTMATTER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r"(?s)\A---[ \t]*\r?\n(?:(.*?)\r?\n)?(?:---|\.\.\.)[ \t]*(?:\r?\n|\z)")
});

const KNOWN_KEYS: &[&str] = &[
    "id", "title", "desc", "updated", "created", "tags", "due", "owner", "priority", "stub",
];

/// Frontmatter key whose mapping is merged into the custom bag.
const CUSTOM_KEY: &str = "custom";

/// Frontmatter-derived note metadata (everything but the body and derived fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteMeta {
    /// Note id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub desc: String,
    /// Creation time (epoch millis) as written in the file.
    #[serde(default)]
    pub created: Option<i64>,
    /// Update time (epoch millis) as written in the file.
    #[serde(default)]
    pub updated: Option<i64>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Task fields.
    #[serde(default)]
    pub task: TaskFields,
    /// Other keys.
    #[serde(default)]
    pub custom: CustomFields,
    /// Persisted stub flag.
    #[serde(default)]
    pub stub: bool,
}

impl NoteMeta {
    /// Copy the metadata of a note.
    #[must_use]
    pub fn from_note(note: &NoteProps) -> Self {
        Self {
            id: note.id.clone(),
            title: note.title.clone(),
            desc: note.desc.clone(),
            created: Some(note.created),
            updated: Some(note.updated),
            tags: note.tags.clone(),
            task: note.task.clone(),
            custom: note.custom.clone(),
            stub: note.stub,
        }
    }

    /// Build a note from metadata plus body.
    ///
    /// Timestamps missing from the file fall back to `fallback_ts` (the file's mtime).
    #[must_use]
    pub fn into_note(self, fname: &str, vault: &str, body: String, fallback_ts: i64) -> NoteProps {
        let mut note = NoteProps::new(fname, vault, body);
        note.id = self.id;
        note.title = self.title;
        note.desc = self.desc;
        note.created = self.created.unwrap_or(fallback_ts);
        note.updated = self.updated.or(self.created).unwrap_or(fallback_ts);
        note.tags = self.tags;
        note.task = self.task;
        note.custom = self.custom;
        note.stub = self.stub;
        note
    }
}

/// Split a file into `(frontmatter yaml, body)` without parsing YAML.
#[must_use]
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(caps) = FRONTMATTER_REGEX.captures(content) else {
        return (None, content);
    };
    let body = caps.get(0).map_or(content, |m| &content[m.end()..]);
    let yaml = Some(caps.get(1).map_or("", |m| m.as_str()));
    (yaml, body)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn value_to_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|v| v as i64)),
        Value::String(raw) => raw.trim().parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw.trim())
                .ok()
                .map(|ts| ts.timestamp_millis())
        }),
        _ => None,
    }
}

fn extract_tags(value: Option<&Value>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    match value {
        Some(Value::String(s)) => {
            let tag = s.trim();
            if !tag.is_empty() {
                out.push(tag.to_string());
            }
        }
        Some(Value::Sequence(seq)) => {
            for item in seq {
                if let Some(tag) = value_to_string(item) {
                    let cleaned = tag.trim();
                    if !cleaned.is_empty() {
                        out.push(cleaned.to_string());
                    }
                }
            }
        }
        _ => {}
    }
    out.dedup();
    out
}

/// Parse frontmatter YAML into note metadata.
///
/// A missing `title` is filled from the fname. Missing timestamps stay `None`
/// and a missing `id` stays empty; [`NoteMeta::into_note`] and the caller fill
/// them, so cached metadata never freezes a fallback value.
///
/// Keys of a top-level `custom` mapping are lifted into the custom bag; a
/// top-level key of the same name wins.
///
/// # Errors
///
/// Returns a [`LoadErrorKind`] when the YAML is invalid or not a mapping.
pub fn parse_meta(
    yaml: Option<&str>,
    fname: &str,
) -> Result<NoteMeta, LoadErrorKind> {
    let mapping = match yaml.map(str::trim) {
        None | Some("") => Mapping::new(),
        Some(raw) => match serde_yaml::from_str::<Value>(raw) {
            Ok(Value::Mapping(map)) => map,
            Ok(Value::Null) => Mapping::new(),
            Ok(_) => return Err(LoadErrorKind::FrontmatterNotMapping),
            Err(err) => return Err(LoadErrorKind::Frontmatter(err.to_string())),
        },
    };

    let get = |key: &str| mapping.get(key);
    let id = get("id")
        .and_then(value_to_string)
        .map(|raw| raw.trim().to_string())
        .unwrap_or_default();
    let title = get("title")
        .and_then(value_to_string)
        .unwrap_or_else(|| default_title(fname));
    let desc = get("desc").and_then(value_to_string).unwrap_or_default();
    let created = get("created").and_then(value_to_millis);
    let updated = get("updated").and_then(value_to_millis);
    let task = TaskFields {
        due: get("due").and_then(value_to_string),
        owner: get("owner").and_then(value_to_string),
        priority: get("priority").and_then(value_to_string),
    };
    let stub = matches!(get("stub"), Some(Value::Bool(true)));
    let nested = match get(CUSTOM_KEY) {
        Some(Value::Mapping(nested)) => Some(nested),
        _ => None,
    };
    let mut custom: CustomFields = mapping
        .iter()
        .map(|(key, value)| (yaml_key_to_string(key), value))
        .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
        .filter(|(key, _)| nested.is_none() || key != CUSTOM_KEY)
        .map(|(key, value)| (key, CustomValue::from_yaml(value)))
        .collect();
    for (key, value) in nested.into_iter().flatten() {
        let key = yaml_key_to_string(key);
        if custom.get(&key).is_none() {
            custom.insert(key, CustomValue::from_yaml(value));
        }
    }

    Ok(NoteMeta {
        id,
        title,
        desc,
        created,
        updated,
        tags: extract_tags(get("tags")),
        task,
        custom,
        stub,
    })
}

fn insert(map: &mut Mapping, key: &str, value: Value) {
    map.insert(Value::String(key.to_string()), value);
}

/// Serialize a note to file content.
///
/// Key order is stable: known keys first, custom keys after in sorted order.
///
/// # Errors
///
/// Returns a YAML error when a value cannot be serialized.
pub fn serialize_note(note: &NoteProps) -> Result<String, serde_yaml::Error> {
    let mut map = Mapping::new();
    insert(&mut map, "id", Value::String(note.id.clone()));
    insert(&mut map, "title", Value::String(note.title.clone()));
    insert(&mut map, "desc", Value::String(note.desc.clone()));
    insert(&mut map, "updated", Value::Number(note.updated.into()));
    insert(&mut map, "created", Value::Number(note.created.into()));
    if !note.tags.is_empty() {
        insert(
            &mut map,
            "tags",
            Value::Sequence(note.tags.iter().cloned().map(Value::String).collect()),
        );
    }
    for (key, value) in [
        ("due", &note.task.due),
        ("owner", &note.task.owner),
        ("priority", &note.task.priority),
    ] {
        if let Some(value) = value {
            insert(&mut map, key, Value::String(value.clone()));
        }
    }
    if note.stub {
        insert(&mut map, "stub", Value::Bool(true));
    }
    for (key, value) in note.custom.iter() {
        if KNOWN_KEYS.contains(&key.as_str()) {
            continue;
        }
        insert(&mut map, key, value.to_yaml());
    }

    let yaml = serde_yaml::to_string(&Value::Mapping(map))?;
    Ok(format!("---\n{yaml}---\n{}", note.body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keeps_body_bytes() {
        let content = "---\nid: a\n---\n\n# Title\nbody\n";
        let (yaml, body) = split_frontmatter(content);
        assert_eq!(yaml, Some("id: a"));
        assert_eq!(body, "\n# Title\nbody\n");
    }

    #[test]
    fn test_split_empty_and_missing_frontmatter() {
        assert_eq!(split_frontmatter("---\n---\nbody"), (Some(""), "body"));
        assert_eq!(split_frontmatter("no frontmatter"), (None, "no frontmatter"));
    }

    #[test]
    fn test_parse_meta_fills_defaults_and_custom() {
        let meta = parse_meta(
            Some("id: n1\ncreated: 10\ntags: [x, y]\nowner: ada\nstatus: todo\nextra: 2"),
            "proj.alpha",
        )
        .unwrap();
        assert_eq!(meta.id, "n1");
        assert_eq!(meta.title, "Alpha");
        assert_eq!(meta.created, Some(10));
        assert_eq!(meta.updated, None);
        assert_eq!(meta.tags, vec!["x", "y"]);
        assert_eq!(meta.task.owner.as_deref(), Some("ada"));
        assert_eq!(meta.custom.task_status(), Some("todo"));
        assert_eq!(meta.custom.get_i64("extra"), Some(2));
        assert!(meta.custom.get("owner").is_none());

        let bare = parse_meta(None, "a").unwrap();
        assert!(bare.id.is_empty());
        assert_eq!((bare.created, bare.updated), (None, None));
        let note = bare.into_note("a", "v", String::new(), 99);
        assert_eq!((note.created, note.updated), (99, 99));
    }

    #[test]
    fn test_parse_meta_rejects_bad_yaml() {
        assert!(matches!(
            parse_meta(Some("id: [unclosed"), "a"),
            Err(LoadErrorKind::Frontmatter(_))
        ));
        assert_eq!(
            parse_meta(Some("- just\n- a list"), "a"),
            Err(LoadErrorKind::FrontmatterNotMapping)
        );
    }

    #[test]
    fn test_serialize_then_parse_preserves_values() {
        let mut note = NoteProps::new("a.b", "v", "\nhello [[c]]\n");
        note.custom.insert("zeta", "last");
        note.custom.insert("alpha", 1_i64);
        note.tags = vec!["t1".to_string()];
        note.task.due = Some("2024-01-01".to_string());

        let content = serialize_note(&note).unwrap();
        let (yaml, body) = split_frontmatter(&content);
        let meta = parse_meta(yaml, "a.b").unwrap();

        assert_eq!(body, note.body);
        assert_eq!(meta, NoteMeta::from_note(&note));
        let alpha = content.find("alpha:").unwrap();
        let zeta = content.find("zeta:").unwrap();
        assert!(content.find("id:").unwrap() < alpha && alpha < zeta);
    }

    #[test]
    fn test_nested_custom_mapping_is_lifted() {
        let meta = parse_meta(Some("status: done\ncustom:\n  x: 1\n  status: open\n  label: hi"), "a").unwrap();
        assert_eq!(meta.custom.get_i64("x"), Some(1));
        assert_eq!(meta.custom.get_str("label"), Some("hi"));
        assert_eq!(meta.custom.task_status(), Some("done"));
        assert!(meta.custom.get("custom").is_none());

        let scalar = parse_meta(Some("custom: plain"), "a").unwrap();
        assert_eq!(scalar.custom.get_str("custom"), Some("plain"));
    }
}
