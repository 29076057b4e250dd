//! Workspace configuration.
//!
//! Resolution order: built-in defaults, then `<root>/omni-notes.yaml` deep-merged
//! on top, then `OMNI_NOTES_*` environment overrides. Settings are read from the
//! merged YAML tree through dotted keys (`notes.enable_candidates`).

use crate::error::{EngineError, EngineResult};
use crate::model::Vault;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Workspace settings file name.
pub const CONFIG_FILE_NAME: &str = "omni-notes.yaml";

const ENABLE_CANDIDATES_ENV: &str = "OMNI_NOTES_ENABLE_CANDIDATES";
const CACHE_ENV: &str = "OMNI_NOTES_CACHE";
const MAX_CONCURRENCY_ENV: &str = "OMNI_NOTES_MAX_CONCURRENCY";

const DEFAULT_MAX_CONCURRENCY: usize = 8;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How unprefixed links pick a vault when the source vault lacks the target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DuplicateNoteBehavior {
    /// Resolve only inside the source note's vault.
    #[default]
    SourceVault,
    /// Fall back to these vaults, in order, after the source vault.
    UseVault(Vec<String>),
}

/// Resolved workspace configuration.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Workspace root (port files live here).
    pub root: PathBuf,
    /// Declared vaults, in declaration order.
    pub vaults: Vec<Vault>,
    /// Cross-vault policy for unprefixed links.
    pub duplicate_note_behavior: DuplicateNoteBehavior,
    /// Compute candidate (plain-text title) links.
    pub enable_candidates: bool,
    /// Read and write the per-vault parse cache.
    pub enable_cache: bool,
    /// In-flight task bound for batch operations.
    pub max_concurrency: usize,
    /// Change bus buffer size.
    pub event_capacity: usize,
    /// Default doctor mutation limit (`None` = unbounded).
    pub doctor_limit: Option<usize>,
}

impl WorkspaceConfig {
    /// Programmatic configuration with defaults.
    pub fn new(root: impl Into<PathBuf>, vaults: Vec<Vault>) -> Self {
        Self {
            root: root.into(),
            vaults,
            duplicate_note_behavior: DuplicateNoteBehavior::default(),
            enable_candidates: false,
            enable_cache: true,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            doctor_limit: None,
        }
    }

    /// Set the duplicate-note policy.
    #[must_use]
    pub fn with_duplicate_note_behavior(mut self, behavior: DuplicateNoteBehavior) -> Self {
        self.duplicate_note_behavior = behavior;
        self
    }

    /// Toggle candidate links.
    #[must_use]
    pub fn with_candidates(mut self, enabled: bool) -> Self {
        self.enable_candidates = enabled;
        self
    }

    /// Toggle the parse cache.
    #[must_use]
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.enable_cache = enabled;
        self
    }

    /// Set the batch concurrency bound (minimum 1).
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Cap doctor mutations per run.
    #[must_use]
    pub fn with_doctor_limit(mut self, limit: Option<usize>) -> Self {
        self.doctor_limit = limit;
        self
    }

    /// Lookup a vault by name.
    #[must_use]
    pub fn vault(&self, name: &str) -> Option<&Vault> {
        self.vaults.iter().find(|vault| vault.name == name)
    }

    /// Load `<root>/omni-notes.yaml` (if present) over defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Yaml`] when the file exists but is not valid YAML,
    /// and [`EngineError::Io`] when it exists but cannot be read.
    pub fn load(root: impl AsRef<Path>) -> EngineResult<Self> {
        let root = root.as_ref().to_path_buf();
        let path = root.join(CONFIG_FILE_NAME);
        let mut merged = Value::Mapping(Mapping::new());
        if path.is_file() {
            let content =
                std::fs::read_to_string(&path).map_err(|err| EngineError::io(&path, err))?;
            let user: Value = serde_yaml::from_str(&content)?;
            deep_merge(&mut merged, user);
        }
        Ok(Self::from_settings(root, &merged))
    }

    /// Build from an already merged settings tree.
    #[must_use]
    pub fn from_settings(root: PathBuf, settings: &Value) -> Self {
        let mut config = Self::new(root.clone(), resolve_vaults(&root, settings));

        config.duplicate_note_behavior = resolve_duplicate_behavior(settings);
        config.enable_candidates = first_bool(&[
            env_bool(ENABLE_CANDIDATES_ENV),
            get_setting_bool(settings, "notes.enable_candidates"),
        ])
        .unwrap_or(false);
        config.enable_cache = first_bool(&[
            env_bool(CACHE_ENV),
            get_setting_bool(settings, "notes.cache.enabled"),
        ])
        .unwrap_or(true);
        config.max_concurrency = std::env::var(MAX_CONCURRENCY_ENV)
            .ok()
            .and_then(|raw| parse_positive_usize(&raw))
            .or_else(|| get_setting_usize(settings, "notes.max_concurrency"))
            .unwrap_or(DEFAULT_MAX_CONCURRENCY);
        config.event_capacity =
            get_setting_usize(settings, "notes.event_capacity").unwrap_or(DEFAULT_EVENT_CAPACITY);
        config.doctor_limit = get_setting_usize(settings, "notes.doctor.limit");
        config
    }
}

fn resolve_vaults(root: &Path, settings: &Value) -> Vec<Vault> {
    let Some(Value::Sequence(items)) = get_setting_value(settings, "notes.vaults") else {
        return vec![Vault::new(default_vault_name(root), root)];
    };
    let mut vaults: Vec<Vault> = Vec::new();
    for item in items {
        let Some(fs_path) = item.get("fs_path").and_then(setting_value_to_string) else {
            continue;
        };
        let fs_path = normalize_relative(&fs_path);
        let name = item
            .get("name")
            .and_then(setting_value_to_string)
            .unwrap_or_else(|| fs_path.clone());
        if vaults.iter().any(|vault| vault.name == name) {
            log::warn!("duplicate vault name `{name}` in {CONFIG_FILE_NAME}; keeping the first");
            continue;
        }
        let mut vault = Vault::new(name, root.join(&fs_path));
        vault.self_contained = item
            .get("self_contained")
            .and_then(setting_value_to_bool)
            .unwrap_or(false);
        vaults.push(vault);
    }
    if vaults.is_empty() {
        vaults.push(Vault::new(default_vault_name(root), root));
    }
    vaults
}

fn default_vault_name(root: &Path) -> String {
    root.file_name()
        .map_or_else(|| "vault".to_string(), |name| name.to_string_lossy().to_string())
}

fn resolve_duplicate_behavior(settings: &Value) -> DuplicateNoteBehavior {
    let action = get_setting_string(settings, "notes.duplicate_note_behavior.action");
    match action.as_deref().map(str::trim) {
        Some("use_vault" | "useVault") => DuplicateNoteBehavior::UseVault(get_setting_string_list(
            settings,
            "notes.duplicate_note_behavior.payload",
        )),
        _ => DuplicateNoteBehavior::SourceVault,
    }
}

fn normalize_relative(value: &str) -> String {
    let normalized = value.trim().replace('\\', "/");
    let trimmed = normalized.trim_end_matches('/');
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                if let Some(existing) = base_map.get_mut(&key) {
                    deep_merge(existing, value);
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn parse_positive_usize(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|value| *value > 0)
}

fn first_bool(values: &[Option<bool>]) -> Option<bool> {
    values.iter().flatten().copied().next()
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .and_then(|raw| setting_value_to_bool(&Value::String(raw)))
}

fn setting_value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn setting_value_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        },
        Value::Number(number) => number.as_i64().map(|v| v != 0),
        _ => None,
    }
}

fn get_setting_value<'a>(settings: &'a Value, dotted_key: &str) -> Option<&'a Value> {
    let mut cursor = settings;
    for segment in dotted_key.split('.') {
        match cursor {
            Value::Mapping(map) => {
                let key = Value::String(segment.to_string());
                cursor = map.get(&key)?;
            }
            _ => return None,
        }
    }
    Some(cursor)
}

fn get_setting_string(settings: &Value, dotted_key: &str) -> Option<String> {
    get_setting_value(settings, dotted_key).and_then(setting_value_to_string)
}

fn get_setting_bool(settings: &Value, dotted_key: &str) -> Option<bool> {
    get_setting_value(settings, dotted_key).and_then(setting_value_to_bool)
}

fn get_setting_usize(settings: &Value, dotted_key: &str) -> Option<usize> {
    get_setting_string(settings, dotted_key).and_then(|raw| parse_positive_usize(&raw))
}

fn get_setting_string_list(settings: &Value, dotted_key: &str) -> Vec<String> {
    let Some(value) = get_setting_value(settings, dotted_key) else {
        return Vec::new();
    };
    match value {
        Value::String(single) => {
            let text = single.trim();
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            }
        }
        Value::Sequence(items) => items
            .iter()
            .filter_map(setting_value_to_string)
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
