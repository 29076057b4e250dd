//! Enumerate note and schema files in a notes directory.
//!
//! Vaults are flat: `<fname>.md` and `<module>.schema.yml` directly under the
//! notes directory. Hidden entries and subdirectories are not descended.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Note file extension.
pub const NOTE_EXTENSION: &str = "md";
/// Schema file suffix.
pub const SCHEMA_SUFFIX: &str = ".schema.yml";

/// Files found in one notes directory, each list sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredFiles {
    /// `*.md` note files.
    pub notes: Vec<PathBuf>,
    /// `*.schema.yml` schema files.
    pub schemas: Vec<PathBuf>,
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Fname of a note file (`a.b.md` -> `a.b`).
#[must_use]
pub fn note_fname(path: &Path) -> Option<String> {
    let is_note = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(NOTE_EXTENSION));
    if !is_note {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Module fname of a schema file (`daily.schema.yml` -> `daily`).
#[must_use]
pub fn schema_fname(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(SCHEMA_SUFFIX))
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Path relative to `root` with forward slashes.
#[must_use]
pub fn relative_path_string(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// List note and schema files directly under `notes_dir`.
#[must_use]
pub fn discover_files(notes_dir: &Path) -> DiscoveredFiles {
    let mut found = DiscoveredFiles::default();
    for entry in WalkDir::new(notes_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry.path()))
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if schema_fname(path).is_some() {
            found.schemas.push(path.to_path_buf());
        } else if note_fname(path).is_some() {
            found.notes.push(path.to_path_buf());
        }
    }
    found.notes.sort();
    found.schemas.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_is_flat_and_skips_hidden() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = tempfile::tempdir()?;
        let root = tmp.path();
        std::fs::write(root.join("b.md"), "")?;
        std::fs::write(root.join("a.c.md"), "")?;
        std::fs::write(root.join("daily.schema.yml"), "")?;
        std::fs::write(root.join(".hidden.md"), "")?;
        std::fs::write(root.join("readme.txt"), "")?;
        std::fs::create_dir_all(root.join("assets"))?;
        std::fs::write(root.join("assets/nested.md"), "")?;

        let found = discover_files(root);
        let names: Vec<String> = found
            .notes
            .iter()
            .map(|path| relative_path_string(path, root))
            .collect();
        assert_eq!(names, vec!["a.c.md", "b.md"]);
        assert_eq!(found.schemas.len(), 1);
        Ok(())
    }

    #[test]
    fn test_fname_helpers() {
        assert_eq!(note_fname(Path::new("/v/a.b.md")).as_deref(), Some("a.b"));
        assert_eq!(note_fname(Path::new("/v/a.b.txt")), None);
        assert_eq!(
            schema_fname(Path::new("/v/daily.schema.yml")).as_deref(),
            Some("daily")
        );
        assert_eq!(schema_fname(Path::new("/v/daily.yml")), None);
    }
}
