use crate::error::{Error, Result};
use crate::project::metadata::METADATA_FILE;
use crate::project::persist;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Canonical registry document inside the projects directory.
pub const REGISTRY_FILE: &str = "projects.json";
/// Older registry name; migrated on first load when no canonical file exists.
pub const LEGACY_REGISTRY_FILE: &str = "main.json";
pub(crate) const REGISTRY_LOCK: &str = ".projects.json.lock";

/// One `{project, filepath, progress}` row. The alternate `{name, path}` shape is
/// accepted on read and written back canonically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(alias = "name")]
    pub project: String,
    #[serde(alias = "path")]
    pub filepath: PathBuf,
    /// Number of completed stages, refreshed whenever the store touches the project.
    #[serde(default)]
    pub progress: usize,
}

#[derive(Debug)]
pub(crate) struct Registry {
    path: PathBuf,
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub(crate) fn load(base: &Path) -> Result<Self> {
        let path = base.join(REGISTRY_FILE);
        if path.exists() {
            let entries = read_entries(base, &path)?;
            return Ok(Self { path, entries });
        }
        let legacy = base.join(LEGACY_REGISTRY_FILE);
        if legacy.exists() {
            let entries = read_entries(base, &legacy)?;
            warn!(
                "migrating {} legacy registry entries from {} to {}",
                entries.len(),
                legacy.display(),
                path.display()
            );
            let registry = Self { path, entries };
            registry.save()?;
            return Ok(registry);
        }
        Ok(Self {
            path,
            entries: Vec::new(),
        })
    }

    pub(crate) fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub(crate) fn find(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.project == name)
    }

    pub(crate) fn find_mut(&mut self, name: &str) -> Option<&mut RegistryEntry> {
        self.entries.iter_mut().find(|entry| entry.project == name)
    }

    pub(crate) fn push(&mut self, entry: RegistryEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<RegistryEntry> {
        let idx = self.entries.iter().position(|entry| entry.project == name)?;
        Some(self.entries.remove(idx))
    }

    pub(crate) fn save(&self) -> Result<()> {
        persist::write_json_atomic(&self.path, &self.entries)
    }
}

/// Older registries point at the metadata document rather than the project
/// root, and relative paths are relative to the projects directory.
fn normalize(base: &Path, mut entry: RegistryEntry) -> RegistryEntry {
    if entry.filepath.file_name().is_some_and(|name| name == METADATA_FILE) {
        if let Some(root) = entry.filepath.parent() {
            entry.filepath = root.to_path_buf();
        }
    }
    if entry.filepath.is_relative() {
        entry.filepath = base.join(&entry.filepath);
    }
    entry
}

fn read_entries(base: &Path, path: &Path) -> Result<Vec<RegistryEntry>> {
    let text = fs::read_to_string(path).map_err(|err| Error::storage(path, err))?;
    // an empty file is what the first releases left behind before any project existed
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<RegistryEntry> =
        serde_json::from_str(&text).map_err(|err| Error::corrupt(path, err))?;
    let entries: Vec<RegistryEntry> = entries
        .into_iter()
        .map(|entry| normalize(base, entry))
        .collect();
    let mut seen = HashSet::new();
    for entry in &entries {
        if !seen.insert(entry.project.as_str()) {
            return Err(Error::corrupt(
                path,
                format!("project '{}' is registered twice", entry.project),
            ));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    #[test]
    fn missing_registry_is_empty() {
        let dir = tempdir().unwrap();
        let registry = Registry::load(dir.path()).unwrap();
        assert!(registry.entries().is_empty());
        assert!(!dir.path().join(REGISTRY_FILE).exists());
    }

    #[test]
    fn legacy_main_json_is_migrated() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(LEGACY_REGISTRY_FILE),
            json!([{"project": "p300", "filepath": "/data/p300", "progress": 2}]).to_string(),
        )
        .unwrap();
        let registry = Registry::load(dir.path()).unwrap();
        assert_eq!(registry.find("p300").unwrap().progress, 2);
        let canonical: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join(REGISTRY_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(canonical[0]["project"], json!("p300"));
    }

    #[test]
    fn empty_legacy_file_counts_as_empty_registry() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LEGACY_REGISTRY_FILE), "").unwrap();
        let registry = Registry::load(dir.path()).unwrap();
        assert!(registry.entries().is_empty());
    }

    #[test]
    fn alternate_entry_shape_is_rewritten_canonically() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(REGISTRY_FILE),
            json!([{"name": "ssvep", "path": "ssvep"}]).to_string(),
        )
        .unwrap();
        let registry = Registry::load(dir.path()).unwrap();
        let entry = registry.find("ssvep").unwrap();
        // relative rows resolve against the projects directory, not the cwd
        assert_eq!(entry.filepath, dir.path().join("ssvep"));
        assert_eq!(entry.progress, 0);
        registry.save().unwrap();
        let raw: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join(REGISTRY_FILE)).unwrap(),
        )
        .unwrap();
        let root = dir.path().join("ssvep");
        assert_eq!(
            raw,
            json!([{"project": "ssvep", "filepath": root, "progress": 0}])
        );
    }

    #[test]
    fn legacy_rows_pointing_at_metadata_resolve_to_the_root() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("abc").join(METADATA_FILE);
        fs::write(
            dir.path().join(LEGACY_REGISTRY_FILE),
            json!([{"project": "abc", "filepath": doc}]).to_string(),
        )
        .unwrap();
        let registry = Registry::load(dir.path()).unwrap();
        assert_eq!(registry.find("abc").unwrap().filepath, dir.path().join("abc"));
    }

    #[test]
    fn duplicate_names_are_corrupt() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(REGISTRY_FILE),
            json!([
                {"project": "a", "filepath": "a"},
                {"project": "a", "filepath": "b"}
            ])
            .to_string(),
        )
        .unwrap();
        assert!(matches!(
            Registry::load(dir.path()),
            Err(Error::CorruptMetadata { .. })
        ));
    }
}
