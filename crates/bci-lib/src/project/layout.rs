use crate::error::{Error, Result};
use crate::project::metadata::METADATA_FILE;
use std::path::{Path, PathBuf};

/// On-disk shape of a project:
///
/// ```text
/// <root>/data/input_data/
/// <root>/data/preprocessed_data/
/// <root>/models/
/// <root>/visualizations/
/// <root>/project.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_data(&self) -> PathBuf {
        self.root.join("data").join("input_data")
    }

    pub fn preprocessed_data(&self) -> PathBuf {
        self.root.join("data").join("preprocessed_data")
    }

    pub fn models(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn visualizations(&self) -> PathBuf {
        self.root.join("visualizations")
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn subareas(&self) -> [PathBuf; 4] {
        [
            self.input_data(),
            self.preprocessed_data(),
            self.models(),
            self.visualizations(),
        ]
    }

    /// Check that every subarea and the metadata document are present.
    pub fn verify(&self) -> Result<()> {
        for dir in self.subareas() {
            if !dir.is_dir() {
                return Err(self.missing(&dir));
            }
        }
        let metadata = self.metadata();
        if !metadata.is_file() {
            return Err(self.missing(&metadata));
        }
        Ok(())
    }

    fn missing(&self, path: &Path) -> Error {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        Error::CorruptLayout {
            root: self.root.clone(),
            missing: relative.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn verify_names_the_missing_piece() {
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        for area in layout.subareas() {
            fs::create_dir_all(area).unwrap();
        }
        match layout.verify() {
            Err(Error::CorruptLayout { missing, .. }) => assert_eq!(missing, METADATA_FILE),
            other => panic!("unexpected {:?}", other),
        }
        fs::write(layout.metadata(), "{}").unwrap();
        layout.verify().unwrap();
    }
}
