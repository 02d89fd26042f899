use crate::config::Settings;
use crate::error::{Error, Result};
use crate::io::DatasetIo;
use crate::pipeline::execute::ExecutionResult;
use crate::pipeline::spec::PipelineSpec;
use crate::project::layout::ProjectLayout;
use crate::project::metadata::{
    ArtifactCategory, FieldValue, MetadataField, MetadataFile, ProgressSummary, ProjectMetadata,
    Stage,
};
use crate::project::persist::LockGuard;
use crate::project::registry::{Registry, RegistryEntry, REGISTRY_LOCK};
use crate::signal::Recording;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Row returned by [`ProjectStore::list_projects`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub path: PathBuf,
    pub progress: ProgressSummary,
}

/// Registry of projects under one base directory, plus the directory contract
/// each project follows.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    base: PathBuf,
}

impl ProjectStore {
    /// Open (creating if needed) the projects directory.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base).map_err(|err| Error::storage(&base, err))?;
        Ok(Self { base })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::open(&settings.projects_dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    fn lock_registry(&self) -> Result<LockGuard> {
        LockGuard::acquire(&self.base.join(REGISTRY_LOCK))
    }

    pub fn create_project(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let _lock = self.lock_registry()?;
        let mut registry = Registry::load(&self.base)?;
        if registry.find(name).is_some() {
            return Err(Error::DuplicateProject {
                name: name.to_string(),
            });
        }
        let layout = ProjectLayout::new(self.base.join(name));
        match fs::create_dir(layout.root()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::DuplicateProject {
                    name: name.to_string(),
                })
            }
            Err(err) => return Err(Error::storage(layout.root(), err)),
        }
        if let Err(err) = populate_tree(&layout, name) {
            discard_tree(&layout);
            return Err(err);
        }
        registry.push(RegistryEntry {
            project: name.to_string(),
            filepath: layout.root().to_path_buf(),
            progress: 0,
        });
        if let Err(err) = registry.save() {
            discard_tree(&layout);
            return Err(err);
        }
        info!("created project '{}' at {}", name, layout.root().display());
        Ok(layout.root().to_path_buf())
    }

    /// Registry contents in insertion order. Individual metadata documents are not read.
    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let registry = Registry::load(&self.base)?;
        Ok(registry
            .entries()
            .iter()
            .map(|entry| ProjectSummary {
                name: entry.project.clone(),
                path: entry.filepath.clone(),
                progress: ProgressSummary::new(entry.progress),
            })
            .collect())
    }

    /// Remove a project's directory tree and registry entry. Irreversible, so the
    /// caller must echo the project name back as `confirmation`.
    pub fn delete_project(&self, name: &str, confirmation: &str) -> Result<()> {
        if confirmation != name {
            return Err(Error::ConfirmationMismatch {
                name: name.to_string(),
                confirmation: confirmation.to_string(),
            });
        }
        let _lock = self.lock_registry()?;
        let mut registry = Registry::load(&self.base)?;
        let root = registry
            .find(name)
            .map(|entry| entry.filepath.clone())
            .ok_or_else(|| Error::ProjectNotFound {
                name: name.to_string(),
            })?;
        match fs::remove_dir_all(&root) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "project '{}' directory {} was already gone",
                    name,
                    root.display()
                );
            }
            Err(err) => return Err(Error::storage(&root, err)),
        }
        registry.remove(name);
        registry.save()?;
        info!("deleted project '{}'", name);
        Ok(())
    }

    pub fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        let registry = Registry::load(&self.base)?;
        registry
            .find(name)
            .map(|entry| entry.filepath.clone())
            .ok_or_else(|| Error::ProjectNotFound {
                name: name.to_string(),
            })
    }

    pub fn layout(&self, name: &str) -> Result<ProjectLayout> {
        self.resolve_path(name).map(ProjectLayout::new)
    }

    pub fn metadata(&self, name: &str) -> Result<MetadataFile> {
        Ok(MetadataFile::at_root(&self.resolve_path(name)?))
    }

    /// Apply a metadata mutation, then refresh the registry's progress summary.
    pub fn update_metadata<F>(&self, name: &str, apply: F) -> Result<ProjectMetadata>
    where
        F: FnOnce(&mut ProjectMetadata) -> Result<()>,
    {
        let doc = self.metadata(name)?.update(apply)?;
        self.store_progress(name, doc.progress.completed())?;
        Ok(doc)
    }

    pub fn refresh_progress(&self, name: &str) -> Result<ProgressSummary> {
        let doc = self.metadata(name)?.load()?;
        let summary = doc.progress.summary();
        self.store_progress(name, summary.completed)?;
        Ok(summary)
    }

    fn store_progress(&self, name: &str, completed: usize) -> Result<()> {
        let _lock = self.lock_registry()?;
        let mut registry = Registry::load(&self.base)?;
        let entry = registry
            .find_mut(name)
            .ok_or_else(|| Error::ProjectNotFound {
                name: name.to_string(),
            })?;
        if entry.progress == completed {
            return Ok(());
        }
        entry.progress = completed;
        registry.save()
    }

    /// Copy a recording into `data/input_data/` and record it (marks Input).
    pub fn import_input(&self, name: &str, source: &Path) -> Result<PathBuf> {
        let layout = self.layout(name)?;
        let file_name = source.file_name().ok_or_else(|| {
            Error::storage(
                source,
                io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"),
            )
        })?;
        let dest = layout.input_data().join(file_name);
        if dest.exists() {
            return Err(Error::DuplicateArtifact { path: dest });
        }
        fs::copy(source, &dest).map_err(|err| Error::storage(source, err))?;
        let relative = dest.strip_prefix(layout.root()).unwrap_or(&dest).to_path_buf();
        let recorded = self.update_metadata(name, |doc| {
            doc.record_artifact(ArtifactCategory::InputData, &relative)
        });
        if let Err(err) = recorded {
            if let Err(cleanup) = fs::remove_file(&dest) {
                warn!("could not remove {}: {}", dest.display(), cleanup);
            }
            return Err(err);
        }
        info!("imported {} into project '{}'", source.display(), name);
        Ok(dest)
    }

    /// Read every imported input in import order and join them into one
    /// recording. The inputs must agree on sampling rate and channels.
    pub fn load_inputs<D>(&self, name: &str, io: &D) -> Result<Recording>
    where
        D: DatasetIo<Handle = Recording>,
    {
        let layout = self.layout(name)?;
        let doc = self.metadata(name)?.load()?;
        let mut joined: Option<Recording> = None;
        for entry in &doc.project_files {
            let path = layout.root().join(entry);
            let recording = io.read_dataset(&path)?;
            debug!("input {} ({} samples)", path.display(), recording.n_samples());
            match joined.as_mut() {
                None => joined = Some(recording),
                Some(base) => base.append(recording).map_err(|reason| Error::Dataset {
                    path: path.clone(),
                    reason: format!("cannot concatenate: {}", reason),
                })?,
            }
        }
        joined.ok_or_else(|| Error::Dataset {
            path: layout.input_data(),
            reason: "project has no imported inputs".to_string(),
        })
    }

    /// Store the pipeline's steps as the project's preprocessing settings and
    /// AI algorithm list without touching progress.
    pub fn save_pipeline_settings(
        &self,
        name: &str,
        spec: &PipelineSpec,
    ) -> Result<ProjectMetadata> {
        self.update_metadata(name, |doc| {
            write_settings(doc, spec)?;
            Ok(())
        })
    }

    /// Record a finished run: settings are stored and the Preprocessing / AI Model
    /// stages are marked for the step groups that ran. A failed run is reported
    /// back as its [`Error::Operation`] and nothing is written.
    pub fn record_execution<H>(
        &self,
        name: &str,
        spec: &PipelineSpec,
        result: &ExecutionResult<H>,
    ) -> Result<ProjectMetadata> {
        if let Some(error) = result.failure().and_then(|outcome| outcome.error.clone()) {
            return Err(Error::Operation(error));
        }
        self.update_metadata(name, |doc| {
            let (preprocessing, models) = write_settings(doc, spec)?;
            if preprocessing {
                doc.set_stage(Stage::Preprocessing, true);
            }
            if models {
                doc.set_stage(Stage::AiModel, true);
            }
            Ok(())
        })
    }
}

/// Returns which step groups were present.
fn write_settings(doc: &mut ProjectMetadata, spec: &PipelineSpec) -> Result<(bool, bool)> {
    let (preprocessing, models): (Vec<_>, Vec<_>) = spec
        .steps()
        .iter()
        .partition(|step| step.is_preprocessing());
    let has_preprocessing = !preprocessing.is_empty();
    let has_models = !models.is_empty();
    if has_preprocessing {
        let steps = preprocessing.iter().map(|step| step.to_json()).collect();
        doc.set_field(MetadataField::PreprocessingSettings, FieldValue::List(steps))?;
    }
    if has_models {
        let steps = models.iter().map(|step| step.to_json()).collect();
        doc.set_field(MetadataField::AiAlgorithms, FieldValue::List(steps))?;
    }
    Ok((has_preprocessing, has_models))
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name is a relative directory reference")
    } else if name.starts_with('.') {
        Some("name must not start with '.'")
    } else if name.contains(['/', '\\', '\0']) {
        Some("name contains a path separator")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::InvalidProjectName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Create the subareas and the initial metadata inside an already created root.
pub(crate) fn populate_tree(layout: &ProjectLayout, name: &str) -> Result<()> {
    for dir in layout.subareas() {
        fs::create_dir_all(&dir).map_err(|err| Error::storage(&dir, err))?;
    }
    MetadataFile::at_root(layout.root()).create(&ProjectMetadata::new(name))
}

fn discard_tree(layout: &ProjectLayout) {
    if let Err(err) = fs::remove_dir_all(layout.root()) {
        warn!(
            "rollback of {} failed: {}",
            layout.root().display(),
            err
        );
    }
}
