use crate::error::{Error, Result};
use crate::project::persist::{self, LockGuard};
use chrono::Utc;
use log::debug;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the per-project metadata document.
pub const METADATA_FILE: &str = "project.json";
const METADATA_LOCK: &str = ".project.json.lock";

/// One of the five fixed progress checkpoints, in their global order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Input,
    Preprocessing,
    AiModel,
    Visualization,
    Output,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Input,
        Stage::Preprocessing,
        Stage::AiModel,
        Stage::Visualization,
        Stage::Output,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Input => "Input",
            Stage::Preprocessing => "Preprocessing",
            Stage::AiModel => "AI Model",
            Stage::Visualization => "Visualization",
            Stage::Output => "Output",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = Error;

    /// Accepts the display names ("AI Model") and the older snake-case keys ("ai_model").
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(' ', "_");
        match normalized.as_str() {
            "input" => Ok(Stage::Input),
            "preprocessing" => Ok(Stage::Preprocessing),
            "ai_model" => Ok(Stage::AiModel),
            "visualization" => Ok(Stage::Visualization),
            "output" => Ok(Stage::Output),
            _ => Err(Error::UnknownStage(s.to_string())),
        }
    }
}

/// Completion flags for every [`Stage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressMap {
    done: [bool; 5],
}

impl ProgressMap {
    pub fn get(&self, stage: Stage) -> bool {
        self.done[stage.index()]
    }

    pub fn set(&mut self, stage: Stage, completed: bool) {
        self.done[stage.index()] = completed;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, bool)> + '_ {
        Stage::ALL.iter().map(move |stage| (*stage, self.get(*stage)))
    }

    pub fn completed(&self) -> usize {
        self.done.iter().filter(|done| **done).count()
    }

    pub fn total(&self) -> usize {
        self.done.len()
    }

    pub fn percent_complete(&self) -> f64 {
        self.completed() as f64 / self.total() as f64
    }

    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            completed: self.completed(),
            total: self.total(),
        }
    }
}

impl Serialize for ProgressMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.total()))?;
        for (stage, done) in self.iter() {
            map.serialize_entry(stage.name(), &done)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProgressMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = BTreeMap::<String, bool>::deserialize(deserializer)?;
        let mut seen = [false; 5];
        let mut progress = ProgressMap::default();
        for (key, done) in raw {
            let stage = key
                .parse::<Stage>()
                .map_err(|_| de::Error::custom(format!("unexpected progress stage '{}'", key)))?;
            if seen[stage.index()] {
                return Err(de::Error::custom(format!(
                    "progress stage '{}' listed twice",
                    stage
                )));
            }
            seen[stage.index()] = true;
            progress.set(stage, done);
        }
        if let Some(missing) = Stage::ALL.iter().find(|stage| !seen[stage.index()]) {
            return Err(de::Error::custom(format!(
                "progress is missing stage '{}'",
                missing
            )));
        }
        Ok(progress)
    }
}

/// Denormalized "n of 5" view used by the registry listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub completed: usize,
    pub total: usize,
}

impl ProgressSummary {
    pub fn new(completed: usize) -> Self {
        Self {
            completed,
            total: Stage::ALL.len(),
        }
    }

    pub fn percent(&self) -> f64 {
        self.completed as f64 / self.total as f64
    }
}

impl fmt::Display for ProgressSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

/// Fields reachable through [`ProjectMetadata::set_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Description,
    Contributors,
    PreprocessingSettings,
    AiAlgorithms,
}

impl MetadataField {
    pub fn key(self) -> &'static str {
        match self {
            MetadataField::Description => "project_description",
            MetadataField::Contributors => "project_contributors",
            MetadataField::PreprocessingSettings => "preprocessing_settings",
            MetadataField::AiAlgorithms => "ai_algorithms",
        }
    }
}

impl FromStr for MetadataField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "project_description" | "description" => Ok(MetadataField::Description),
            "project_contributors" | "contributors" => Ok(MetadataField::Contributors),
            "preprocessing_settings" => Ok(MetadataField::PreprocessingSettings),
            "ai_algorithms" => Ok(MetadataField::AiAlgorithms),
            other => Err(Error::UnknownField(other.to_string())),
        }
    }
}

/// Value handed to [`ProjectMetadata::set_field`]; list fields also take comma-separated text.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<Value>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        FieldValue::List(values.into_iter().map(Value::String).collect())
    }
}

impl From<Vec<Value>> for FieldValue {
    fn from(values: Vec<Value>) -> Self {
        FieldValue::List(values)
    }
}

/// Where a recorded artifact belongs inside the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactCategory {
    InputData,
    PreprocessedData,
    Model,
    Visualization,
}

impl ArtifactCategory {
    /// Stage completed by recording an artifact of this category.
    pub fn stage(self) -> Option<Stage> {
        match self {
            ArtifactCategory::InputData => Some(Stage::Input),
            ArtifactCategory::PreprocessedData => None,
            ArtifactCategory::Model => Some(Stage::AiModel),
            ArtifactCategory::Visualization => Some(Stage::Visualization),
        }
    }
}

impl FromStr for ArtifactCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "input" | "input_data" => Ok(ArtifactCategory::InputData),
            "preprocessed" | "preprocessed_data" => Ok(ArtifactCategory::PreprocessedData),
            "model" | "models" => Ok(ArtifactCategory::Model),
            "visualization" | "visualizations" => Ok(ArtifactCategory::Visualization),
            _ => Err(Error::UnknownField(s.to_string())),
        }
    }
}

/// Typed view of `project.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_name: String,
    #[serde(default)]
    pub creation_date: String,
    #[serde(default)]
    pub last_modified_date: String,
    pub progress: ProgressMap,
    /// Input recordings.
    #[serde(default)]
    pub project_files: Vec<String>,
    #[serde(default)]
    pub preprocessed_files: Vec<String>,
    #[serde(default)]
    pub model_files: Vec<String>,
    #[serde(default)]
    pub visualization_files: Vec<String>,
    #[serde(default)]
    pub project_description: String,
    #[serde(default)]
    pub project_contributors: Vec<String>,
    #[serde(default)]
    pub preprocessing_settings: Vec<Value>,
    #[serde(default)]
    pub ai_algorithms: Vec<Value>,
    /// Fields written by other tools; carried through every rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

impl ProjectMetadata {
    pub fn new(project_name: &str) -> Self {
        let now = timestamp();
        Self {
            project_name: project_name.to_string(),
            creation_date: now.clone(),
            last_modified_date: now,
            progress: ProgressMap::default(),
            project_files: Vec::new(),
            preprocessed_files: Vec::new(),
            model_files: Vec::new(),
            visualization_files: Vec::new(),
            project_description: String::new(),
            project_contributors: Vec::new(),
            preprocessing_settings: Vec::new(),
            ai_algorithms: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Load a metadata document. `path` may be the document itself or the project root.
    pub fn load(path: &Path) -> Result<Self> {
        let path = if path.is_dir() {
            path.join(METADATA_FILE)
        } else {
            path.to_path_buf()
        };
        let text = fs::read_to_string(&path).map_err(|err| Error::storage(&path, err))?;
        Self::parse(&text, &path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let doc: ProjectMetadata =
            serde_json::from_str(text).map_err(|err| Error::corrupt(path, err))?;
        if doc.project_name.trim().is_empty() {
            return Err(Error::corrupt(path, "project_name is empty"));
        }
        Ok(doc)
    }

    pub fn touch(&mut self) {
        self.last_modified_date = timestamp();
    }

    pub fn set_field(&mut self, field: MetadataField, value: FieldValue) -> Result<()> {
        match field {
            MetadataField::Description => match value {
                FieldValue::Text(text) => self.project_description = text,
                FieldValue::List(_) => {
                    return Err(Error::FieldTypeMismatch {
                        field: field.key(),
                        expected: "a string",
                    })
                }
            },
            MetadataField::Contributors => {
                self.project_contributors = list_items(value)
                    .into_iter()
                    .map(|item| match item {
                        Value::String(name) => Ok(name),
                        _ => Err(Error::FieldTypeMismatch {
                            field: field.key(),
                            expected: "a list of strings",
                        }),
                    })
                    .collect::<Result<_>>()?;
            }
            MetadataField::PreprocessingSettings => {
                self.preprocessing_settings = list_items(value);
            }
            MetadataField::AiAlgorithms => self.ai_algorithms = list_items(value),
        }
        self.touch();
        Ok(())
    }

    /// Set a stage by its name; unknown names fail with [`Error::UnknownStage`].
    pub fn mark_stage_complete(&mut self, stage: &str, completed: bool) -> Result<()> {
        let stage = stage.parse::<Stage>()?;
        self.set_stage(stage, completed);
        Ok(())
    }

    pub fn set_stage(&mut self, stage: Stage, completed: bool) {
        self.progress.set(stage, completed);
        self.touch();
    }

    pub fn files(&self, category: ArtifactCategory) -> &[String] {
        match category {
            ArtifactCategory::InputData => &self.project_files,
            ArtifactCategory::PreprocessedData => &self.preprocessed_files,
            ArtifactCategory::Model => &self.model_files,
            ArtifactCategory::Visualization => &self.visualization_files,
        }
    }

    pub fn record_artifact(&mut self, category: ArtifactCategory, path: &Path) -> Result<()> {
        let entry = path.to_string_lossy().into_owned();
        let files = match category {
            ArtifactCategory::InputData => &mut self.project_files,
            ArtifactCategory::PreprocessedData => &mut self.preprocessed_files,
            ArtifactCategory::Model => &mut self.model_files,
            ArtifactCategory::Visualization => &mut self.visualization_files,
        };
        if files.contains(&entry) {
            return Err(Error::DuplicateArtifact {
                path: path.to_path_buf(),
            });
        }
        files.push(entry);
        if let Some(stage) = category.stage() {
            self.progress.set(stage, true);
        }
        self.touch();
        Ok(())
    }
}

fn list_items(value: FieldValue) -> Vec<Value> {
    match value {
        FieldValue::Text(text) => split_list(&text),
        FieldValue::List(items) => items,
    }
}

fn split_list(text: &str) -> Vec<Value> {
    text.split(',')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| Value::String(piece.to_string()))
        .collect()
}

/// Write-through handle on one project's metadata document.
///
/// Each mutation holds an exclusive lock on a hidden sibling file for the whole
/// load-modify-store cycle and replaces the document atomically.
#[derive(Debug, Clone)]
pub struct MetadataFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl MetadataFile {
    pub fn at_root(root: &Path) -> Self {
        Self {
            path: root.join(METADATA_FILE),
            lock_path: root.join(METADATA_LOCK),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ProjectMetadata> {
        ProjectMetadata::load(&self.path)
    }

    pub(crate) fn create(&self, doc: &ProjectMetadata) -> Result<()> {
        let _lock = LockGuard::acquire(&self.lock_path)?;
        persist::write_json_atomic(&self.path, doc)
    }

    /// Run `apply` against a freshly loaded copy and store the result.
    pub fn update<F>(&self, apply: F) -> Result<ProjectMetadata>
    where
        F: FnOnce(&mut ProjectMetadata) -> Result<()>,
    {
        let _lock = LockGuard::acquire(&self.lock_path)?;
        let mut doc = self.load()?;
        apply(&mut doc)?;
        persist::write_json_atomic(&self.path, &doc)?;
        debug!("rewrote {}", self.path.display());
        Ok(doc)
    }

    pub fn set_field(&self, field: &str, value: FieldValue) -> Result<ProjectMetadata> {
        let field = field.parse::<MetadataField>()?;
        self.update(|doc| doc.set_field(field, value))
    }

    pub fn mark_stage_complete(&self, stage: &str, completed: bool) -> Result<ProjectMetadata> {
        let stage = stage.parse::<Stage>()?;
        self.update(|doc| {
            doc.set_stage(stage, completed);
            Ok(())
        })
    }

    pub fn record_artifact(
        &self,
        category: ArtifactCategory,
        artifact: &Path,
    ) -> Result<ProjectMetadata> {
        self.update(|doc| doc.record_artifact(category, artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_doc(dir: &Path, value: &Value) -> MetadataFile {
        fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_string_pretty(value).unwrap(),
        )
        .unwrap();
        MetadataFile::at_root(dir)
    }

    #[test]
    fn stage_names_parse_both_spellings() {
        assert_eq!("AI Model".parse::<Stage>().unwrap(), Stage::AiModel);
        assert_eq!("ai_model".parse::<Stage>().unwrap(), Stage::AiModel);
        assert_eq!("Input".parse::<Stage>().unwrap(), Stage::Input);
        assert!(matches!(
            "Deployment".parse::<Stage>(),
            Err(Error::UnknownStage(name)) if name == "Deployment"
        ));
    }

    #[test]
    fn marking_a_stage_adds_one_fifth() {
        let mut doc = ProjectMetadata::new("alpha");
        assert_eq!(doc.progress.percent_complete(), 0.0);
        for (done, stage) in Stage::ALL.iter().enumerate() {
            let before = doc.progress.percent_complete();
            doc.mark_stage_complete(stage.name(), true).unwrap();
            assert!(doc.progress.get(*stage));
            assert!((doc.progress.percent_complete() - before - 0.2).abs() < 1e-12);
            assert_eq!(doc.progress.completed(), done + 1);
        }
        // already complete: no change
        doc.mark_stage_complete("Output", true).unwrap();
        assert_eq!(doc.progress.completed(), 5);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let mut doc = ProjectMetadata::new("alpha");
        let err = doc.mark_stage_complete("Training", true).unwrap_err();
        assert!(matches!(err, Error::UnknownStage(_)));
        assert_eq!(doc.progress.completed(), 0);
    }

    #[test]
    fn list_fields_split_comma_strings() {
        let mut doc = ProjectMetadata::new("alpha");
        doc.set_field(
            MetadataField::Contributors,
            FieldValue::from(" Ada ,Grace,, Linus "),
        )
        .unwrap();
        assert_eq!(doc.project_contributors, vec!["Ada", "Grace", "Linus"]);

        doc.set_field(
            MetadataField::Contributors,
            FieldValue::from(vec!["Barbara".to_string()]),
        )
        .unwrap();
        assert_eq!(doc.project_contributors, vec!["Barbara"]);
    }

    #[test]
    fn description_is_stored_verbatim() {
        let mut doc = ProjectMetadata::new("alpha");
        doc.set_field(
            MetadataField::Description,
            FieldValue::from("motor imagery, 2 classes"),
        )
        .unwrap();
        assert_eq!(doc.project_description, "motor imagery, 2 classes");
        let err = doc
            .set_field(MetadataField::Description, FieldValue::List(vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::FieldTypeMismatch { .. }));
    }

    #[test]
    fn unknown_field_name_fails() {
        assert!(matches!(
            "project_owner".parse::<MetadataField>(),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn recording_artifacts_marks_stages() {
        let mut doc = ProjectMetadata::new("alpha");
        doc.record_artifact(ArtifactCategory::InputData, Path::new("data/input_data/s01.edf"))
            .unwrap();
        doc.record_artifact(
            ArtifactCategory::PreprocessedData,
            Path::new("data/preprocessed_data/s01.csv"),
        )
        .unwrap();
        doc.record_artifact(ArtifactCategory::Model, Path::new("models/lda.pkl"))
            .unwrap();
        assert!(doc.progress.get(Stage::Input));
        assert!(!doc.progress.get(Stage::Preprocessing));
        assert!(doc.progress.get(Stage::AiModel));
        assert!(!doc.progress.get(Stage::Visualization));
        assert_eq!(doc.project_files, vec!["data/input_data/s01.edf"]);
        assert_eq!(doc.files(ArtifactCategory::Model), ["models/lda.pkl"]);

        let err = doc
            .record_artifact(ArtifactCategory::Model, Path::new("models/lda.pkl"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateArtifact { .. }));
    }

    #[test]
    fn load_rejects_missing_stage() {
        let dir = tempdir().unwrap();
        let file = write_doc(
            dir.path(),
            &json!({
                "project_name": "alpha",
                "progress": {"Input": true, "Preprocessing": false, "AI Model": false, "Visualization": false}
            }),
        );
        let err = file.load().unwrap_err();
        assert!(matches!(err, Error::CorruptMetadata { .. }), "{err}");
    }

    #[test]
    fn load_rejects_missing_name_and_garbage() {
        let dir = tempdir().unwrap();
        let file = write_doc(dir.path(), &json!({"progress": {}}));
        assert!(matches!(file.load(), Err(Error::CorruptMetadata { .. })));

        fs::write(dir.path().join(METADATA_FILE), "{ not json").unwrap();
        assert!(matches!(file.load(), Err(Error::CorruptMetadata { .. })));
    }

    #[test]
    fn legacy_stage_keys_load_and_rewrite_canonically() {
        let dir = tempdir().unwrap();
        let file = write_doc(
            dir.path(),
            &json!({
                "project_name": "legacy",
                "creation_date": "2024-02-01 10:00:00.000000",
                "last_modified_date": "2024-02-01 10:00:00.000000",
                "progress": {
                    "input": true, "preprocessing": false, "ai_model": false,
                    "visualization": false, "output": false
                },
                "project_files": [],
                "project_description": "",
                "project_contributors": [],
                "preprocessing_settings": [],
                "ai_algorithms": []
            }),
        );
        let doc = file.load().unwrap();
        assert!(doc.progress.get(Stage::Input));
        file.mark_stage_complete("Output", true).unwrap();
        let raw: Value =
            serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(raw["progress"]["AI Model"], json!(false));
        assert_eq!(raw["progress"]["Output"], json!(true));
        assert!(raw["progress"].get("ai_model").is_none());
    }

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let dir = tempdir().unwrap();
        let mut doc = serde_json::to_value(ProjectMetadata::new("alpha")).unwrap();
        doc["acquisition"] = json!({"device": "OpenBCI Cyton", "channels": 8});
        let file = write_doc(dir.path(), &doc);

        file.set_field("description", FieldValue::from("pilot"))
            .unwrap();

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(raw["acquisition"]["device"], json!("OpenBCI Cyton"));
        assert_eq!(raw["project_description"], json!("pilot"));
    }

    #[test]
    fn write_through_updates_last_modified() {
        let dir = tempdir().unwrap();
        let mut doc = ProjectMetadata::new("alpha");
        doc.last_modified_date = "2000-01-01T00:00:00+00:00".into();
        let file = MetadataFile::at_root(dir.path());
        file.create(&doc).unwrap();

        let updated = file.mark_stage_complete("Input", true).unwrap();
        assert_ne!(updated.last_modified_date, "2000-01-01T00:00:00+00:00");
        let reloaded = ProjectMetadata::load(dir.path()).unwrap();
        assert_eq!(reloaded, updated);
    }

    #[test]
    fn failed_mutation_leaves_document_untouched() {
        let dir = tempdir().unwrap();
        let file = MetadataFile::at_root(dir.path());
        file.create(&ProjectMetadata::new("alpha")).unwrap();
        let before = fs::read_to_string(file.path()).unwrap();

        assert!(file.mark_stage_complete("Deploy", true).is_err());
        assert!(file.set_field("owner", FieldValue::from("x")).is_err());

        assert_eq!(fs::read_to_string(file.path()).unwrap(), before);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let dir = tempdir().unwrap();
        MetadataFile::at_root(dir.path())
            .create(&ProjectMetadata::new("alpha"))
            .unwrap();
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let root = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    for round in 0..5 {
                        MetadataFile::at_root(&root)
                            .update(|doc| {
                                doc.project_contributors.push(format!("w{}-{}", i, round));
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let doc = ProjectMetadata::load(dir.path()).unwrap();
        assert_eq!(doc.project_contributors.len(), 40);
    }
}
