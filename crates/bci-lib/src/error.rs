use crate::pipeline::validate::ValidationErrors;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the core can report. Callers match on the variant; nothing in
/// the library swallows one of these.
#[derive(Debug, Error)]
pub enum Error {
    #[error("project '{name}' already exists")]
    DuplicateProject { name: String },

    #[error("project '{name}' not found")]
    ProjectNotFound { name: String },

    #[error("confirmation '{confirmation}' does not match project name '{name}'")]
    ConfirmationMismatch { name: String, confirmation: String },

    #[error("invalid project name '{name}': {reason}")]
    InvalidProjectName { name: String, reason: &'static str },

    #[error("corrupt metadata in {}: {reason}", path.display())]
    CorruptMetadata { path: PathBuf, reason: String },

    #[error("corrupt project layout at {}: missing {missing}", root.display())]
    CorruptLayout { root: PathBuf, missing: String },

    #[error("unknown progress stage '{0}'")]
    UnknownStage(String),

    #[error("unknown metadata field '{0}'")]
    UnknownField(String),

    #[error("metadata field '{field}' expects {expected}")]
    FieldTypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    #[error("artifact {} is already recorded", path.display())]
    DuplicateArtifact { path: PathBuf },

    #[error("index {index} out of range for pipeline of {len} steps")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid step at position {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    #[error("pipeline session is {actual}, expected {expected}")]
    InvalidSessionState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("unreadable dataset {}: {reason}", path.display())]
    Dataset { path: PathBuf, reason: String },
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::CorruptMetadata {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure raised by an external operation while a pipeline step runs.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error("{message}")]
pub struct OperationError {
    pub message: String,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}
