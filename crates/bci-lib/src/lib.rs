pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod project;
pub mod signal;

pub use config::Settings;
pub use error::{Error, OperationError, Result};
pub use io::{CsvDatasetIo, DatasetIo, EdfDatasetIo, RecordingIo};
pub use pipeline::{
    ModelCatalog, OperationRegistry, PipelineExecutor, PipelineSession, PipelineSpec,
    PipelineValidator, TransformationStep, ValidatedPipeline,
};
pub use project::{ProjectMetadata, ProjectStore, Stage};
pub use signal::Recording;
