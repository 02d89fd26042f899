//! Editable transformation pipelines: steps, validation and execution.

pub mod execute;
pub mod params;
pub mod schema;
pub mod session;
pub mod spec;
pub mod step;
pub mod validate;

pub use execute::{
    ExecutionResult, ExecutionStatus, OperationRegistry, PipelineExecutor, StepOperation,
    StepOutcome, StepStatus,
};
pub use params::{ParamMap, ParamValue};
pub use schema::{Architecture, LayerSchema, ModelCatalog, ModelSchema, ParamKind, ParamSchema};
pub use session::{PipelineSession, SessionState};
pub use spec::PipelineSpec;
pub use step::{
    ArtifactRemoval, FilterBand, FilterDesign, FilterSpec, LayerSpec, ModelStage, Network,
    Reference, SignalEnhancement, StepKind, StepParseError, TransformationStep,
};
pub use validate::{PipelineValidator, ValidatedPipeline, ValidationError, ValidationErrors};
