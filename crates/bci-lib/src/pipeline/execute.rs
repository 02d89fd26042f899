use crate::error::{OperationError, Result};
use crate::io::DatasetIo;
use crate::pipeline::step::{StepKind, TransformationStep};
use crate::pipeline::validate::ValidatedPipeline;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Instant;

/// External work behind one step kind: takes the current data handle and
/// returns the transformed one.
pub trait StepOperation<H>: Send + Sync {
    fn apply(&self, handle: H, step: &TransformationStep) -> Result<H, OperationError>;
}

impl<H, F> StepOperation<H> for F
where
    F: Fn(H, &TransformationStep) -> Result<H, OperationError> + Send + Sync,
{
    fn apply(&self, handle: H, step: &TransformationStep) -> Result<H, OperationError> {
        self(handle, step)
    }
}

/// Operations keyed by [`StepKind`].
pub struct OperationRegistry<H> {
    operations: HashMap<StepKind, Box<dyn StepOperation<H>>>,
}

impl<H> Default for OperationRegistry<H> {
    fn default() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }
}

impl<H> OperationRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure; replaces any earlier operation for `kind`.
    pub fn register<F>(&mut self, kind: StepKind, operation: F)
    where
        F: Fn(H, &TransformationStep) -> Result<H, OperationError> + Send + Sync + 'static,
    {
        self.operations.insert(kind, Box::new(operation));
    }

    pub fn register_operation<O>(&mut self, kind: StepKind, operation: O)
    where
        O: StepOperation<H> + 'static,
    {
        self.operations.insert(kind, Box::new(operation));
    }

    pub fn with<F>(mut self, kind: StepKind, operation: F) -> Self
    where
        F: Fn(H, &TransformationStep) -> Result<H, OperationError> + Send + Sync + 'static,
    {
        self.register(kind, operation);
        self
    }

    pub fn get(&self, kind: StepKind) -> Option<&dyn StepOperation<H>> {
        self.operations.get(&kind).map(|op| op.as_ref())
    }

    pub fn kinds(&self) -> Vec<StepKind> {
        let mut kinds: Vec<_> = self.operations.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl<H> fmt::Debug for OperationRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[serde(rename = "success")]
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step_index: usize,
    pub kind: StepKind,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionStatus {
    Completed,
    Failed { step_index: usize },
}

/// Per-step outcomes of one run. Steps after a failure have no outcome.
#[derive(Debug, Clone)]
pub struct ExecutionResult<H> {
    pub outcomes: Vec<StepOutcome>,
    /// Final handle; present only when every step succeeded.
    pub output: Option<H>,
}

impl<H> ExecutionResult<H> {
    pub fn status(&self) -> ExecutionStatus {
        match self.failure() {
            Some(outcome) => ExecutionStatus::Failed {
                step_index: outcome.step_index,
            },
            None => ExecutionStatus::Completed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failure().is_none()
    }

    pub fn failure(&self) -> Option<&StepOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.status == StepStatus::Failed)
    }

    pub fn into_output(self) -> Option<H> {
        self.output
    }
}

/// Runs validated pipelines as a left fold over their steps. Stops at the
/// first failing step; nothing is retried.
#[derive(Debug)]
pub struct PipelineExecutor<H> {
    registry: OperationRegistry<H>,
}

impl<H> PipelineExecutor<H> {
    pub fn new(registry: OperationRegistry<H>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OperationRegistry<H> {
        &self.registry
    }

    pub fn execute(&self, pipeline: &ValidatedPipeline<'_>, input: H) -> ExecutionResult<H> {
        let mut outcomes = Vec::with_capacity(pipeline.len());
        let mut handle = input;
        for (step_index, step) in pipeline.steps().iter().enumerate() {
            let kind = step.kind();
            let started = Instant::now();
            let result = match self.registry.get(kind) {
                Some(operation) => operation.apply(handle, step),
                None => Err(OperationError::new(format!(
                    "no operation registered for '{}' steps",
                    kind
                ))),
            };
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            match result {
                Ok(next) => {
                    debug!("step {} ({}) finished in {:.3} ms", step_index, step, elapsed_ms);
                    outcomes.push(StepOutcome {
                        step_index,
                        kind,
                        status: StepStatus::Succeeded,
                        error: None,
                        elapsed_ms,
                    });
                    handle = next;
                }
                Err(error) => {
                    warn!("step {} ({}) failed: {}", step_index, step, error);
                    outcomes.push(StepOutcome {
                        step_index,
                        kind,
                        status: StepStatus::Failed,
                        error: Some(error),
                        elapsed_ms,
                    });
                    return ExecutionResult {
                        outcomes,
                        output: None,
                    };
                }
            }
        }
        info!("pipeline completed {} step(s)", outcomes.len());
        ExecutionResult {
            outcomes,
            output: Some(handle),
        }
    }

    /// Read `input`, run the pipeline, and write the final handle to `output`
    /// when every step succeeded. Nothing is written after a failed step.
    pub fn execute_dataset<D>(
        &self,
        pipeline: &ValidatedPipeline<'_>,
        io: &D,
        input: &Path,
        output: &Path,
    ) -> Result<ExecutionResult<H>>
    where
        D: DatasetIo<Handle = H>,
    {
        let handle = io.read_dataset(input)?;
        let result = self.execute(pipeline, handle);
        if let Some(handle) = &result.output {
            io.write_dataset(handle, output)?;
            info!("wrote {}", output.display());
        }
        Ok(result)
    }
}
