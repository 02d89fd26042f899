use crate::error::{Error, Result};
use crate::pipeline::execute::{ExecutionResult, PipelineExecutor};
use crate::pipeline::spec::PipelineSpec;
use crate::pipeline::step::TransformationStep;
use log::info;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Empty,
    Building,
    Validated,
    Executing,
    Completed,
    Failed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Empty => "empty",
            SessionState::Building => "building",
            SessionState::Validated => "validated",
            SessionState::Executing => "executing",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One editor's working pipeline. Any edit drops a previous validation, and
/// only a validated pipeline can be executed.
#[derive(Debug, Clone)]
pub struct PipelineSession {
    spec: PipelineSpec,
    state: SessionState,
}

impl Default for PipelineSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineSession {
    pub fn new() -> Self {
        Self::from_spec(PipelineSpec::new())
    }

    pub fn from_spec(spec: PipelineSpec) -> Self {
        let state = Self::editing_state(&spec);
        Self { spec, state }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    pub fn into_spec(self) -> PipelineSpec {
        self.spec
    }

    fn editing_state(spec: &PipelineSpec) -> SessionState {
        if spec.is_empty() {
            SessionState::Empty
        } else {
            SessionState::Building
        }
    }

    pub fn append(&mut self, step: TransformationStep) {
        self.spec.append(step);
        self.state = SessionState::Building;
    }

    pub fn remove(&mut self, index: usize) -> Result<TransformationStep> {
        let step = self.spec.remove(index)?;
        self.state = Self::editing_state(&self.spec);
        Ok(step)
    }

    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        self.spec.reorder(from, to)?;
        self.state = Self::editing_state(&self.spec);
        Ok(())
    }

    /// On failure the session stays editable and the errors are returned.
    pub fn validate(&mut self) -> Result<()> {
        match self.spec.validate() {
            Ok(_) => {
                self.state = SessionState::Validated;
                Ok(())
            }
            Err(err) => {
                self.state = Self::editing_state(&self.spec);
                Err(err)
            }
        }
    }

    pub fn execute<H>(
        &mut self,
        executor: &PipelineExecutor<H>,
        input: H,
    ) -> Result<ExecutionResult<H>> {
        if self.state != SessionState::Validated {
            return Err(Error::InvalidSessionState {
                expected: SessionState::Validated.name(),
                actual: self.state.name(),
            });
        }
        self.state = SessionState::Executing;
        let pipeline = match self.spec.validate() {
            Ok(pipeline) => pipeline,
            Err(err) => {
                self.state = Self::editing_state(&self.spec);
                return Err(err);
            }
        };
        let result = executor.execute(&pipeline, input);
        self.state = if result.is_complete() {
            SessionState::Completed
        } else {
            SessionState::Failed
        };
        info!("pipeline session finished as {}", self.state);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperationError;
    use crate::pipeline::execute::OperationRegistry;
    use crate::pipeline::step::StepKind;

    fn executor() -> PipelineExecutor<u32> {
        PipelineExecutor::new(
            OperationRegistry::new()
                .with(StepKind::Highpass, |h: u32, _: &TransformationStep| Ok(h + 1))
                .with(StepKind::Notch, |_: u32, _: &TransformationStep| {
                    Err(OperationError::new("no mains estimate"))
                }),
        )
    }

    #[test]
    fn edits_move_between_empty_and_building() {
        let mut session = PipelineSession::new();
        assert_eq!(session.state(), SessionState::Empty);
        session.append(TransformationStep::highpass(1.0));
        assert_eq!(session.state(), SessionState::Building);
        session.remove(0).unwrap();
        assert_eq!(session.state(), SessionState::Empty);
    }

    #[test]
    fn execute_requires_validation() {
        let mut session = PipelineSession::new();
        session.append(TransformationStep::highpass(1.0));
        assert!(matches!(
            session.execute(&executor(), 0),
            Err(Error::InvalidSessionState { actual: "building", .. })
        ));

        session.validate().unwrap();
        assert_eq!(session.state(), SessionState::Validated);
        let result = session.execute(&executor(), 0).unwrap();
        assert_eq!(result.output, Some(1));
        assert_eq!(session.state(), SessionState::Completed);

        // a finished run needs a fresh validation before the next one
        assert!(session.execute(&executor(), 0).is_err());
    }

    #[test]
    fn invalid_spec_stays_building() {
        let mut session = PipelineSession::new();
        session.append(TransformationStep::bandpass(30.0, 8.0));
        assert!(matches!(session.validate(), Err(Error::Validation(_))));
        assert_eq!(session.state(), SessionState::Building);
    }

    #[test]
    fn failed_run_then_edit_and_rerun() {
        let mut session = PipelineSession::new();
        session.append(TransformationStep::highpass(1.0));
        session.append(TransformationStep::notch(50.0));
        session.validate().unwrap();
        let result = session.execute(&executor(), 0).unwrap();
        assert!(!result.is_complete());
        assert_eq!(session.state(), SessionState::Failed);

        session.remove(1).unwrap();
        assert_eq!(session.state(), SessionState::Building);
        session.validate().unwrap();
        assert!(session.execute(&executor(), 0).unwrap().is_complete());
    }
}
