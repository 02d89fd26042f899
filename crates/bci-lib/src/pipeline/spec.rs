use crate::error::{Error, Result};
use crate::pipeline::step::TransformationStep;
use crate::pipeline::validate::{PipelineValidator, ValidatedPipeline, ValidationError};
use crate::project::persist;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;

/// Ordered list of steps; insertion order is execution order. Editing never
/// validates; call [`PipelineSpec::validate`] before executing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSpec {
    name: Option<String>,
    steps: Vec<TransformationStep>,
}

impl PipelineSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn steps(&self) -> &[TransformationStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn append(&mut self, step: TransformationStep) {
        self.steps.push(step);
    }

    pub fn remove(&mut self, index: usize) -> Result<TransformationStep> {
        self.check_index(index)?;
        Ok(self.steps.remove(index))
    }

    /// Move the step at `from` so it ends up at position `to`.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_index(from)?;
        self.check_index(to)?;
        let step = self.steps.remove(from);
        self.steps.insert(to, step);
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.steps.len() {
            Ok(())
        } else {
            Err(Error::IndexOutOfRange {
                index,
                len: self.steps.len(),
            })
        }
    }

    /// Validate against the built-in model catalog.
    pub fn validate(&self) -> Result<ValidatedPipeline<'_>> {
        Ok(PipelineValidator::default().validate(self)?)
    }

    pub fn check(&self) -> Vec<ValidationError> {
        PipelineValidator::default().check(self)
    }

    pub fn to_json(&self) -> Value {
        let steps: Vec<Value> = self.steps.iter().map(TransformationStep::to_json).collect();
        let mut doc = Map::new();
        if let Some(name) = &self.name {
            doc.insert("name".into(), json!(name));
        }
        doc.insert("steps".into(), Value::Array(steps));
        Value::Object(doc)
    }

    /// Accepts `{"name": .., "steps": [..]}` or a bare step array.
    pub fn from_json(value: &Value) -> Result<Self> {
        let (name, steps) = match value {
            Value::Array(steps) => (None, steps),
            Value::Object(doc) => {
                let name = match doc.get("name") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(name)) => Some(name.clone()),
                    Some(other) => {
                        return Err(Error::InvalidStep {
                            index: 0,
                            reason: format!("configuration name must be a string, got {}", other),
                        })
                    }
                };
                let steps = doc
                    .get("steps")
                    .and_then(Value::as_array)
                    .ok_or_else(|| Error::InvalidStep {
                        index: 0,
                        reason: "configuration has no 'steps' list".into(),
                    })?;
                (name, steps)
            }
            other => {
                return Err(Error::InvalidStep {
                    index: 0,
                    reason: format!("expected a configuration object or step list, got {}", other),
                })
            }
        };
        let steps = steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                TransformationStep::from_json(step).map_err(|err| Error::InvalidStep {
                    index,
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { name, steps })
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| Error::storage(path, err))?;
        let value: Value = serde_json::from_str(&text).map_err(|err| Error::InvalidStep {
            index: 0,
            reason: format!("{} is not valid JSON: {}", path.display(), err),
        })?;
        Self::from_json(&value)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        persist::write_json_atomic(path, &self.to_json())
    }
}
