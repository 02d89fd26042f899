use crate::pipeline::params::ParamMap;
use crate::pipeline::schema::{Architecture, ModelCatalog, ModelSchema, ParamProblem, ParamSchema};
use crate::pipeline::spec::PipelineSpec;
use crate::pipeline::step::{
    ArtifactRemoval, FilterBand, FilterDesign, FilterSpec, LayerSpec, ModelStage, Reference,
    SignalEnhancement, TransformationStep,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub const ORDER_RANGE: (f64, f64) = (1.0, 16.0);
pub const RIPPLE_DB_RANGE: (f64, f64) = (0.01, 10.0);
pub const ATTENUATION_DB_RANGE: (f64, f64) = (1.0, 120.0);
pub const ICA_COMPONENTS_RANGE: (f64, f64) = (1.0, 256.0);
pub const ASR_THRESHOLD_RANGE: (f64, f64) = (1.0, 100.0);

fn at(step: usize, layer: &Option<usize>) -> String {
    match layer {
        Some(layer) => format!("step {} layer {}", step, layer),
        None => format!("step {}", step),
    }
}

/// One problem found in a pipeline. `step` and `layer` are zero-based positions.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("step {step} layer {layer}: Dense layer must come after a Flatten layer")]
    LayerOrder { step: usize, layer: usize },

    #[error("{}: {parameter} = {value} is outside [{min}, {max}]", at(*step, layer))]
    ParameterRange {
        step: usize,
        layer: Option<usize>,
        parameter: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("step {step}: band-pass low cutoff {low} Hz must be below high cutoff {high} Hz")]
    FrequencyOrder { step: usize, low: f64, high: f64 },

    #[error("{}: {parameter} must be a finite number", at(*step, layer))]
    NonFinite {
        step: usize,
        layer: Option<usize>,
        parameter: String,
    },

    #[error("step {step}: {parameter} must be positive, got {value}")]
    NonPositive {
        step: usize,
        parameter: String,
        value: f64,
    },

    #[error("step {step}: {parameter} = {value} Hz is not below the Nyquist frequency of {rate} Hz data")]
    AboveNyquist {
        step: usize,
        parameter: String,
        value: f64,
        rate: f64,
    },

    #[error("step {step}: excluded component {component} but only {n_components} are extracted")]
    ExcludedComponent {
        step: usize,
        component: usize,
        n_components: u32,
    },

    #[error("step {step}: re-reference needs at least one named channel")]
    EmptyReference { step: usize },

    #[error("step {step}: unknown model '{model}'")]
    UnknownModel { step: usize, model: String },

    #[error("{}: unknown parameter '{parameter}'", at(*step, layer))]
    UnknownParameter {
        step: usize,
        layer: Option<usize>,
        parameter: String,
    },

    #[error("{}: missing parameter '{parameter}'", at(*step, layer))]
    MissingParameter {
        step: usize,
        layer: Option<usize>,
        parameter: String,
    },

    #[error("{}: {parameter} expects {expected}, got {found}", at(*step, layer))]
    ParameterType {
        step: usize,
        layer: Option<usize>,
        parameter: String,
        expected: String,
        found: String,
    },

    #[error("{}: {parameter} = '{value}' is not one of {}", at(*step, layer), options.join(", "))]
    InvalidOption {
        step: usize,
        layer: Option<usize>,
        parameter: String,
        value: String,
        options: Vec<String>,
    },

    #[error("step {step} layer {layer}: '{layer_type}' is not available for {model}")]
    UnknownLayer {
        step: usize,
        layer: usize,
        layer_type: String,
        model: String,
    },

    #[error("step {step}: {model} needs at least one layer")]
    EmptyArchitecture { step: usize, model: String },

    #[error("step {step}: {model} needs a non-empty input shape")]
    MissingInputShape { step: usize, model: String },

    #[error("step {step}: {model} does not take a layer architecture")]
    UnexpectedArchitecture { step: usize, model: String },
}

impl ValidationError {
    /// Position of the offending step.
    pub fn step(&self) -> usize {
        match self {
            ValidationError::LayerOrder { step, .. }
            | ValidationError::ParameterRange { step, .. }
            | ValidationError::FrequencyOrder { step, .. }
            | ValidationError::NonFinite { step, .. }
            | ValidationError::NonPositive { step, .. }
            | ValidationError::AboveNyquist { step, .. }
            | ValidationError::ExcludedComponent { step, .. }
            | ValidationError::EmptyReference { step }
            | ValidationError::UnknownModel { step, .. }
            | ValidationError::UnknownParameter { step, .. }
            | ValidationError::MissingParameter { step, .. }
            | ValidationError::ParameterType { step, .. }
            | ValidationError::InvalidOption { step, .. }
            | ValidationError::UnknownLayer { step, .. }
            | ValidationError::EmptyArchitecture { step, .. }
            | ValidationError::MissingInputShape { step, .. }
            | ValidationError::UnexpectedArchitecture { step, .. } => *step,
        }
    }
}

/// Every problem found in one validation pass, in step order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline has {} validation error(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A [`PipelineSpec`] that passed validation. It borrows the steps, so they
/// cannot change between validation and execution.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedPipeline<'a> {
    spec: &'a PipelineSpec,
}

impl<'a> ValidatedPipeline<'a> {
    pub fn spec(&self) -> &'a PipelineSpec {
        self.spec
    }

    pub fn steps(&self) -> &'a [TransformationStep] {
        self.spec.steps()
    }

    pub fn len(&self) -> usize {
        self.spec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spec.is_empty()
    }
}

pub struct PipelineValidator<'c> {
    catalog: &'c ModelCatalog,
}

impl Default for PipelineValidator<'static> {
    fn default() -> Self {
        Self::new(ModelCatalog::builtin())
    }
}

impl<'c> PipelineValidator<'c> {
    pub fn new(catalog: &'c ModelCatalog) -> Self {
        Self { catalog }
    }

    pub fn validate<'a>(
        &self,
        spec: &'a PipelineSpec,
    ) -> Result<ValidatedPipeline<'a>, ValidationErrors> {
        let errors = self.check(spec);
        if errors.is_empty() {
            Ok(ValidatedPipeline { spec })
        } else {
            Err(ValidationErrors(errors))
        }
    }

    /// Collect every problem without stopping at the first.
    pub fn check(&self, spec: &PipelineSpec) -> Vec<ValidationError> {
        let mut out = Vec::new();
        // sampling rate fixed by the most recent resample step, if any
        let mut rate = None;
        for (index, step) in spec.steps().iter().enumerate() {
            match step {
                TransformationStep::Filter(filter) => check_filter(index, filter, rate, &mut out),
                TransformationStep::ArtifactRemoval(removal) => {
                    check_artifact_removal(index, removal, &mut out)
                }
                TransformationStep::SignalEnhancement(SignalEnhancement::Reref { reference }) => {
                    if let Reference::Channels(channels) = reference {
                        if channels.is_empty() || channels.iter().any(|c| c.trim().is_empty()) {
                            out.push(ValidationError::EmptyReference { step: index });
                        }
                    }
                }
                TransformationStep::SignalEnhancement(SignalEnhancement::Resample {
                    rate: new_rate,
                }) => {
                    if !new_rate.is_finite() {
                        out.push(ValidationError::NonFinite {
                            step: index,
                            layer: None,
                            parameter: "rate".into(),
                        });
                    } else if *new_rate > 0.0 {
                        rate = Some(*new_rate);
                    } else {
                        out.push(ValidationError::NonPositive {
                            step: index,
                            parameter: "rate".into(),
                            value: *new_rate,
                        });
                    }
                }
                TransformationStep::Model(stage) => self.check_model(index, stage, &mut out),
            }
        }
        out
    }

    fn check_model(&self, step: usize, stage: &ModelStage, out: &mut Vec<ValidationError>) {
        let Some(schema) = self.catalog.find(&stage.model) else {
            out.push(ValidationError::UnknownModel {
                step,
                model: stage.model.clone(),
            });
            return;
        };
        check_params(step, None, &schema.hyperparams, &stage.hyperparams, out);
        if !schema.is_deep() {
            if stage.network.is_some() {
                out.push(ValidationError::UnexpectedArchitecture {
                    step,
                    model: schema.name.to_string(),
                });
            }
            return;
        }
        let (input_shape, architecture) = match &stage.network {
            Some(network) => (network.input_shape.as_slice(), network.architecture.as_slice()),
            None => (&[][..], &[][..]),
        };
        if input_shape.is_empty() || input_shape.contains(&0) {
            out.push(ValidationError::MissingInputShape {
                step,
                model: schema.name.to_string(),
            });
        }
        if architecture.is_empty() {
            out.push(ValidationError::EmptyArchitecture {
                step,
                model: schema.name.to_string(),
            });
        }
        check_layers(step, schema, architecture, out);
    }
}

fn check_layers(
    step: usize,
    schema: &ModelSchema,
    architecture: &[LayerSpec],
    out: &mut Vec<ValidationError>,
) {
    let mut flattened = false;
    for (index, layer) in architecture.iter().enumerate() {
        match schema.layer(&layer.layer_type) {
            Some(layer_schema) => {
                check_params(step, Some(index), &layer_schema.params, &layer.parameters, out)
            }
            None => out.push(ValidationError::UnknownLayer {
                step,
                layer: index,
                layer_type: layer.layer_type.clone(),
                model: schema.name.to_string(),
            }),
        }
        if schema.architecture == Architecture::Convolutional {
            match layer.layer_type.as_str() {
                "Flatten" => flattened = true,
                "Dense" if !flattened => out.push(ValidationError::LayerOrder { step, layer: index }),
                _ => {}
            }
        }
    }
}

fn check_params(
    step: usize,
    layer: Option<usize>,
    declared: &[ParamSchema],
    given: &ParamMap,
    out: &mut Vec<ValidationError>,
) {
    for schema in declared {
        let Some(value) = given.get(schema.name) else {
            // an omitted parameter takes its default, which always passes its own check
            if schema.default.is_none() {
                out.push(ValidationError::MissingParameter {
                    step,
                    layer,
                    parameter: schema.name.to_string(),
                });
            }
            continue;
        };
        let parameter = schema.name.to_string();
        match schema.check(value) {
            Ok(()) => {}
            Err(ParamProblem::Type { expected }) => out.push(ValidationError::ParameterType {
                step,
                layer,
                parameter,
                expected,
                found: value.type_name().to_string(),
            }),
            Err(ParamProblem::NonFinite { .. }) => out.push(ValidationError::NonFinite {
                step,
                layer,
                parameter,
            }),
            Err(ParamProblem::Range { value, min, max }) => {
                out.push(ValidationError::ParameterRange {
                    step,
                    layer,
                    parameter,
                    value,
                    min,
                    max,
                })
            }
            Err(ParamProblem::Option { value, options }) => {
                out.push(ValidationError::InvalidOption {
                    step,
                    layer,
                    parameter,
                    value,
                    options,
                })
            }
        }
    }
    for name in given.keys() {
        if !declared.iter().any(|schema| schema.name == name) {
            out.push(ValidationError::UnknownParameter {
                step,
                layer,
                parameter: name.clone(),
            });
        }
    }
}

fn check_range(
    step: usize,
    parameter: &str,
    value: f64,
    (min, max): (f64, f64),
    out: &mut Vec<ValidationError>,
) {
    if !value.is_finite() {
        out.push(ValidationError::NonFinite {
            step,
            layer: None,
            parameter: parameter.to_string(),
        });
    } else if !(min..=max).contains(&value) {
        out.push(ValidationError::ParameterRange {
            step,
            layer: None,
            parameter: parameter.to_string(),
            value,
            min,
            max,
        });
    }
}

fn check_filter(step: usize, filter: &FilterSpec, rate: Option<f64>, out: &mut Vec<ValidationError>) {
    let mut positive = true;
    for (parameter, value) in filter.band.frequencies() {
        if !value.is_finite() {
            positive = false;
            out.push(ValidationError::NonFinite {
                step,
                layer: None,
                parameter: parameter.to_string(),
            });
        } else if value <= 0.0 {
            positive = false;
            out.push(ValidationError::NonPositive {
                step,
                parameter: parameter.to_string(),
                value,
            });
        } else if let Some(rate) = rate {
            if value >= rate / 2.0 {
                out.push(ValidationError::AboveNyquist {
                    step,
                    parameter: parameter.to_string(),
                    value,
                    rate,
                });
            }
        }
    }
    if let FilterBand::Bandpass { low, high } = filter.band {
        if positive && low >= high {
            out.push(ValidationError::FrequencyOrder { step, low, high });
        }
    }
    if let Some(order) = filter.design.order() {
        check_range(step, "order", order as f64, ORDER_RANGE, out);
    }
    match filter.design {
        FilterDesign::ChebyshevI { ripple_db, .. } => {
            check_range(step, "ripple_db", ripple_db, RIPPLE_DB_RANGE, out)
        }
        FilterDesign::ChebyshevII { attenuation_db, .. } => {
            check_range(step, "attenuation_db", attenuation_db, ATTENUATION_DB_RANGE, out)
        }
        _ => {}
    }
}

fn check_artifact_removal(step: usize, removal: &ArtifactRemoval, out: &mut Vec<ValidationError>) {
    match removal {
        ArtifactRemoval::Ica {
            n_components,
            exclude,
        } => {
            if let Some(n) = *n_components {
                check_range(step, "n_components", n as f64, ICA_COMPONENTS_RANGE, out);
                for &component in exclude {
                    if component >= n as usize {
                        out.push(ValidationError::ExcludedComponent {
                            step,
                            component,
                            n_components: n,
                        });
                    }
                }
            }
        }
        ArtifactRemoval::Asr { threshold, .. } => {
            check_range(step, "threshold", *threshold, ASR_THRESHOLD_RANGE, out)
        }
    }
}
