use crate::pipeline::params::{ParamMap, ParamReader};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why a serialized step could not be turned into a [`TransformationStep`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StepParseError(String);

impl From<String> for StepParseError {
    fn from(reason: String) -> Self {
        StepParseError(reason)
    }
}

/// Operation identifier used to look up the external operation for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Highpass,
    Lowpass,
    Bandpass,
    Notch,
    Ica,
    Asr,
    Reref,
    Resample,
    Model,
}

impl StepKind {
    pub const ALL: [StepKind; 9] = [
        StepKind::Highpass,
        StepKind::Lowpass,
        StepKind::Bandpass,
        StepKind::Notch,
        StepKind::Ica,
        StepKind::Asr,
        StepKind::Reref,
        StepKind::Resample,
        StepKind::Model,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Highpass => "highpass",
            StepKind::Lowpass => "lowpass",
            StepKind::Bandpass => "bandpass",
            StepKind::Notch => "notch",
            StepKind::Ica => "ica",
            StepKind::Asr => "asr",
            StepKind::Reref => "reref",
            StepKind::Resample => "resample",
            StepKind::Model => "model",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = StepParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StepParseError(format!("unknown step kind '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterBand {
    Highpass { cutoff: f64 },
    Lowpass { cutoff: f64 },
    Bandpass { low: f64, high: f64 },
    Notch { freq: f64 },
}

impl FilterBand {
    pub fn kind(&self) -> StepKind {
        match self {
            FilterBand::Highpass { .. } => StepKind::Highpass,
            FilterBand::Lowpass { .. } => StepKind::Lowpass,
            FilterBand::Bandpass { .. } => StepKind::Bandpass,
            FilterBand::Notch { .. } => StepKind::Notch,
        }
    }

    /// Every frequency the band carries, keyed by its parameter name.
    pub fn frequencies(&self) -> Vec<(&'static str, f64)> {
        match *self {
            FilterBand::Highpass { cutoff } | FilterBand::Lowpass { cutoff } => {
                vec![("cutoff", cutoff)]
            }
            FilterBand::Bandpass { low, high } => vec![("low", low), ("high", high)],
            FilterBand::Notch { freq } => vec![("freq", freq)],
        }
    }
}

/// Filter family. IIR families carry an order; `Fir` leaves the design to the operation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FilterDesign {
    Butterworth {
        order: u32,
    },
    ChebyshevI {
        order: u32,
        ripple_db: f64,
    },
    ChebyshevII {
        order: u32,
        attenuation_db: f64,
    },
    Bessel {
        order: u32,
    },
    #[default]
    Fir,
}

impl FilterDesign {
    pub const DEFAULT_ORDER: u32 = 4;
    pub const DEFAULT_RIPPLE_DB: f64 = 1.0;
    pub const DEFAULT_ATTENUATION_DB: f64 = 40.0;

    pub fn key(&self) -> &'static str {
        match self {
            FilterDesign::Butterworth { .. } => "butterworth",
            FilterDesign::ChebyshevI { .. } => "chebyshev1",
            FilterDesign::ChebyshevII { .. } => "chebyshev2",
            FilterDesign::Bessel { .. } => "bessel",
            FilterDesign::Fir => "fir",
        }
    }

    pub fn order(&self) -> Option<u32> {
        match *self {
            FilterDesign::Butterworth { order }
            | FilterDesign::ChebyshevI { order, .. }
            | FilterDesign::ChebyshevII { order, .. }
            | FilterDesign::Bessel { order } => Some(order),
            FilterDesign::Fir => None,
        }
    }

    fn read(reader: &mut ParamReader) -> Result<Self, String> {
        let design = match reader.opt_str("design")? {
            None => return Ok(FilterDesign::Fir),
            Some(design) => design.to_ascii_lowercase(),
        };
        let order = |reader: &mut ParamReader| -> Result<u32, String> {
            Ok(reader.opt_u32("order")?.unwrap_or(Self::DEFAULT_ORDER))
        };
        match design.as_str() {
            "fir" => Ok(FilterDesign::Fir),
            "butterworth" | "butter" => Ok(FilterDesign::Butterworth {
                order: order(reader)?,
            }),
            "chebyshev1" | "cheby1" => Ok(FilterDesign::ChebyshevI {
                order: order(reader)?,
                ripple_db: reader
                    .opt_f64("ripple_db")?
                    .unwrap_or(Self::DEFAULT_RIPPLE_DB),
            }),
            "chebyshev2" | "cheby2" => Ok(FilterDesign::ChebyshevII {
                order: order(reader)?,
                attenuation_db: reader
                    .opt_f64("attenuation_db")?
                    .unwrap_or(Self::DEFAULT_ATTENUATION_DB),
            }),
            "bessel" => Ok(FilterDesign::Bessel {
                order: order(reader)?,
            }),
            other => Err(format!("unknown filter design '{}'", other)),
        }
    }

    fn write(&self, params: &mut Map<String, Value>) {
        if *self == FilterDesign::Fir {
            return;
        }
        params.insert("design".into(), json!(self.key()));
        if let Some(order) = self.order() {
            params.insert("order".into(), json!(order));
        }
        match self {
            FilterDesign::ChebyshevI { ripple_db, .. } => {
                params.insert("ripple_db".into(), json!(ripple_db));
            }
            FilterDesign::ChebyshevII { attenuation_db, .. } => {
                params.insert("attenuation_db".into(), json!(attenuation_db));
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub band: FilterBand,
    pub design: FilterDesign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactRemoval {
    /// Independent component analysis; `exclude` lists component indices to drop.
    Ica {
        n_components: Option<u32>,
        exclude: Vec<usize>,
    },
    /// Artifact subspace reconstruction; `threshold` is a std-dev cutoff.
    Asr { threshold: f64, remove: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Average,
    Channels(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalEnhancement {
    Reref { reference: Reference },
    Resample { rate: f64 },
}

/// One layer of a deep-learning architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    #[serde(deserialize_with = "deserialize_layer_type")]
    pub layer_type: String,
    #[serde(default)]
    pub parameters: ParamMap,
}

impl LayerSpec {
    pub fn new(layer_type: &str, parameters: ParamMap) -> Self {
        Self {
            layer_type: normalize_layer_type(layer_type),
            parameters,
        }
    }
}

/// `"Dense Layer"` and `"Dense"` name the same layer; `"Batch Normalization"` is
/// `"BatchNormalization"`.
pub fn normalize_layer_type(name: &str) -> String {
    let trimmed = name.trim();
    let base = trimmed
        .strip_suffix(" Layer")
        .or_else(|| trimmed.strip_suffix(" layer"))
        .unwrap_or(trimmed);
    base.split_whitespace().collect()
}

fn deserialize_layer_type<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_layer_type(&raw))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Network {
    pub input_shape: Vec<usize>,
    pub architecture: Vec<LayerSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelStage {
    /// Display name or alias from the model catalog.
    pub model: String,
    pub hyperparams: ParamMap,
    /// Present for deep-learning models only.
    pub network: Option<Network>,
}

/// One step of a pipeline. Steps are plain data; executing one is the job of the
/// operation registered for its [`StepKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransformationStep {
    Filter(FilterSpec),
    ArtifactRemoval(ArtifactRemoval),
    SignalEnhancement(SignalEnhancement),
    Model(ModelStage),
}

impl TransformationStep {
    pub fn highpass(cutoff: f64) -> Self {
        Self::filter(FilterBand::Highpass { cutoff }, FilterDesign::Fir)
    }

    pub fn lowpass(cutoff: f64) -> Self {
        Self::filter(FilterBand::Lowpass { cutoff }, FilterDesign::Fir)
    }

    pub fn bandpass(low: f64, high: f64) -> Self {
        Self::filter(FilterBand::Bandpass { low, high }, FilterDesign::Fir)
    }

    pub fn notch(freq: f64) -> Self {
        Self::filter(FilterBand::Notch { freq }, FilterDesign::Fir)
    }

    pub fn filter(band: FilterBand, design: FilterDesign) -> Self {
        TransformationStep::Filter(FilterSpec { band, design })
    }

    pub fn ica(n_components: Option<u32>, exclude: Vec<usize>) -> Self {
        TransformationStep::ArtifactRemoval(ArtifactRemoval::Ica {
            n_components,
            exclude,
        })
    }

    pub fn asr(threshold: f64, remove: bool) -> Self {
        TransformationStep::ArtifactRemoval(ArtifactRemoval::Asr { threshold, remove })
    }

    pub fn reref(reference: Reference) -> Self {
        TransformationStep::SignalEnhancement(SignalEnhancement::Reref { reference })
    }

    pub fn resample(rate: f64) -> Self {
        TransformationStep::SignalEnhancement(SignalEnhancement::Resample { rate })
    }

    pub fn model(model: &str, hyperparams: ParamMap) -> Self {
        TransformationStep::Model(ModelStage {
            model: model.to_string(),
            hyperparams,
            network: None,
        })
    }

    pub fn deep_model(model: &str, hyperparams: ParamMap, network: Network) -> Self {
        TransformationStep::Model(ModelStage {
            model: model.to_string(),
            hyperparams,
            network: Some(network),
        })
    }

    pub fn kind(&self) -> StepKind {
        match self {
            TransformationStep::Filter(spec) => spec.band.kind(),
            TransformationStep::ArtifactRemoval(ArtifactRemoval::Ica { .. }) => StepKind::Ica,
            TransformationStep::ArtifactRemoval(ArtifactRemoval::Asr { .. }) => StepKind::Asr,
            TransformationStep::SignalEnhancement(SignalEnhancement::Reref { .. }) => {
                StepKind::Reref
            }
            TransformationStep::SignalEnhancement(SignalEnhancement::Resample { .. }) => {
                StepKind::Resample
            }
            TransformationStep::Model(_) => StepKind::Model,
        }
    }

    /// Everything except model stages counts toward the Preprocessing stage.
    pub fn is_preprocessing(&self) -> bool {
        !matches!(self, TransformationStep::Model(_))
    }

    pub fn to_json(&self) -> Value {
        let mut params = Map::new();
        let kind = self.kind();
        match self {
            TransformationStep::Filter(FilterSpec { band, design }) => {
                for (key, freq) in band.frequencies() {
                    params.insert(key.into(), json!(freq));
                }
                design.write(&mut params);
            }
            TransformationStep::ArtifactRemoval(ArtifactRemoval::Ica {
                n_components,
                exclude,
            }) => {
                if let Some(n) = n_components {
                    params.insert("n_components".into(), json!(n));
                }
                if !exclude.is_empty() {
                    params.insert("exclude".into(), json!(exclude));
                }
            }
            TransformationStep::ArtifactRemoval(ArtifactRemoval::Asr { threshold, remove }) => {
                params.insert("threshold".into(), json!(threshold));
                params.insert("remove".into(), json!(remove));
            }
            TransformationStep::SignalEnhancement(SignalEnhancement::Reref { reference }) => {
                let ref_type = match reference {
                    Reference::Average => json!("Common Average"),
                    // a list even for one channel, so a channel named "average" stays a channel
                    Reference::Channels(channels) => json!(channels),
                };
                params.insert("ref_type".into(), ref_type);
            }
            TransformationStep::SignalEnhancement(SignalEnhancement::Resample { rate }) => {
                params.insert("rate".into(), json!(rate));
            }
            TransformationStep::Model(stage) => return stage.to_json(),
        }
        json!({ "type": kind.as_str(), "params": params })
    }

    pub fn from_json(value: &Value) -> Result<Self, StepParseError> {
        let object = value
            .as_object()
            .ok_or_else(|| StepParseError(format!("step must be an object, got {}", value)))?;
        if let Some(model) = object.get("model") {
            return ModelStage::from_parts(model, object, true).map(TransformationStep::Model);
        }
        let type_name = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| StepParseError("step needs a 'type' or 'model' key".into()))?;
        // anything that is not a preprocessing kind names a classical model
        let kind = type_name.parse::<StepKind>().unwrap_or(StepKind::Model);
        if kind != StepKind::Model {
            if let Some(extra) = object.keys().find(|key| *key != "type" && *key != "params") {
                return Err(StepParseError(format!("unexpected key '{}'", extra)));
            }
        }
        let mut reader = ParamReader::from_value(object.get("params"))?;
        let step = match kind {
            StepKind::Highpass | StepKind::Lowpass | StepKind::Bandpass | StepKind::Notch => {
                let band = match kind {
                    StepKind::Highpass => FilterBand::Highpass {
                        cutoff: reader.f64("cutoff")?,
                    },
                    StepKind::Lowpass => FilterBand::Lowpass {
                        cutoff: reader.f64("cutoff")?,
                    },
                    StepKind::Bandpass => FilterBand::Bandpass {
                        low: reader.f64("low")?,
                        high: reader.f64("high")?,
                    },
                    _ => FilterBand::Notch {
                        freq: reader.f64("freq")?,
                    },
                };
                let design = FilterDesign::read(&mut reader)?;
                Self::filter(band, design)
            }
            StepKind::Ica => {
                let n_components = reader.opt_u32("n_components")?;
                let exclude = reader.index_list("exclude")?;
                Self::ica(n_components, exclude)
            }
            StepKind::Asr => {
                let threshold = reader.f64("threshold")?;
                let remove = reader.opt_bool("remove")?.unwrap_or(false);
                Self::asr(threshold, remove)
            }
            StepKind::Reref => {
                let reference = match reader.take("ref_type") {
                    None => Reference::Average,
                    Some(value) => parse_reference(&value)?,
                };
                Self::reref(reference)
            }
            StepKind::Resample => Self::resample(reader.f64("rate")?),
            StepKind::Model => {
                return ModelStage::from_parts(&object["type"], object, false)
                    .map(TransformationStep::Model)
            }
        };
        reader.finish()?;
        Ok(step)
    }
}

fn parse_reference(value: &Value) -> Result<Reference, String> {
    match value {
        Value::String(name) => {
            let lower = name.trim().to_ascii_lowercase();
            if lower == "average" || lower == "common average" || lower == "car" {
                Ok(Reference::Average)
            } else {
                Ok(Reference::Channels(vec![name.trim().to_string()]))
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| format!("reference channels must be names, got {}", item))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Reference::Channels),
        other => Err(format!("'ref_type' must be a name or list, got {}", other)),
    }
}

fn parse_input_shape(value: &Value) -> Result<Vec<usize>, String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .map(|v| v as usize)
                    .ok_or_else(|| format!("input_shape entries must be sizes, got {}", item))
            })
            .collect(),
        // "(22, 1000)" as typed into a text field
        Value::String(text) => text
            .trim_matches(|c: char| c == '(' || c == ')' || c == '[' || c == ']' || c.is_whitespace())
            .split(',')
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .map(|piece| {
                piece
                    .parse::<usize>()
                    .map_err(|_| format!("input_shape entry '{}' is not a size", piece))
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(format!("input_shape must be a list, got {}", other)),
    }
}

impl ModelStage {
    pub fn to_json(&self) -> Value {
        let mut params: Map<String, Value> = self
            .hyperparams
            .iter()
            .map(|(key, value)| (key.clone(), json!(value)))
            .collect();
        match &self.network {
            None => json!({ "type": self.model, "params": params }),
            Some(network) => {
                params.insert("architecture".into(), json!(network.architecture));
                json!({
                    "model": self.model,
                    "input_shape": network.input_shape,
                    "params": params,
                })
            }
        }
    }

    fn from_parts(
        model: &Value,
        object: &Map<String, Value>,
        model_key: bool,
    ) -> Result<Self, StepParseError> {
        let model = model
            .as_str()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| StepParseError(format!("model name must be a string, got {}", model)))?
            .to_string();
        let name_key = if model_key { "model" } else { "type" };
        if let Some(extra) = object
            .keys()
            .find(|key| *key != name_key && *key != "params" && *key != "input_shape")
        {
            return Err(StepParseError(format!("unexpected key '{}'", extra)));
        }
        let mut reader = ParamReader::from_value(object.get("params"))?;
        let architecture = reader.take("architecture");
        let input_shape = object.get("input_shape");
        let network = if architecture.is_some() || input_shape.is_some() {
            let architecture = match architecture {
                None => Vec::new(),
                Some(value) => serde_json::from_value::<Vec<LayerSpec>>(value)
                    .map_err(|err| StepParseError(format!("invalid architecture: {}", err)))?,
            };
            let input_shape = input_shape
                .map(parse_input_shape)
                .transpose()?
                .unwrap_or_default();
            Some(Network {
                input_shape,
                architecture,
            })
        } else {
            None
        };
        let hyperparams = reader.rest()?;
        Ok(ModelStage {
            model,
            hyperparams,
            network,
        })
    }
}

fn format_params(params: &ParamMap) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for TransformationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformationStep::Filter(FilterSpec { band, design }) => {
                match band {
                    FilterBand::Highpass { cutoff } => write!(f, "High-pass Filter: {} Hz", cutoff)?,
                    FilterBand::Lowpass { cutoff } => write!(f, "Low-pass Filter: {} Hz", cutoff)?,
                    FilterBand::Bandpass { low, high } => {
                        write!(f, "Band-pass Filter: {}-{} Hz", low, high)?
                    }
                    FilterBand::Notch { freq } => write!(f, "Notch Filter: {} Hz", freq)?,
                }
                match design.order() {
                    Some(order) => write!(f, " ({}, order {})", design.key(), order),
                    None => Ok(()),
                }
            }
            TransformationStep::ArtifactRemoval(ArtifactRemoval::Ica {
                n_components,
                exclude,
            }) => {
                f.write_str("ICA")?;
                if let Some(n) = n_components {
                    write!(f, ": {} components", n)?;
                }
                if !exclude.is_empty() {
                    write!(f, ", exclude {:?}", exclude)?;
                }
                Ok(())
            }
            TransformationStep::ArtifactRemoval(ArtifactRemoval::Asr { threshold, remove }) => {
                write!(f, "ASR: threshold={}, remove={}", threshold, remove)
            }
            TransformationStep::SignalEnhancement(SignalEnhancement::Reref { reference }) => {
                match reference {
                    Reference::Average => f.write_str("Re-reference: Common Average"),
                    Reference::Channels(channels) => {
                        write!(f, "Re-reference: {}", channels.join(", "))
                    }
                }
            }
            TransformationStep::SignalEnhancement(SignalEnhancement::Resample { rate }) => {
                write!(f, "Resample: {} Hz", rate)
            }
            TransformationStep::Model(stage) => {
                write!(f, "{}", stage.model)?;
                if !stage.hyperparams.is_empty() {
                    write!(f, ": {}", format_params(&stage.hyperparams))?;
                }
                if let Some(network) = &stage.network {
                    write!(f, " [{} layers]", network.architecture.len())?;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for TransformationStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TransformationStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        TransformationStep::from_json(&value).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::params::ParamValue;

    #[test]
    fn legacy_preprocessing_shapes_parse() {
        let steps = [
            json!({"type": "highpass", "params": {"cutoff": 1.0}}),
            json!({"type": "bandpass", "params": {"low": 8.0, "high": 30.0}}),
            json!({"type": "notch", "params": {"freq": 50.0}}),
            json!({"type": "ica", "params": {}}),
            json!({"type": "asr", "params": {"threshold": 20.0, "remove": true}}),
            json!({"type": "reref", "params": {"ref_type": "Common Average"}}),
            json!({"type": "resample", "params": {"rate": 256.0}}),
        ];
        let kinds: Vec<_> = steps
            .iter()
            .map(|v| TransformationStep::from_json(v).unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            [
                StepKind::Highpass,
                StepKind::Bandpass,
                StepKind::Notch,
                StepKind::Ica,
                StepKind::Asr,
                StepKind::Reref,
                StepKind::Resample
            ]
        );
        for value in &steps {
            let step = TransformationStep::from_json(value).unwrap();
            assert_eq!(&step.to_json(), value);
        }
    }

    #[test]
    fn filter_design_defaults_to_fir() {
        let step = TransformationStep::from_json(&json!({
            "type": "lowpass", "params": {"cutoff": 40.0}
        }))
        .unwrap();
        assert_eq!(step, TransformationStep::lowpass(40.0));

        let step = TransformationStep::from_json(&json!({
            "type": "lowpass", "params": {"cutoff": 40.0, "design": "chebyshev2"}
        }))
        .unwrap();
        match step {
            TransformationStep::Filter(FilterSpec { design, .. }) => assert_eq!(
                design,
                FilterDesign::ChebyshevII {
                    order: 4,
                    attenuation_db: 40.0
                }
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parameters_foreign_to_the_kind_are_rejected() {
        let err = TransformationStep::from_json(&json!({
            "type": "notch", "params": {"freq": 50.0, "cutoff": 1.0}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("cutoff"));

        // order only makes sense with an IIR design
        assert!(TransformationStep::from_json(&json!({
            "type": "highpass", "params": {"cutoff": 1.0, "order": 4}
        }))
        .is_err());

        assert!(TransformationStep::from_json(&json!({
            "type": "resample", "params": {"rate": 128.0}, "extra": 1
        }))
        .is_err());
    }

    #[test]
    fn reference_forms() {
        let avg = TransformationStep::from_json(&json!({
            "type": "reref", "params": {"ref_type": "average"}
        }))
        .unwrap();
        assert_eq!(avg, TransformationStep::reref(Reference::Average));

        let cz = TransformationStep::from_json(&json!({
            "type": "reref", "params": {"ref_type": "Cz"}
        }))
        .unwrap();
        assert_eq!(cz, TransformationStep::reref(Reference::Channels(vec!["Cz".into()])));
        assert_eq!(cz.to_json()["params"]["ref_type"], json!(["Cz"]));

        let pair = TransformationStep::reref(Reference::Channels(vec!["M1".into(), "M2".into()]));
        assert_eq!(pair.to_json()["params"]["ref_type"], json!(["M1", "M2"]));
    }

    #[test]
    fn channel_named_like_average_survives_round_trip() {
        for name in ["average", "CAR", "Common Average"] {
            let step = TransformationStep::reref(Reference::Channels(vec![name.into()]));
            assert_eq!(TransformationStep::from_json(&step.to_json()).unwrap(), step);
        }
    }

    #[test]
    fn infinite_cutoff_does_not_parse() {
        let err = TransformationStep::from_json(&json!({
            "type": "lowpass", "params": {"cutoff": "inf"}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("finite"), "{err}");
        let step = TransformationStep::lowpass(40.0);
        assert_eq!(TransformationStep::from_json(&step.to_json()).unwrap(), step);
    }

    #[test]
    fn deep_model_shape_matches_designer_output() {
        let value = json!({
            "model": "Convolutional Neural Network",
            "input_shape": "(22, 1000)",
            "params": {
                "learning_rate": 0.001,
                "batch_size": 16,
                "optimizer": "Adam",
                "architecture": [
                    {"layer_type": "Conv2D Layer", "parameters": {"filters": 32}},
                    {"layer_type": "Flatten Layer", "parameters": {}},
                    {"layer_type": "Dense Layer", "parameters": {"units": 4}}
                ]
            }
        });
        let step = TransformationStep::from_json(&value).unwrap();
        let TransformationStep::Model(stage) = &step else {
            panic!("expected model stage");
        };
        let network = stage.network.as_ref().unwrap();
        assert_eq!(network.input_shape, vec![22, 1000]);
        let layers: Vec<_> = network
            .architecture
            .iter()
            .map(|l| l.layer_type.as_str())
            .collect();
        assert_eq!(layers, ["Conv2D", "Flatten", "Dense"]);
        assert_eq!(stage.hyperparams["batch_size"], ParamValue::Int(16));

        let written = step.to_json();
        assert_eq!(written["input_shape"], json!([22, 1000]));
        assert_eq!(written["params"]["architecture"][2]["layer_type"], json!("Dense"));
        assert_eq!(TransformationStep::from_json(&written).unwrap(), step);
    }

    #[test]
    fn classical_model_accepts_both_keys() {
        let by_type = TransformationStep::from_json(&json!({
            "type": "Support Vector Machine (SVM)",
            "params": {"kernel": "rbf", "c": 1.0, "gamma": "scale"}
        }))
        .unwrap();
        let by_model = TransformationStep::from_json(&json!({
            "model": "Support Vector Machine (SVM)",
            "params": {"kernel": "rbf", "c": 1.0, "gamma": "scale"}
        }))
        .unwrap();
        assert_eq!(by_type, by_model);
        assert_eq!(by_type.kind(), StepKind::Model);
        assert!(!by_type.is_preprocessing());
        assert_eq!(by_type.to_json()["type"], json!("Support Vector Machine (SVM)"));
    }

    #[test]
    fn labels_read_like_the_step_list() {
        assert_eq!(
            TransformationStep::bandpass(8.0, 30.0).to_string(),
            "Band-pass Filter: 8-30 Hz"
        );
        assert_eq!(TransformationStep::asr(20.0, true).to_string(), "ASR: threshold=20, remove=true");
        assert_eq!(
            TransformationStep::filter(
                FilterBand::Notch { freq: 50.0 },
                FilterDesign::Butterworth { order: 2 }
            )
            .to_string(),
            "Notch Filter: 50 Hz (butterworth, order 2)"
        );
    }

    #[test]
    fn layer_names_normalize() {
        assert_eq!(normalize_layer_type("Dense Layer"), "Dense");
        assert_eq!(normalize_layer_type("Batch Normalization"), "BatchNormalization");
        assert_eq!(normalize_layer_type("LayerNormalization"), "LayerNormalization");
    }
}
