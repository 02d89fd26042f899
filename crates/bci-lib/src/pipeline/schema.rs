//! Hyperparameter and layer tables for every model a pipeline can end in.

use crate::pipeline::params::{ParamMap, ParamValue};
use crate::pipeline::step::normalize_layer_type;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamKind {
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Choice { options: &'static [&'static str] },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSchema {
    pub name: &'static str,
    #[serde(flatten)]
    pub kind: ParamKind,
    /// Words accepted in place of a number, e.g. `"auto"` or `"None"`.
    #[serde(skip_serializing_if = "no_keywords")]
    pub keywords: &'static [&'static str],
    /// Value used when a step leaves the parameter out. `None` makes it required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
}

fn no_keywords(keywords: &&[&str]) -> bool {
    keywords.is_empty()
}

/// What is wrong with one parameter value; the validator adds the location.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParamProblem {
    Type { expected: String },
    Range { value: f64, min: f64, max: f64 },
    NonFinite { value: f64 },
    Option { value: String, options: Vec<String> },
}

impl ParamSchema {
    fn int(name: &'static str, default: i64, min: i64, max: i64) -> Self {
        Self {
            name,
            kind: ParamKind::Int { min, max },
            keywords: &[],
            default: Some(ParamValue::Int(default)),
        }
    }

    fn float(name: &'static str, default: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            kind: ParamKind::Float { min, max },
            keywords: &[],
            default: Some(ParamValue::Float(default)),
        }
    }

    /// First option is the default.
    fn choice(name: &'static str, options: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: ParamKind::Choice { options },
            keywords: &[],
            default: Some(ParamValue::from(options[0])),
        }
    }

    fn or_keywords(mut self, keywords: &'static [&'static str], default: &'static str) -> Self {
        self.keywords = keywords;
        self.default = Some(ParamValue::from(default));
        self
    }

    /// Drop the default so steps must set the parameter explicitly.
    pub fn required(mut self) -> Self {
        self.default = None;
        self
    }

    fn expected(&self) -> String {
        let base = match &self.kind {
            ParamKind::Int { .. } => "int".to_string(),
            ParamKind::Float { .. } => "float".to_string(),
            ParamKind::Choice { .. } => "string".to_string(),
        };
        if self.keywords.is_empty() {
            base
        } else {
            format!("{} or one of {}", base, self.keywords.join(", "))
        }
    }

    pub(crate) fn check(&self, value: &ParamValue) -> Result<(), ParamProblem> {
        if let ParamValue::Text(text) = value {
            if self
                .keywords
                .iter()
                .any(|word| word.eq_ignore_ascii_case(text.trim()))
            {
                return Ok(());
            }
        }
        match &self.kind {
            ParamKind::Int { min, max } => {
                let v = value.as_i64().ok_or_else(|| ParamProblem::Type {
                    expected: self.expected(),
                })?;
                if v < *min || v > *max {
                    return Err(ParamProblem::Range {
                        value: v as f64,
                        min: *min as f64,
                        max: *max as f64,
                    });
                }
                Ok(())
            }
            ParamKind::Float { min, max } => {
                let v = value.as_f64().ok_or_else(|| ParamProblem::Type {
                    expected: self.expected(),
                })?;
                if !v.is_finite() {
                    return Err(ParamProblem::NonFinite { value: v });
                }
                if !(*min..=*max).contains(&v) {
                    return Err(ParamProblem::Range {
                        value: v,
                        min: *min,
                        max: *max,
                    });
                }
                Ok(())
            }
            ParamKind::Choice { options } => {
                let text = match value {
                    ParamValue::Text(text) => text.clone(),
                    // "True"/"False" options also take JSON booleans
                    ParamValue::Bool(b) => b.to_string(),
                    _ => {
                        return Err(ParamProblem::Type {
                            expected: self.expected(),
                        })
                    }
                };
                if options.iter().any(|option| option.eq_ignore_ascii_case(&text)) {
                    Ok(())
                } else {
                    Err(ParamProblem::Option {
                        value: text,
                        options: options.iter().map(|o| o.to_string()).collect(),
                    })
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSchema {
    pub name: &'static str,
    pub params: Vec<ParamSchema>,
}

impl LayerSchema {
    fn new(name: &'static str, params: Vec<ParamSchema>) -> Self {
        Self { name, params }
    }

    pub fn default_parameters(&self) -> ParamMap {
        defaults(&self.params)
    }

    /// `given` with every omitted parameter filled from its default.
    pub fn resolve(&self, given: &ParamMap) -> ParamMap {
        fill_defaults(&self.params, given)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Classical,
    Perceptron,
    /// Dense layers need a preceding Flatten.
    Convolutional,
    Recurrent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSchema {
    pub name: &'static str,
    pub alias: &'static str,
    pub architecture: Architecture,
    pub hyperparams: Vec<ParamSchema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<LayerSchema>,
}

impl ModelSchema {
    pub fn is_deep(&self) -> bool {
        self.architecture != Architecture::Classical
    }

    pub fn param(&self, name: &str) -> Option<&ParamSchema> {
        self.hyperparams.iter().find(|p| p.name == name)
    }

    pub fn layer(&self, layer_type: &str) -> Option<&LayerSchema> {
        let wanted = normalize_layer_type(layer_type);
        self.layers.iter().find(|l| l.name == wanted)
    }

    pub fn default_hyperparams(&self) -> ParamMap {
        defaults(&self.hyperparams)
    }

    pub fn resolve_hyperparams(&self, given: &ParamMap) -> ParamMap {
        fill_defaults(&self.hyperparams, given)
    }

    fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        // "Random Forest" has no abbreviation; others also answer to the bare name
        let bare = self.name.split(" (").next().unwrap_or(self.name);
        self.name.eq_ignore_ascii_case(name)
            || self.alias.eq_ignore_ascii_case(name)
            || bare.eq_ignore_ascii_case(name)
    }
}

fn defaults(params: &[ParamSchema]) -> ParamMap {
    fill_defaults(params, &ParamMap::new())
}

fn fill_defaults(params: &[ParamSchema], given: &ParamMap) -> ParamMap {
    let mut resolved = given.clone();
    for param in params {
        if let Some(default) = &param.default {
            resolved
                .entry(param.name.to_string())
                .or_insert_with(|| default.clone());
        }
    }
    resolved
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCatalog {
    models: Vec<ModelSchema>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelSchema>) -> Self {
        Self { models }
    }

    /// Shared catalog of the classical and deep-learning models.
    pub fn builtin() -> &'static ModelCatalog {
        static CATALOG: OnceLock<ModelCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| {
            let mut models = classical_models();
            models.extend(deep_models());
            ModelCatalog::new(models)
        })
    }

    pub fn models(&self) -> &[ModelSchema] {
        &self.models
    }

    /// Look up by display name, bare name or short alias (case-insensitive).
    pub fn find(&self, name: &str) -> Option<&ModelSchema> {
        self.models.iter().find(|m| m.matches(name))
    }
}

const ACTIVATIONS: &[&str] = &["relu", "sigmoid", "tanh", "linear"];
const RECURRENT_ACTIVATIONS: &[&str] = &["tanh", "relu", "sigmoid"];
const OPTIMIZERS: &[&str] = &["SGD", "Adam", "RMSprop", "AdamW", "Lookahead"];
const PADDING: &[&str] = &["same", "valid"];
const FLAGS: &[&str] = &["False", "True"];
const NONE: &[&str] = &["None"];

fn classical(
    name: &'static str,
    alias: &'static str,
    hyperparams: Vec<ParamSchema>,
) -> ModelSchema {
    ModelSchema {
        name,
        alias,
        architecture: Architecture::Classical,
        hyperparams,
        layers: Vec::new(),
    }
}

fn classical_models() -> Vec<ModelSchema> {
    vec![
        classical(
            "Linear Discriminant Analysis (LDA)",
            "lda",
            vec![
                ParamSchema::choice("solver", &["svd", "lsqr", "eigen"]),
                ParamSchema::float("shrinkage", 0.0, 0.0, 1.0).or_keywords(&["auto", "None"], "auto"),
                ParamSchema::int("n_components", 1, 1, 1024).or_keywords(NONE, "None"),
            ],
        ),
        classical(
            "Support Vector Machine (SVM)",
            "svm",
            vec![
                ParamSchema::choice("kernel", &["linear", "poly", "rbf", "sigmoid"]),
                ParamSchema::float("c", 1.0, 1e-6, 1e6),
                ParamSchema::float("gamma", 1.0, 1e-9, 1e3).or_keywords(&["scale", "auto"], "scale"),
            ],
        ),
        classical(
            "Random Forest",
            "random_forest",
            vec![
                ParamSchema::int("n_estimators", 100, 1, 10_000),
                ParamSchema::int("max_depth", 10, 1, 1000).or_keywords(NONE, "None"),
                ParamSchema::int("min_samples_split", 2, 2, 1000),
                ParamSchema::int("min_samples_leaf", 1, 1, 1000),
                ParamSchema::choice("max_features", &["auto", "sqrt", "log2"]),
            ],
        ),
        classical(
            "Gradient Boosting Machine (GBM)",
            "gbm",
            vec![
                ParamSchema::int("n_estimators", 100, 1, 10_000),
                ParamSchema::float("learning_rate", 0.1, 1e-4, 1.0),
                ParamSchema::int("max_depth", 3, 1, 100),
                ParamSchema::int("min_samples_split", 2, 2, 1000),
                ParamSchema::float("subsample", 1.0, 0.01, 1.0),
            ],
        ),
        classical(
            "K-means Clustering",
            "kmeans",
            vec![
                ParamSchema::int("n_clusters", 8, 1, 1000),
                ParamSchema::choice("init", &["k-means++", "random"]),
            ],
        ),
        classical(
            "Gaussian Mixture Model (GMM)",
            "gmm",
            vec![
                ParamSchema::int("n_components", 1, 1, 1000),
                ParamSchema::choice("covariance_type", &["full", "tied", "diag", "spherical"]),
            ],
        ),
    ]
}

fn training_params(batch_size: i64, epochs: i64, extra: ParamSchema) -> Vec<ParamSchema> {
    vec![
        ParamSchema::float("learning_rate", 0.001, 0.0001, 0.1),
        ParamSchema::int("batch_size", batch_size, 1, 1024),
        ParamSchema::int("epochs", epochs, 1, 1000),
        ParamSchema::choice("optimizer", OPTIMIZERS),
        extra,
    ]
}

fn dense() -> LayerSchema {
    LayerSchema::new(
        "Dense",
        vec![
            ParamSchema::int("units", 64, 1, 2048),
            ParamSchema::choice("activation", ACTIVATIONS),
        ],
    )
}

fn dropout() -> LayerSchema {
    LayerSchema::new("Dropout", vec![ParamSchema::float("rate", 0.2, 0.0, 1.0)])
}

fn pooling(name: &'static str) -> LayerSchema {
    LayerSchema::new(
        name,
        vec![
            ParamSchema::int("pool_size", 2, 1, 8),
            ParamSchema::int("strides", 2, 1, 8),
        ],
    )
}

fn recurrent(name: &'static str) -> LayerSchema {
    LayerSchema::new(
        name,
        vec![
            ParamSchema::int("units", 50, 1, 512),
            ParamSchema::choice("activation", RECURRENT_ACTIVATIONS),
            ParamSchema::choice("return_sequences", FLAGS),
        ],
    )
}

fn attention() -> LayerSchema {
    LayerSchema::new("Attention", vec![ParamSchema::int("units", 64, 1, 512)])
}

fn deep_models() -> Vec<ModelSchema> {
    vec![
        ModelSchema {
            name: "Multi-layer Perceptron",
            alias: "mlp",
            architecture: Architecture::Perceptron,
            hyperparams: training_params(
                32,
                100,
                ParamSchema::float("weight_decay", 0.01, 0.0, 1.0),
            ),
            layers: vec![
                dense(),
                dropout(),
                LayerSchema::new("BatchNormalization", Vec::new()),
            ],
        },
        ModelSchema {
            name: "Convolutional Neural Network",
            alias: "cnn",
            architecture: Architecture::Convolutional,
            hyperparams: training_params(16, 50, ParamSchema::int("early_stopping", 10, 1, 100)),
            layers: vec![
                LayerSchema::new(
                    "Conv2D",
                    vec![
                        ParamSchema::int("filters", 32, 1, 512),
                        ParamSchema::int("kernel_size", 3, 1, 11),
                        ParamSchema::choice("activation", ACTIVATIONS),
                        ParamSchema::choice("padding", PADDING),
                    ],
                ),
                pooling("MaxPooling2D"),
                pooling("AveragePooling2D"),
                LayerSchema::new(
                    "DepthwiseConv2D",
                    vec![
                        ParamSchema::int("kernel_size", 3, 1, 11),
                        ParamSchema::choice("activation", ACTIVATIONS),
                        ParamSchema::choice("padding", PADDING),
                    ],
                ),
                LayerSchema::new("LayerNormalization", Vec::new()),
                LayerSchema::new("Flatten", Vec::new()),
                dense(),
                dropout(),
            ],
        },
        ModelSchema {
            name: "Recurrent Neural Network",
            alias: "rnn",
            architecture: Architecture::Recurrent,
            hyperparams: training_params(
                32,
                100,
                ParamSchema::float("gradient_clipping", 0.5, 0.0, 10.0),
            ),
            layers: vec![
                recurrent("SimpleRNN"),
                recurrent("GRU"),
                attention(),
                dense(),
                dropout(),
            ],
        },
        ModelSchema {
            name: "LSTM Network",
            alias: "lstm",
            architecture: Architecture::Recurrent,
            hyperparams: training_params(
                32,
                100,
                ParamSchema::float("gradient_clipping", 0.5, 0.0, 10.0),
            ),
            layers: vec![
                recurrent("LSTM"),
                recurrent("GRU"),
                attention(),
                dense(),
                dropout(),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_alias_and_bare_name() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(catalog.models().len(), 10);
        let lda = catalog.find("lda").unwrap();
        assert_eq!(lda.name, "Linear Discriminant Analysis (LDA)");
        assert_eq!(catalog.find("Linear Discriminant Analysis").unwrap(), lda);
        assert_eq!(
            catalog.find("CONVOLUTIONAL NEURAL NETWORK").unwrap().alias,
            "cnn"
        );
        assert!(catalog.find("transformer").is_none());
    }

    #[test]
    fn defaults_pass_their_own_checks() {
        for model in ModelCatalog::builtin().models() {
            for param in &model.hyperparams {
                let default = param.default.as_ref().unwrap();
                assert_eq!(param.check(default), Ok(()), "{}.{}", model.name, param.name);
            }
            for layer in &model.layers {
                for param in &layer.params {
                    let default = param.default.as_ref().unwrap();
                    assert_eq!(param.check(default), Ok(()), "{}.{}", layer.name, param.name);
                }
            }
        }
    }

    #[test]
    fn keywords_ranges_and_options() {
        let lda = ModelCatalog::builtin().find("lda").unwrap();
        let shrinkage = lda.param("shrinkage").unwrap();
        assert_eq!(shrinkage.check(&ParamValue::from("auto")), Ok(()));
        assert_eq!(shrinkage.check(&ParamValue::Float(0.5)), Ok(()));
        assert!(matches!(
            shrinkage.check(&ParamValue::Float(1.5)),
            Err(ParamProblem::Range { .. })
        ));
        assert!(matches!(
            shrinkage.check(&ParamValue::from("always")),
            Err(ParamProblem::Type { .. })
        ));
        let solver = lda.param("solver").unwrap();
        assert!(matches!(
            solver.check(&ParamValue::from("newton")),
            Err(ParamProblem::Option { .. })
        ));

        let rnn = ModelCatalog::builtin().find("rnn").unwrap();
        let flag = &rnn.layer("GRU Layer").unwrap().params[2];
        assert_eq!(flag.check(&ParamValue::Bool(true)), Ok(()));
        assert_eq!(flag.check(&ParamValue::from("False")), Ok(()));
    }

    #[test]
    fn palette_lookup_normalizes_names() {
        let mlp = ModelCatalog::builtin().find("mlp").unwrap();
        assert!(mlp.layer("Batch Normalization").is_some());
        assert!(mlp.layer("Conv2D Layer").is_none());
        let dense = mlp.layer("Dense Layer").unwrap().default_parameters();
        assert_eq!(dense["units"], ParamValue::Int(64));
        assert_eq!(dense["activation"], ParamValue::from("relu"));
    }
}
