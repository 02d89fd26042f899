use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Typed hyperparameter or layer parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

pub type ParamMap = BTreeMap<String, ParamValue>;

impl ParamValue {
    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view; floats with no fractional part count as integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Text(_) => "string",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Pulls typed values out of a step's `params` object. Every key must be
/// consumed; [`ParamReader::finish`] reports the leftovers.
pub(crate) struct ParamReader {
    params: Map<String, Value>,
}

impl ParamReader {
    pub(crate) fn new(params: Map<String, Value>) -> Self {
        Self { params }
    }

    pub(crate) fn from_value(params: Option<&Value>) -> Result<Self, String> {
        match params {
            None | Some(Value::Null) => Ok(Self::new(Map::new())),
            Some(Value::Object(map)) => Ok(Self::new(map.clone())),
            Some(other) => Err(format!("params must be an object, got {}", other)),
        }
    }

    pub(crate) fn take(&mut self, key: &str) -> Option<Value> {
        self.params.remove(key).filter(|v| !v.is_null())
    }

    pub(crate) fn f64(&mut self, key: &str) -> Result<f64, String> {
        self.opt_f64(key)?
            .ok_or_else(|| format!("missing parameter '{}'", key))
    }

    pub(crate) fn opt_f64(&mut self, key: &str) -> Result<Option<f64>, String> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| format!("'{}' is not a finite number", key)),
            // text fields in older files hold numbers as strings
            Some(Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Some(v)),
                Ok(_) => Err(format!("'{}' is not a finite number", key)),
                Err(_) => Err(format!("'{}' must be a number, got \"{}\"", key, s)),
            },
            Some(other) => Err(format!("'{}' must be a number, got {}", key, other)),
        }
    }

    pub(crate) fn opt_u32(&mut self, key: &str) -> Result<Option<u32>, String> {
        match self.opt_f64(key)? {
            None => Ok(None),
            Some(v) if v.fract() == 0.0 && v >= 0.0 && v <= u32::MAX as f64 => Ok(Some(v as u32)),
            Some(v) => Err(format!("'{}' must be a non-negative integer, got {}", key, v)),
        }
    }

    pub(crate) fn opt_bool(&mut self, key: &str) -> Result<Option<bool>, String> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(other) => Err(format!("'{}' must be a boolean, got {}", key, other)),
        }
    }

    pub(crate) fn opt_str(&mut self, key: &str) -> Result<Option<String>, String> {
        match self.take(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(format!("'{}' must be a string, got {}", key, other)),
        }
    }

    pub(crate) fn index_list(&mut self, key: &str) -> Result<Vec<usize>, String> {
        match self.take(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .map(|v| v as usize)
                        .ok_or_else(|| format!("'{}' entries must be indices, got {}", key, item))
                })
                .collect(),
            Some(other) => Err(format!("'{}' must be a list, got {}", key, other)),
        }
    }

    /// Remaining keys as a typed map (model hyperparameters keep whatever was given).
    pub(crate) fn rest(self) -> Result<ParamMap, String> {
        self.params
            .into_iter()
            .map(|(key, value)| {
                serde_json::from_value::<ParamValue>(value.clone())
                    .map(|v| (key.clone(), v))
                    .map_err(|_| format!("parameter '{}' has unsupported value {}", key, value))
            })
            .collect()
    }

    pub(crate) fn finish(self) -> Result<(), String> {
        let mut leftover: Vec<_> = self.params.keys().map(String::as_str).collect();
        if leftover.is_empty() {
            return Ok(());
        }
        leftover.sort_unstable();
        Err(format!("unexpected parameter(s): {}", leftover.join(", ")))
    }
}
