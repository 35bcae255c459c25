use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const TIME_AUTO_GENERATED: &str = "time_auto_generated";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Scalar(f64),
    Text(String),
    Vector(Vec<f64>),
    TextList(Vec<String>),
    Matrix(Array2<f64>),
    Json(Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null | FieldValue::Json(Value::Null))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Scalar(_) => "scalar",
            FieldValue::Text(_) => "text",
            FieldValue::Vector(_) => "vector",
            FieldValue::TextList(_) => "text list",
            FieldValue::Matrix(_) => "matrix",
            FieldValue::Json(_) => "json",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Scalar(v) => json_f64(*v),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Vector(v) => Value::Array(v.iter().map(|x| json_f64(*x)).collect()),
            FieldValue::TextList(v) => Value::from(v.clone()),
            FieldValue::Matrix(m) => Value::Array(
                m.rows()
                    .into_iter()
                    .map(|r| Value::Array(r.iter().map(|x| json_f64(*x)).collect()))
                    .collect(),
            ),
            FieldValue::Json(v) => v.clone(),
        }
    }

    pub fn from_json(v: Value) -> FieldValue {
        match v {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => n.as_f64().map(FieldValue::Scalar).unwrap_or(FieldValue::Null),
            Value::String(s) => FieldValue::Text(s),
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_number) => {
                FieldValue::Vector(items.iter().filter_map(Value::as_f64).collect())
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_string) => {
                FieldValue::TextList(
                    items
                        .into_iter()
                        .filter_map(|s| match s {
                            Value::String(s) => Some(s),
                            _ => None,
                        })
                        .collect(),
                )
            }
            other => FieldValue::Json(other),
        }
    }
}

/// JSON has no NaN/inf; those become null.
pub fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub label: String,
    pub onset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalResult {
    pub time: Option<Vec<f64>>,
    pub signals: Option<Array2<f64>>,
    pub sampling_frequency: Option<f64>,
    pub channel_names: Option<Vec<String>>,
    pub channel_units: Option<Vec<String>>,
    pub metadata: BTreeMap<String, Value>,
    pub annotations: Option<Vec<Annotation>>,
    pub extras: BTreeMap<String, FieldValue>,
}

impl CanonicalResult {
    pub fn channel_count(&self) -> usize {
        self.signals.as_ref().map(|s| s.nrows()).unwrap_or(0)
    }

    pub fn sample_count(&self) -> Option<usize> {
        self.signals.as_ref().map(|s| s.ncols())
    }

    /// Whether `field` holds a non-null value. Content is not inspected.
    pub fn has_field(&self, field: &str) -> bool {
        match field {
            "time" => self.time.is_some(),
            "signals" => self.signals.is_some(),
            "sampling_frequency" => self.sampling_frequency.is_some(),
            "channel_names" => self.channel_names.is_some(),
            "channel_units" => self.channel_units.is_some(),
            "metadata" => true,
            "annotations" => self.annotations.is_some(),
            other => self.extras.get(other).is_some_and(|v| !v.is_null()),
        }
    }

    pub fn time_auto_generated(&self) -> bool {
        self.metadata
            .get(TIME_AUTO_GENERATED)
            .and_then(Value::as_bool)
            .unwrap_or(self.time.is_none())
    }

    /// Synthesize `time` as sample indices when only `signals` is present and
    /// record whether that happened.
    pub fn apply_time_fallback(&mut self) {
        let generated = match (&self.time, &self.signals) {
            (None, Some(signals)) => {
                self.time = Some((0..signals.ncols()).map(|i| i as f64).collect());
                true
            }
            _ => false,
        };
        self.metadata
            .insert(TIME_AUTO_GENERATED.to_string(), Value::Bool(generated));
    }
}
