//! Turns a raw parse into a [`CanonicalResult`].
//!
//! Declarative descriptors evaluate one extraction per mapping key; a failing
//! key becomes null, a failing metadata entry becomes null for that entry only,
//! and a failing annotation is dropped. Transform descriptors hand the whole
//! raw output to a registered function and any error disqualifies the
//! descriptor for this file.

use crate::{
    descriptor::{Descriptor, Extract, Mapping, PathPart},
    error::{ConvertError, ConvertResult},
    model::{Annotation, CanonicalResult, FieldValue},
    raw::{stack_rows, Column, ParsedFile, RawParseOutput},
    transform::{self, TransformContext},
};
use anyhow::{anyhow, bail, Result};
use ndarray::Array2;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub fn evaluate(descriptor: &Descriptor, parsed: &ParsedFile) -> ConvertResult<CanonicalResult> {
    let mut result = match descriptor.transform.as_deref() {
        Some(name) => {
            let ctx = TransformContext {
                path: &parsed.path,
                binding: &parsed.binding,
                options: &descriptor.transform_options,
            };
            transform::apply(name, &parsed.output, &ctx).map_err(|e| ConvertError::Postprocess {
                descriptor: descriptor.id.clone(),
                reason: format!("{e:#}"),
            })?
        }
        None => evaluate_mapping(&descriptor.mapping, parsed),
    };

    normalize_shapes(&mut result).map_err(|reason| ConvertError::Postprocess {
        descriptor: descriptor.id.clone(),
        reason,
    })?;
    result.apply_time_fallback();
    Ok(result)
}

pub fn evaluate_mapping(mapping: &Mapping, parsed: &ParsedFile) -> CanonicalResult {
    let mut result = CanonicalResult::default();

    for (key, extract) in &mapping.fields {
        let value = match eval_extract(extract, parsed) {
            Ok(v) => v,
            Err(e) => {
                debug!("{}", field_error(key, e));
                FieldValue::Null
            }
        };
        if let Err(e) = assign(&mut result, key, value) {
            debug!("{e}");
        }
    }

    for (key, extract) in &mapping.metadata {
        let value = match eval_extract(extract, parsed) {
            Ok(v) => v.to_json(),
            Err(e) => {
                debug!("{}", field_error(&format!("metadata.{key}"), e));
                Value::Null
            }
        };
        result.metadata.insert(key.clone(), value);
    }

    if let Some(annotations) = &mapping.annotations {
        let mut kept = Vec::with_capacity(annotations.len());
        for (i, table) in annotations.iter().enumerate() {
            match eval_annotation(table, parsed) {
                Ok(a) => kept.push(a),
                Err(e) => warn!("dropping annotation #{i}: {e:#}"),
            }
        }
        result.annotations = Some(kept);
    }

    result
}

fn field_error(field: &str, e: anyhow::Error) -> ConvertError {
    ConvertError::FieldEvaluation {
        field: field.to_string(),
        reason: format!("{e:#}"),
    }
}

fn eval_annotation(table: &BTreeMap<String, Extract>, parsed: &ParsedFile) -> Result<Annotation> {
    let mut fields = Map::new();
    for (field, extract) in table {
        let v = eval_extract(extract, parsed).map_err(|e| anyhow!("{field}: {e:#}"))?;
        fields.insert(field.clone(), v.to_json());
    }
    serde_json::from_value(Value::Object(fields)).map_err(|e| anyhow!("{e}"))
}

fn assign(result: &mut CanonicalResult, key: &str, value: FieldValue) -> ConvertResult<()> {
    if value.is_null() {
        return Ok(());
    }
    let mismatch = |want: &str, got: &FieldValue| ConvertError::FieldEvaluation {
        field: key.to_string(),
        reason: format!("expected {want}, got {}", got.type_name()),
    };
    match key {
        "time" => match value {
            FieldValue::Vector(v) => result.time = Some(v),
            FieldValue::Matrix(m) if m.nrows() == 1 || m.ncols() == 1 => {
                result.time = Some(m.iter().copied().collect())
            }
            other => return Err(mismatch("vector", &other)),
        },
        "signals" => match value {
            FieldValue::Matrix(m) => result.signals = Some(m),
            FieldValue::Vector(v) => {
                let n = v.len();
                result.signals = Array2::from_shape_vec((1, n), v).ok();
            }
            other => return Err(mismatch("matrix", &other)),
        },
        "sampling_frequency" => match value {
            FieldValue::Scalar(v) => result.sampling_frequency = Some(v),
            FieldValue::Vector(v) if v.len() == 1 => result.sampling_frequency = Some(v[0]),
            other => return Err(mismatch("scalar", &other)),
        },
        "channel_names" | "channel_units" => {
            let list = match value {
                FieldValue::TextList(v) => v,
                FieldValue::Text(s) => vec![s],
                other => return Err(mismatch("text list", &other)),
            };
            if key == "channel_names" {
                result.channel_names = Some(list);
            } else {
                result.channel_units = Some(list);
            }
        }
        other => {
            result.extras.insert(other.to_string(), value);
        }
    }
    Ok(())
}

pub fn eval_extract(extract: &Extract, parsed: &ParsedFile) -> Result<FieldValue> {
    let raw = &parsed.output;
    match extract {
        Extract::Column { name } => Ok(FieldValue::Vector(raw.require(name)?.to_vector()?)),
        Extract::Columns { names } => {
            let rows = names
                .iter()
                .map(|n| raw.require(n)?.to_vector())
                .collect::<Result<Vec<_>>>()?;
            Ok(FieldValue::Matrix(stack_rows(&rows)?))
        }
        Extract::ColumnSlice { start, end } => {
            let table = tabular(raw)?;
            let cols = slice(&table.columns, *start, *end)?;
            let rows = cols
                .iter()
                .map(|c| match &c.values {
                    Column::Numeric(v) => Ok(v.clone()),
                    Column::Text(_) => bail!("column '{}' is not numeric", c.name),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(FieldValue::Matrix(stack_rows(&rows)?))
        }
        Extract::ColumnNames { start, end } => {
            let table = tabular(raw)?;
            let cols = slice(&table.columns, *start, *end)?;
            Ok(FieldValue::TextList(cols.iter().map(|c| c.name.clone()).collect()))
        }
        Extract::Matrix { name, transpose } => {
            let m = raw.require(name)?.to_matrix()?;
            Ok(FieldValue::Matrix(if *transpose { m.reversed_axes() } else { m }))
        }
        Extract::Index { name, index } => {
            let v = raw.require(name)?.to_vector()?;
            let len = v.len() as i64;
            let i = if *index < 0 { len + index } else { *index };
            if i < 0 || i >= len {
                bail!("index {index} out of range for '{name}' (len {len})");
            }
            Ok(FieldValue::Scalar(v[i as usize]))
        }
        Extract::DiffRate { name } => {
            let v = raw.require(name)?.to_vector()?;
            Ok(FieldValue::Scalar(rate_from_spacing(&v)?))
        }
        Extract::Constant { value } => {
            let json = serde_json::to_value(value).map_err(|e| anyhow!("{e}"))?;
            Ok(FieldValue::from_json(json))
        }
        Extract::Field { name } => Ok(FieldValue::from_json(raw.require(name)?.to_json())),
        Extract::FilePath { part } => {
            let p = &parsed.path;
            let s = match part {
                PathPart::Full => Some(p.display().to_string()),
                PathPart::Name => p.file_name().map(|s| s.to_string_lossy().into_owned()),
                PathPart::Stem => p.file_stem().map(|s| s.to_string_lossy().into_owned()),
                PathPart::Extension => p.extension().map(|s| s.to_string_lossy().into_owned()),
            };
            Ok(s.map(FieldValue::Text).unwrap_or(FieldValue::Null))
        }
    }
}

/// 1 / mean(diff(v)).
pub fn rate_from_spacing(v: &[f64]) -> Result<f64> {
    if v.len() < 2 {
        bail!("need at least two samples to derive a rate");
    }
    let span = v[v.len() - 1] - v[0];
    let mean_step = span / (v.len() - 1) as f64;
    if mean_step == 0.0 || !mean_step.is_finite() {
        bail!("degenerate sample spacing");
    }
    Ok(1.0 / mean_step)
}

fn tabular(raw: &RawParseOutput) -> Result<&crate::raw::Table> {
    match raw {
        RawParseOutput::Tabular(t) => Ok(t),
        other => bail!("column slices need tabular output, got {}", other.kind()),
    }
}

fn slice<T>(items: &[T], start: usize, end: Option<usize>) -> Result<&[T]> {
    let end = end.unwrap_or(items.len());
    if start > end || end > items.len() {
        bail!("slice {start}..{end} out of range for {} columns", items.len());
    }
    Ok(&items[start..end])
}

fn normalize_shapes(result: &mut CanonicalResult) -> std::result::Result<(), String> {
    if let (Some(time), Some(n)) = (&result.time, result.sample_count()) {
        if time.len() != n {
            return Err(format!(
                "time/signals length mismatch: {} timestamps for {} samples",
                time.len(),
                n
            ));
        }
    }
    let channels = result.channel_count();
    if result.signals.is_some() {
        for (label, list) in [
            ("channel_names", &mut result.channel_names),
            ("channel_units", &mut result.channel_units),
        ] {
            if list.as_ref().is_some_and(|l| l.len() != channels) {
                warn!(
                    "dropping {label}: {} entries for {channels} channels",
                    list.as_ref().map(Vec::len).unwrap_or(0)
                );
                *list = None;
            }
        }
    }
    Ok(())
}
