use super::{Arguments, FormatReader, LoadedReader};
use crate::raw::{NdArray, RawParseOutput};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// JSON documents: an explicitly tagged raw output (`"kind": ...`), an object
/// of numeric arrays, or any other object as a structured record.
pub struct JsonReader;

pub fn read_json(path: &Path) -> Result<RawParseOutput> {
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value =
        serde_json::from_slice(&raw).with_context(|| format!("parsing JSON: {}", path.display()))?;
    from_value(value)
}

pub fn from_value(value: Value) -> Result<RawParseOutput> {
    let Value::Object(fields) = value else {
        bail!("top-level JSON value must be an object");
    };
    if fields.contains_key("kind") {
        return serde_json::from_value(Value::Object(fields)).with_context(|| "decoding tagged output");
    }
    if !fields.is_empty() {
        if let Some(arrays) = numeric_arrays(&fields) {
            return Ok(RawParseOutput::ArrayDict { arrays });
        }
    }
    Ok(RawParseOutput::Record { fields })
}

fn numeric_arrays(fields: &serde_json::Map<String, Value>) -> Option<BTreeMap<String, NdArray>> {
    fields
        .iter()
        .map(|(k, v)| Some((k.clone(), to_ndarray(v)?)))
        .collect()
}

fn to_ndarray(v: &Value) -> Option<NdArray> {
    match v {
        Value::Number(n) => Some(NdArray::scalar(n.as_f64()?)),
        Value::Array(items) if items.iter().all(Value::is_number) => {
            Some(NdArray::vector(items.iter().filter_map(Value::as_f64).collect()))
        }
        Value::Array(rows) if !rows.is_empty() => {
            let rows: Vec<Vec<f64>> = rows
                .iter()
                .map(|r| {
                    r.as_array()?
                        .iter()
                        .map(Value::as_f64)
                        .collect::<Option<Vec<f64>>>()
                })
                .collect::<Option<_>>()?;
            let cols = rows[0].len();
            if rows.iter().any(|r| r.len() != cols) {
                return None;
            }
            let n = rows.len();
            NdArray::matrix(n, cols, rows.into_iter().flatten().collect()).ok()
        }
        _ => None,
    }
}

struct JsonInstance {
    path: PathBuf,
}

impl LoadedReader for JsonInstance {
    fn load(&mut self, method: &str) -> Result<RawParseOutput> {
        match method {
            "read" | "load" => read_json(&self.path),
            other => bail!("json reader has no load method '{other}'"),
        }
    }
}

impl FormatReader for JsonReader {
    fn construct(&self, init: &Arguments) -> Result<Box<dyn LoadedReader>> {
        Ok(Box::new(JsonInstance { path: init.path()? }))
    }

    fn call(&self, function: &str, args: &Arguments) -> Result<RawParseOutput> {
        match function {
            "load" | "read" => read_json(&args.path()?),
            other => bail!("json reader has no function '{other}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_objects_become_array_dicts() {
        let out = from_value(json!({"t": [0.0, 0.5], "ecg": [[1, 2], [3, 4]], "freq": 20})).unwrap();
        let RawParseOutput::ArrayDict { arrays } = out else {
            panic!("expected array_dict");
        };
        assert_eq!(arrays["ecg"].shape, vec![2, 2]);
        assert_eq!(arrays["freq"].shape, Vec::<usize>::new());
    }

    #[test]
    fn mixed_objects_become_records() {
        let out = from_value(json!({"subject": {"species": "rat"}, "v": [1, 2]})).unwrap();
        assert_eq!(out.kind(), "record");
        assert_eq!(out.require("subject.species").unwrap().to_json(), json!("rat"));
    }
}
