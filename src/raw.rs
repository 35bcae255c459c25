use anyhow::{anyhow, bail, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawParseOutput {
    Tabular(Table),
    ArrayDict { arrays: BTreeMap<String, NdArray> },
    Record { fields: Map<String, Value> },
    Group(Group),
}

#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub binding: String,
    pub output: RawParseOutput,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<TableColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub values: Column,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Column::Numeric(v) => Some(v),
            Column::Text(_) => None,
        }
    }
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NdArray {
    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn matrix(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows * cols != data.len() {
            bail!("{}x{} matrix needs {} values, got {}", rows, cols, rows * cols, data.len());
        }
        Ok(Self {
            shape: vec![rows, cols],
            data,
        })
    }

    pub fn scalar(v: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![v],
        }
    }

    fn check(&self) -> Result<()> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            bail!(
                "array shape {:?} needs {} values, got {}",
                self.shape,
                expected,
                self.data.len()
            );
        }
        Ok(())
    }

    pub fn as_vector(&self) -> Result<&[f64]> {
        self.check()?;
        let long_axes = self.shape.iter().filter(|&&n| n > 1).count();
        if long_axes > 1 {
            bail!("expected a vector, got shape {:?}", self.shape);
        }
        Ok(&self.data)
    }

    /// Channels x samples view: 1-D becomes a single channel, higher ranks
    /// fold trailing axes into samples.
    pub fn to_matrix(&self) -> Result<Array2<f64>> {
        self.check()?;
        let (rows, cols) = match self.shape.len() {
            0 => (1, 1),
            1 => (1, self.shape[0]),
            2 if self.shape[0] == 1 || self.shape[1] == 1 => (1, self.data.len()),
            _ => {
                let rows = self.shape[0];
                (rows, if rows == 0 { 0 } else { self.data.len() / rows })
            }
        };
        Array2::from_shape_vec((rows, cols), self.data.clone()).map_err(|e| anyhow!("{e}"))
    }

    pub fn transposed(&self) -> Result<Self> {
        self.check()?;
        if self.shape.len() != 2 {
            bail!("transpose needs a 2-D array, got shape {:?}", self.shape);
        }
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..cols {
            for r in 0..rows {
                data.push(self.data[r * cols + c]);
            }
        }
        Ok(Self {
            shape: vec![cols, rows],
            data,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub attrs: Map<String, Value>,
    #[serde(default)]
    pub arrays: BTreeMap<String, NdArray>,
    #[serde(default)]
    pub groups: BTreeMap<String, Group>,
}

impl Group {
    fn walk(&self, segments: &[&str]) -> Option<Lookup<'_>> {
        match segments {
            [] => None,
            [last] => self
                .arrays
                .get(*last)
                .map(Lookup::Array)
                .or_else(|| self.attrs.get(*last).map(Lookup::Json)),
            [head, rest @ ..] => self.groups.get(*head)?.walk(rest),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Numbers(&'a [f64]),
    Texts(&'a [String]),
    Array(&'a NdArray),
    Json(&'a Value),
}

impl<'a> Lookup<'a> {
    pub fn to_vector(self) -> Result<Vec<f64>> {
        match self {
            Lookup::Numbers(v) => Ok(v.to_vec()),
            Lookup::Array(a) => Ok(a.as_vector()?.to_vec()),
            Lookup::Json(v) => json_numbers(v),
            Lookup::Texts(_) => bail!("text column is not numeric"),
        }
    }

    pub fn to_matrix(self) -> Result<Array2<f64>> {
        match self {
            Lookup::Array(a) => a.to_matrix(),
            Lookup::Json(Value::Array(rows))
                if rows.iter().all(|r| matches!(r, Value::Array(_))) =>
            {
                let rows = rows.iter().map(json_numbers).collect::<Result<Vec<_>>>()?;
                stack_rows(&rows)
            }
            other => {
                let v = other.to_vector()?;
                let n = v.len();
                Array2::from_shape_vec((1, n), v).map_err(|e| anyhow!("{e}"))
            }
        }
    }

    pub fn to_json(self) -> Value {
        match self {
            Lookup::Numbers(v) => Value::from(v.to_vec()),
            Lookup::Texts(v) => Value::from(v.to_vec()),
            Lookup::Array(a) if a.shape.is_empty() => a.data.first().copied().map(Value::from).unwrap_or(Value::Null),
            Lookup::Array(a) => Value::from(a.data.clone()),
            Lookup::Json(v) => v.clone(),
        }
    }
}

fn json_numbers(v: &Value) -> Result<Vec<f64>> {
    match v {
        Value::Array(items) => items
            .iter()
            .map(|x| x.as_f64().ok_or_else(|| anyhow!("non-numeric element: {x}")))
            .collect(),
        Value::Number(n) => Ok(vec![n.as_f64().unwrap_or(f64::NAN)]),
        other => bail!("not numeric: {other}"),
    }
}

pub fn stack_rows(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let samples = rows.first().map(|r| r.len()).unwrap_or(0);
    if let Some(bad) = rows.iter().find(|r| r.len() != samples) {
        bail!("ragged channels: {} vs {} samples", bad.len(), samples);
    }
    let data: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), samples), data).map_err(|e| anyhow!("{e}"))
}

impl RawParseOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            RawParseOutput::Tabular(_) => "tabular",
            RawParseOutput::ArrayDict { .. } => "array_dict",
            RawParseOutput::Record { .. } => "record",
            RawParseOutput::Group(_) => "group",
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Lookup<'_>> {
        match self {
            RawParseOutput::Tabular(t) => t.column(name).map(|c| match &c.values {
                Column::Numeric(v) => Lookup::Numbers(v),
                Column::Text(v) => Lookup::Texts(v),
            }),
            RawParseOutput::ArrayDict { arrays } => arrays.get(name).map(Lookup::Array),
            RawParseOutput::Record { fields } => {
                let mut parts = name.split('.');
                let mut cur = fields.get(parts.next()?)?;
                for p in parts {
                    cur = match cur {
                        Value::Object(m) => m.get(p)?,
                        Value::Array(items) => items.get(p.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                Some(Lookup::Json(cur))
            }
            RawParseOutput::Group(g) => {
                let segments: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
                g.walk(&segments)
            }
        }
    }

    pub fn require(&self, name: &str) -> Result<Lookup<'_>> {
        self.lookup(name)
            .ok_or_else(|| anyhow!("'{}' not found in {} output", name, self.kind()))
    }
}
