use crate::{
    evaluate::rate_from_spacing,
    model::CanonicalResult,
    raw::{Column, Lookup, NdArray, RawParseOutput},
};
use anyhow::{anyhow, bail, Result};
use ndarray::Array2;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

pub struct TransformContext<'a> {
    pub path: &'a Path,
    pub binding: &'a str,
    pub options: &'a toml::Table,
}

impl TransformContext<'_> {
    fn opt_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}

type TransformFn = fn(&RawParseOutput, &TransformContext<'_>) -> Result<CanonicalResult>;

const REGISTRY: &[(&str, TransformFn)] = &[
    ("tabular_time_series", tabular_time_series),
    ("single_trace", single_trace),
    ("signals_struct", signals_struct),
    ("rate_and_samples", rate_and_samples),
];

pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

pub fn apply(name: &str, raw: &RawParseOutput, ctx: &TransformContext<'_>) -> Result<CanonicalResult> {
    let (_, f) = REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| anyhow!("unknown transform '{name}'"))?;
    f(raw, ctx)
}

fn unit_suffix() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^()]+)\)\s*$").ok()).as_ref()
}

pub fn unit_from_header(header: &str) -> Option<String> {
    unit_suffix()?
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().nfkc().collect())
}

fn source_metadata(ctx: &TransformContext<'_>, modality: &str) -> std::collections::BTreeMap<String, Value> {
    let mut meta = std::collections::BTreeMap::new();
    meta.insert(
        "modality".to_string(),
        Value::from(ctx.opt_str("modality").unwrap_or(modality)),
    );
    meta.insert("source_file".to_string(), Value::from(ctx.path.display().to_string()));
    meta
}

fn tabular_time_series(raw: &RawParseOutput, ctx: &TransformContext<'_>) -> Result<CanonicalResult> {
    let RawParseOutput::Tabular(table) = raw else {
        bail!("expected tabular output bound as '{}', got {}", ctx.binding, raw.kind());
    };
    let time_name = match ctx.opt_str("time_column") {
        Some(name) => name.to_string(),
        None => table
            .columns
            .iter()
            .find(|c| c.name.to_ascii_lowercase().starts_with("time"))
            .map(|c| c.name.clone())
            .ok_or_else(|| anyhow!("no time column"))?,
    };
    let rate_name = ctx.opt_str("rate_column");

    let time = table
        .column(&time_name)
        .and_then(|c| c.values.as_numeric())
        .ok_or_else(|| anyhow!("time column '{time_name}' missing or not numeric"))?
        .to_vec();

    let channels: Vec<_> = table
        .columns
        .iter()
        .filter(|c| c.name != time_name && Some(c.name.as_str()) != rate_name)
        .filter_map(|c| match &c.values {
            Column::Numeric(v) => Some((c.name.clone(), v.clone())),
            Column::Text(_) => None,
        })
        .collect();
    if channels.is_empty() {
        bail!("no numeric channel columns");
    }

    let sampling_frequency = match rate_name {
        Some(name) => table
            .column(name)
            .and_then(|c| c.values.as_numeric())
            .and_then(|v| v.first().copied())
            .ok_or_else(|| anyhow!("rate column '{name}' missing or empty"))?,
        None => rate_from_spacing(&time)?,
    };

    let names: Vec<String> = channels.iter().map(|(n, _)| n.clone()).collect();
    let units = names
        .iter()
        .map(|n| unit_from_header(n).unwrap_or_else(|| "unknown".to_string()))
        .collect();
    let rows: Vec<Vec<f64>> = channels.into_iter().map(|(_, v)| v).collect();

    Ok(CanonicalResult {
        time: Some(time),
        signals: Some(crate::raw::stack_rows(&rows)?),
        sampling_frequency: Some(sampling_frequency),
        channel_names: Some(names),
        channel_units: Some(units),
        metadata: source_metadata(ctx, "time_series_csv"),
        annotations: Some(Vec::new()),
        ..Default::default()
    })
}

fn single_trace(raw: &RawParseOutput, ctx: &TransformContext<'_>) -> Result<CanonicalResult> {
    let time_name = ctx.opt_str("time").unwrap_or("t");
    let signal_name = ctx
        .opt_str("signal")
        .ok_or_else(|| anyhow!("transform option `signal` is required"))?;

    let t = raw.require(time_name)?.to_vector()?;
    let sig = raw.require(signal_name)?.to_vector()?;
    if t.len() != sig.len() {
        bail!("{time_name} and {signal_name} have different lengths ({} vs {})", t.len(), sig.len());
    }
    let fs = rate_from_spacing(&t).ok();
    let n = sig.len();

    let mut metadata = source_metadata(ctx, signal_name);
    // scalar side-channels, e.g. stimulation parameters
    if let Some(toml::Value::Array(extra)) = ctx.options.get("scalars") {
        for key in extra.iter().filter_map(|v| v.as_str()) {
            let v = raw.lookup(key).map(Lookup::to_json).unwrap_or(Value::Null);
            metadata.insert(key.to_string(), v);
        }
    }

    Ok(CanonicalResult {
        time: Some(t),
        signals: Some(Array2::from_shape_vec((1, n), sig).map_err(|e| anyhow!("{e}"))?),
        sampling_frequency: fs,
        channel_names: Some(vec![signal_name.to_string()]),
        channel_units: Some(vec![ctx.opt_str("unit").unwrap_or("unknown").to_string()]),
        metadata,
        annotations: Some(Vec::new()),
        ..Default::default()
    })
}

/// A `signals` array somewhere in the output, with `time` or `sr` beside it.
fn signals_struct(raw: &RawParseOutput, ctx: &TransformContext<'_>) -> Result<CanonicalResult> {
    let prefix = find_signals_prefix(raw).ok_or_else(|| anyhow!("no 'signals' entry found"))?;
    let name = |leaf: &str| {
        if prefix.is_empty() {
            leaf.to_string()
        } else {
            format!("{prefix}{}{leaf}", separator(raw))
        }
    };

    let signals = raw.require(&name("signals"))?.to_matrix()?;
    let sr = raw
        .lookup(&name("sr"))
        .and_then(|l| l.to_vector().ok())
        .and_then(|v| v.first().copied());
    let time = match raw.lookup(&name("time")).map(|l| l.to_vector()).transpose()? {
        Some(t) if !t.is_empty() => Some(t),
        _ => sr.map(|sr| (0..signals.ncols()).map(|k| k as f64 / sr).collect()),
    };
    let sampling_frequency = sr.or_else(|| time.as_deref().and_then(|t| rate_from_spacing(t).ok()));

    Ok(CanonicalResult {
        time,
        signals: Some(signals),
        sampling_frequency,
        metadata: source_metadata(ctx, "time_series"),
        annotations: Some(Vec::new()),
        ..Default::default()
    })
}

fn separator(raw: &RawParseOutput) -> &'static str {
    match raw {
        RawParseOutput::Group(_) => "/",
        _ => ".",
    }
}

/// Path prefix of the container holding `signals`, breadth-first.
fn find_signals_prefix(raw: &RawParseOutput) -> Option<String> {
    if raw.lookup("signals").is_some() {
        return Some(String::new());
    }
    match raw {
        RawParseOutput::Group(g) => {
            let mut queue: Vec<(String, &crate::raw::Group)> =
                g.groups.iter().map(|(k, v)| (k.clone(), v)).collect();
            while !queue.is_empty() {
                let mut next = Vec::new();
                for (path, group) in queue {
                    if group.arrays.contains_key("signals") {
                        return Some(path);
                    }
                    next.extend(group.groups.iter().map(|(k, v)| (format!("{path}/{k}"), v)));
                }
                queue = next;
            }
            None
        }
        RawParseOutput::Record { fields } => fields
            .iter()
            .find(|(_, v)| v.get("signals").is_some())
            .map(|(k, _)| k.clone()),
        _ => None,
    }
}

fn rate_and_samples(raw: &RawParseOutput, ctx: &TransformContext<'_>) -> Result<CanonicalResult> {
    let rate = raw
        .require(ctx.opt_str("rate").unwrap_or("rate"))?
        .to_vector()?
        .first()
        .copied()
        .ok_or_else(|| anyhow!("empty rate"))?;
    if rate <= 0.0 || !rate.is_finite() {
        bail!("invalid sampling rate {rate}");
    }
    let data_name = ctx.opt_str("data").unwrap_or("data");
    let signals = match raw.require(data_name)? {
        Lookup::Array(a) if a.shape.len() == 2 && a.shape[0] > 1 && a.shape[1] > 1 => {
            NdArray::transposed(a)?.to_matrix()?
        }
        other => other.to_matrix()?,
    };
    let n = signals.ncols();
    let channels = signals.nrows();

    Ok(CanonicalResult {
        time: Some((0..n).map(|k| k as f64 / rate).collect()),
        signals: Some(signals),
        sampling_frequency: Some(rate),
        channel_names: Some((1..=channels).map(|i| format!("CH{i}")).collect()),
        channel_units: Some(vec!["unknown".to_string(); channels]),
        metadata: source_metadata(ctx, "audio"),
        annotations: Some(Vec::new()),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{Group, Table, TableColumn};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn ctx_with<'a>(path: &'a PathBuf, options: &'a toml::Table) -> TransformContext<'a> {
        TransformContext {
            path,
            binding: "raw",
            options,
        }
    }

    #[test]
    fn units_come_from_trailing_parentheses() {
        assert_eq!(unit_from_header("pressure (mmHg)").as_deref(), Some("mmHg"));
        assert_eq!(unit_from_header("emg (\u{b5}V)").as_deref(), Some("\u{3bc}V"));
        assert_eq!(unit_from_header("label"), None);
    }

    #[test]
    fn tabular_series_splits_time_and_channels() {
        let raw = RawParseOutput::Tabular(Table {
            columns: vec![
                TableColumn {
                    name: "time since start (s)".into(),
                    values: Column::Numeric(vec![0.0, 0.5, 1.0]),
                },
                TableColumn {
                    name: "subject".into(),
                    values: Column::Text(vec!["a".into(), "a".into(), "a".into()]),
                },
                TableColumn {
                    name: "temp (C)".into(),
                    values: Column::Numeric(vec![36.0, 36.1, 36.2]),
                },
            ],
        });
        let path = PathBuf::from("x.csv");
        let opts = toml::Table::new();
        let r = apply("tabular_time_series", &raw, &ctx_with(&path, &opts)).unwrap();
        assert_eq!(r.signals.as_ref().unwrap().dim(), (1, 3));
        assert_eq!(r.channel_units, Some(vec!["C".to_string()]));
        assert!((r.sampling_frequency.unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn signals_struct_synthesizes_time_from_sr() {
        let mut inner = Group::default();
        inner
            .arrays
            .insert("signals".into(), NdArray::matrix(2, 4, vec![0.0; 8]).unwrap());
        inner.arrays.insert("sr".into(), NdArray::scalar(1000.0));
        let mut root = Group::default();
        root.groups.insert("bp".into(), inner);
        let raw = RawParseOutput::Group(root);

        let path = PathBuf::from("x.mat");
        let opts = toml::Table::new();
        let r = apply("signals_struct", &raw, &ctx_with(&path, &opts)).unwrap();
        assert_eq!(r.time.as_ref().unwrap()[1], 0.001);
        assert_eq!(r.sampling_frequency, Some(1000.0));
    }

    #[test]
    fn unknown_transform_is_an_error() {
        let raw = RawParseOutput::ArrayDict {
            arrays: BTreeMap::new(),
        };
        let path = PathBuf::from("x");
        let opts = toml::Table::new();
        assert!(apply("nope", &raw, &ctx_with(&path, &opts)).is_err());
    }
}
