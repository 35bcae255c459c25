//! Zarr v3 stores written through `zarrs`, as a directory or packed into
//! one tar file.
//!
//! ```text
//! zarr.json                  root group, merged metadata as attributes
//! time/      float64 [samples]
//! signals/   float64 [channels, samples]
//! annotations/zarr.json      group, "entries" attribute (only when present)
//! ```

use super::{persist_dir, persist_file, StoredContainer, WriteOptions};
use crate::error::{ConvertError, ConvertResult};
use ndarray::Array2;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;
use zarrs::array::Array;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};

const ANNOTATIONS: &str = "/annotations";

fn store_err(err: impl std::fmt::Display) -> ConvertError {
    ConvertError::write(format!("zarr: {err}"))
}

fn json_bytes(v: &impl serde::Serialize) -> ConvertResult<Vec<u8>> {
    serde_json::to_vec_pretty(v).map_err(ConvertError::write)
}

fn open_store(dir: &Path) -> ConvertResult<Arc<FilesystemStore>> {
    Ok(Arc::new(FilesystemStore::new(dir).map_err(store_err)?))
}

fn float_array(shape: &[u64], chunks: &[u64], dims: &[&str], level: u32) -> Value {
    let mut codecs = vec![json!({ "name": "bytes", "configuration": { "endian": "little" } })];
    if level > 0 {
        codecs.push(json!({ "name": "gzip", "configuration": { "level": level } }));
    }
    json!({
        "zarr_format": 3,
        "node_type": "array",
        "shape": shape,
        "data_type": "float64",
        "chunk_grid": { "name": "regular", "configuration": { "chunk_shape": chunks } },
        "chunk_key_encoding": { "name": "default", "configuration": { "separator": "/" } },
        "fill_value": 0.0,
        "codecs": codecs,
        "dimension_names": dims,
    })
}

fn put_f64(
    store: &Arc<FilesystemStore>,
    path: &str,
    (shape, chunks): (&[u64], &[u64]),
    dims: &[&str],
    data: &[f64],
    level: u32,
) -> ConvertResult<()> {
    let metadata = serde_json::from_value(float_array(shape, chunks, dims, level)).map_err(store_err)?;
    let array = Array::new_with_metadata(store.clone(), path, metadata).map_err(store_err)?;
    array.store_metadata().map_err(store_err)?;
    array
        .store_array_subset_elements::<f64>(&array.subset_all(), data)
        .map_err(store_err)?;
    Ok(())
}

fn get_f64(store: &Arc<FilesystemStore>, path: &str) -> ConvertResult<(Vec<u64>, Vec<f64>)> {
    let array = Array::open(store.clone(), path).map_err(store_err)?;
    let data = array
        .retrieve_array_subset_elements::<f64>(&array.subset_all())
        .map_err(store_err)?;
    Ok((array.shape().to_vec(), data))
}

fn write_store(dir: &Path, c: &StoredContainer, opts: &WriteOptions) -> ConvertResult<()> {
    let level = opts.compression_level.min(9);
    let store = open_store(dir)?;

    GroupBuilder::new()
        .attributes(c.metadata.clone())
        .build(store.clone(), "/")
        .map_err(store_err)?
        .store_metadata()
        .map_err(store_err)?;

    let n = c.time.len() as u64;
    put_f64(&store, "/time", (&[n], &[n.max(1)]), &["time"], &c.time, level)?;

    let (rows, cols) = c.signals.dim();
    let (rows, cols) = (rows as u64, cols as u64);
    let (crow, ccol) = opts.chunks.unwrap_or((0, 0));
    // 0 means the full extent; zarr chunks are never empty.
    let pick = |want: usize, full: u64| match want as u64 {
        0 => full.max(1),
        w => w.min(full.max(1)),
    };
    let signals: Vec<f64> = c.signals.iter().copied().collect();
    put_f64(
        &store,
        "/signals",
        (&[rows, cols], &[pick(crow, rows), pick(ccol, cols)]),
        &["channel", "time"],
        &signals,
        level,
    )?;

    if !c.annotations.is_empty() {
        let mut attrs = Map::new();
        attrs.insert("entries".into(), json!(c.annotations));
        GroupBuilder::new()
            .attributes(attrs)
            .build(store.clone(), ANNOTATIONS)
            .map_err(store_err)?
            .store_metadata()
            .map_err(store_err)?;
    }
    Ok(())
}

fn read_store(dir: &Path) -> ConvertResult<StoredContainer> {
    let store = open_store(dir)?;
    let metadata = Group::open(store.clone(), "/")
        .map_err(store_err)?
        .attributes()
        .clone();

    let (_, time) = get_f64(&store, "/time")?;
    let (shape, data) = get_f64(&store, "/signals")?;
    let signals = match shape.as_slice() {
        [r, n] => Array2::from_shape_vec((*r as usize, *n as usize), data),
        [n] => Array2::from_shape_vec((1, *n as usize), data),
        _ => return Err(ConvertError::write("signals: unsupported rank")),
    }
    .map_err(ConvertError::write)?;

    let annotations = match Group::open(store.clone(), ANNOTATIONS) {
        Ok(group) => group
            .attributes()
            .get("entries")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    };

    Ok(StoredContainer {
        time,
        signals,
        annotations,
        metadata,
    })
}

pub fn write_dir(target: &Path, c: &StoredContainer, opts: &WriteOptions) -> ConvertResult<()> {
    persist_dir(target, |dir| write_store(dir, c, opts))
}

pub fn write_tar(target: &Path, c: &StoredContainer, opts: &WriteOptions) -> ConvertResult<()> {
    let staging = tempfile::tempdir()?;
    write_store(staging.path(), c, opts)?;
    persist_file(target, |file| {
        let mut tar = tar::Builder::new(file);
        for entry in WalkDir::new(staging.path()).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(store_err)?;
            let rel = entry.path().strip_prefix(staging.path()).map_err(store_err)?;
            if entry.file_type().is_dir() {
                tar.append_dir(rel, entry.path())?;
            } else {
                tar.append_path_with_name(entry.path(), rel)?;
            }
        }
        tar.finish()?;
        Ok(())
    })
}

pub fn read_dir(path: &Path) -> ConvertResult<StoredContainer> {
    read_store(path)
}

pub fn read_tar(path: &Path) -> ConvertResult<StoredContainer> {
    let staging = tempfile::tempdir()?;
    tar::Archive::new(std::fs::File::open(path)?).unpack(staging.path())?;
    read_store(staging.path())
}

/// Merge `attrs` into the root attributes of an existing store directory.
/// Handles v2 (`.zattrs`) and v3 (`zarr.json` "attributes") layouts.
pub fn update_root_attributes(store: &Path, attrs: &Map<String, Value>) -> ConvertResult<()> {
    let v3 = store.join("zarr.json");
    if v3.is_file() {
        let mut doc: Value =
            serde_json::from_slice(&std::fs::read(&v3)?).map_err(ConvertError::write)?;
        let root = doc
            .as_object_mut()
            .ok_or_else(|| ConvertError::write("zarr.json is not an object"))?;
        let slot = root
            .entry("attributes")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(existing) = slot {
            existing.extend(attrs.clone());
        } else {
            *slot = Value::Object(attrs.clone());
        }
        std::fs::write(&v3, json_bytes(&doc)?)?;
        return Ok(());
    }

    let v2 = store.join(".zattrs");
    let mut existing: Map<String, Value> = if v2.is_file() {
        serde_json::from_slice(&std::fs::read(&v2)?).map_err(ConvertError::write)?
    } else {
        Map::new()
    };
    existing.extend(attrs.clone());
    std::fs::write(&v2, json_bytes(&existing)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ContainerKind;

    fn container() -> StoredContainer {
        let mut metadata = Map::new();
        metadata.insert("sampling_frequency".into(), json!(100.0));
        StoredContainer {
            time: (0..15).map(|k| f64::from(k) / 100.0).collect(),
            signals: Array2::from_shape_fn((3, 15), |(c, k)| (c * 15 + k) as f64),
            annotations: vec!["{\"label\":\"µ-stim\"}".to_string()],
            metadata,
        }
    }

    fn node(dir: &Path, rel: &str) -> Value {
        serde_json::from_slice(&std::fs::read(dir.join(rel)).unwrap()).unwrap()
    }

    #[test]
    fn edge_chunks_survive_a_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let opts = WriteOptions {
            chunks: Some((2, 4)),
            ..WriteOptions::new(ContainerKind::Zarr)
        };
        let c = container();
        write_store(dir.path(), &c, &opts).unwrap();

        let signals = node(dir.path(), "signals/zarr.json");
        assert_eq!(signals["shape"], json!([3, 15]));
        assert_eq!(signals["chunk_grid"]["configuration"]["chunk_shape"], json!([2, 4]));
        assert!(signals["codecs"]
            .as_array()
            .unwrap()
            .iter()
            .any(|codec| codec["name"] == json!("gzip")));
        assert_eq!(node(dir.path(), "zarr.json")["attributes"]["sampling_frequency"], json!(100.0));

        assert_eq!(read_store(dir.path()).unwrap(), c);
    }

    #[test]
    fn level_zero_stores_without_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let opts = WriteOptions {
            compression_level: 0,
            ..WriteOptions::new(ContainerKind::Zarr)
        };
        write_store(dir.path(), &container(), &opts).unwrap();
        let time = node(dir.path(), "time/zarr.json");
        assert!(!time["codecs"]
            .as_array()
            .unwrap()
            .iter()
            .any(|codec| codec["name"] == json!("gzip")));
    }

    #[test]
    fn annotations_group_is_skipped_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = container();
        c.annotations.clear();
        write_store(dir.path(), &c, &WriteOptions::new(ContainerKind::Zarr)).unwrap();
        assert!(!dir.path().join("annotations").exists());
        assert!(read_store(dir.path()).unwrap().annotations.is_empty());
    }
}
