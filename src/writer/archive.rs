use super::{npy, persist_file, StoredContainer};
use crate::error::{ConvertError, ConvertResult};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use ndarray::Array2;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

pub const TIME_ENTRY: &str = "time.npy";
pub const SIGNALS_ENTRY: &str = "signals.npy";
pub const ANNOTATIONS_ENTRY: &str = "annotations.json";
pub const METADATA_ENTRY: &str = "metadata.json";

fn append<W: std::io::Write>(tar: &mut tar::Builder<W>, name: &str, bytes: &[u8]) -> ConvertResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    tar.append_data(&mut header, name, bytes)?;
    Ok(())
}

pub fn write(target: &Path, c: &StoredContainer, level: u32) -> ConvertResult<()> {
    let compression = Compression::new(level.min(9));
    let signals: Vec<f64> = c.signals.iter().copied().collect();
    let time = npy::encode(&[c.time.len()], &c.time);
    let signals = npy::encode(&[c.signals.nrows(), c.signals.ncols()], &signals);
    let annotations = serde_json::to_vec(&c.annotations).map_err(ConvertError::write)?;
    let metadata = serde_json::to_vec_pretty(&c.metadata).map_err(ConvertError::write)?;

    persist_file(target, |file| {
        let gz = GzEncoder::new(file, compression);
        let mut tar = tar::Builder::new(gz);
        append(&mut tar, TIME_ENTRY, &time)?;
        append(&mut tar, SIGNALS_ENTRY, &signals)?;
        append(&mut tar, ANNOTATIONS_ENTRY, &annotations)?;
        append(&mut tar, METADATA_ENTRY, &metadata)?;
        tar.into_inner()?.finish()?;
        Ok(())
    })
}

pub fn read(path: &Path) -> ConvertResult<StoredContainer> {
    let file = std::fs::File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut entries = BTreeMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        entries.insert(name, buf);
    }

    let take = |name: &str| {
        entries
            .get(name)
            .ok_or_else(|| ConvertError::write(format!("{}: missing entry {name}", path.display())))
    };

    let (_, time) = npy::decode(take(TIME_ENTRY)?).map_err(ConvertError::write)?;
    let (shape, data) = npy::decode(take(SIGNALS_ENTRY)?).map_err(ConvertError::write)?;
    let signals = match shape.as_slice() {
        [rows, cols] => Array2::from_shape_vec((*rows, *cols), data).map_err(ConvertError::write)?,
        other => return Err(ConvertError::write(format!("signals has shape {other:?}"))),
    };
    let annotations: Vec<String> =
        serde_json::from_slice(take(ANNOTATIONS_ENTRY)?).map_err(ConvertError::write)?;
    let metadata: Map<String, Value> =
        serde_json::from_slice(take(METADATA_ENTRY)?).map_err(ConvertError::write)?;

    Ok(StoredContainer {
        time,
        signals,
        annotations,
        metadata,
    })
}
