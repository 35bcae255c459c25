//! HDF5 container (`storage_hdf5` feature). Every metadata key becomes one
//! JSON-encoded string attribute on the root group.

#[cfg(feature = "storage_hdf5")]
mod enabled {
    use super::super::{persist_file, StoredContainer};
    use crate::error::{ConvertError, ConvertResult};
    use ::hdf5::types::VarLenUnicode;
    use ndarray::Array2;
    use serde_json::{Map, Value};
    use std::path::Path;

    fn h5err(e: ::hdf5::Error) -> ConvertError {
        ConvertError::write(format!("hdf5: {e}"))
    }

    fn unicode(s: &str) -> ConvertResult<VarLenUnicode> {
        s.parse::<VarLenUnicode>()
            .map_err(|e| ConvertError::write(format!("hdf5 string: {e}")))
    }

    fn write_file(path: &Path, c: &StoredContainer) -> ConvertResult<()> {
        let file = ::hdf5::File::create(path).map_err(h5err)?;

        let time = file
            .new_dataset::<f64>()
            .shape([c.time.len()])
            .create("time")
            .map_err(h5err)?;
        if !c.time.is_empty() {
            time.write_raw(&c.time).map_err(h5err)?;
        }

        let (rows, cols) = c.signals.dim();
        let signals = file
            .new_dataset::<f64>()
            .shape([rows, cols])
            .create("signals")
            .map_err(h5err)?;
        if rows * cols > 0 {
            let flat: Vec<f64> = c.signals.iter().copied().collect();
            signals.write_raw(&flat).map_err(h5err)?;
        }

        let notes = c
            .annotations
            .iter()
            .map(|s| unicode(s))
            .collect::<ConvertResult<Vec<_>>>()?;
        let ann = file
            .new_dataset::<VarLenUnicode>()
            .shape([notes.len()])
            .create("annotations")
            .map_err(h5err)?;
        if !notes.is_empty() {
            ann.write_raw(&notes).map_err(h5err)?;
        }

        for (key, value) in &c.metadata {
            let encoded = serde_json::to_string(value).map_err(ConvertError::write)?;
            file.new_attr::<VarLenUnicode>()
                .create(key.as_str())
                .map_err(h5err)?
                .write_scalar(&unicode(&encoded)?)
                .map_err(h5err)?;
        }
        file.flush().map_err(h5err)?;
        Ok(())
    }

    pub fn write(target: &Path, c: &StoredContainer) -> ConvertResult<()> {
        // HDF5 writes by path: stage next to the target, then
        // persist_file moves the finished file into place.
        let staging = tempfile::Builder::new()
            .prefix(".h5-staging.")
            .tempdir_in(target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new(".")))?;
        let built = staging.path().join("container.h5");
        write_file(&built, c)?;
        persist_file(target, |out| {
            let mut src = std::fs::File::open(&built)?;
            std::io::copy(&mut src, out)?;
            Ok(())
        })
    }

    pub fn read(path: &Path) -> ConvertResult<StoredContainer> {
        let file = ::hdf5::File::open(path).map_err(h5err)?;

        let time = file
            .dataset("time")
            .and_then(|d| d.read_raw::<f64>())
            .map_err(h5err)?;

        let ds = file.dataset("signals").map_err(h5err)?;
        let shape = ds.shape();
        let data = ds.read_raw::<f64>().map_err(h5err)?;
        let signals = match shape.as_slice() {
            [r, n] => Array2::from_shape_vec((*r, *n), data).map_err(ConvertError::write)?,
            other => return Err(ConvertError::write(format!("signals has shape {other:?}"))),
        };

        let annotations = match file.dataset("annotations") {
            Ok(d) => d
                .read_raw::<VarLenUnicode>()
                .map_err(h5err)?
                .into_iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };

        let mut metadata = Map::new();
        for name in file.attr_names().map_err(h5err)? {
            let raw = file
                .attr(&name)
                .and_then(|a| a.read_scalar::<VarLenUnicode>())
                .map_err(h5err)?;
            let value = serde_json::from_str(raw.as_str())
                .unwrap_or_else(|_| Value::String(raw.as_str().to_string()));
            metadata.insert(name, value);
        }

        Ok(StoredContainer {
            time,
            signals,
            annotations,
            metadata,
        })
    }
}

#[cfg(feature = "storage_hdf5")]
pub use enabled::{read, write};

#[cfg(not(feature = "storage_hdf5"))]
use super::StoredContainer;
#[cfg(not(feature = "storage_hdf5"))]
use crate::error::{ConvertError, ConvertResult};
#[cfg(not(feature = "storage_hdf5"))]
use std::path::Path;

#[cfg(not(feature = "storage_hdf5"))]
pub fn write(_target: &Path, _c: &StoredContainer) -> ConvertResult<()> {
    Err(ConvertError::FeatureNotEnabled("storage_hdf5".to_string()))
}

#[cfg(not(feature = "storage_hdf5"))]
pub fn read(_path: &Path) -> ConvertResult<StoredContainer> {
    Err(ConvertError::FeatureNotEnabled("storage_hdf5".to_string()))
}
