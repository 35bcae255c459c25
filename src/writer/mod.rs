pub mod archive;
pub mod hdf5;
pub mod meta;
pub mod npy;
pub mod zarr;

use crate::{
    config::Config,
    descriptor::Descriptor,
    error::{ConvertError, ConvertResult},
    model::{Annotation, CanonicalResult},
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    #[serde(rename = "archive")]
    Archive,
    #[serde(rename = "zarr")]
    Zarr,
    #[serde(rename = "zarr.tar")]
    ZarrTar,
    #[serde(rename = "hdf5")]
    Hdf5,
}

impl ContainerKind {
    pub const ALL: [ContainerKind; 4] = [
        ContainerKind::Archive,
        ContainerKind::Zarr,
        ContainerKind::ZarrTar,
        ContainerKind::Hdf5,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerKind::Archive => "archive",
            ContainerKind::Zarr => "zarr",
            ContainerKind::ZarrTar => "zarr.tar",
            ContainerKind::Hdf5 => "hdf5",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            ContainerKind::Archive => ".arrays.tar.gz",
            ContainerKind::Zarr => ".zarr",
            ContainerKind::ZarrTar => ".zarr.tar",
            ContainerKind::Hdf5 => ".h5",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        // Longest suffix first: ".zarr.tar" must win over ".zarr".
        [
            ContainerKind::Archive,
            ContainerKind::ZarrTar,
            ContainerKind::Zarr,
            ContainerKind::Hdf5,
        ]
        .into_iter()
        .find(|k| name.ends_with(k.suffix()))
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerKind {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" => Ok(ContainerKind::Archive),
            "zarr" => Ok(ContainerKind::Zarr),
            "zarr.tar" => Ok(ContainerKind::ZarrTar),
            "hdf5" | "h5" => Ok(ContainerKind::Hdf5),
            "npz" => Err(ConvertError::write(
                "container kind 'npz' is not written; 'archive' is a tar.gz of .npy files",
            )),
            "zarr.zip" => Err(ConvertError::write(
                "container kind 'zarr.zip' is not written; 'zarr.tar' is a tar of the store",
            )),
            other => Err(ConvertError::write(format!(
                "unsupported container kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub kind: ContainerKind,
    /// (channels, samples) chunk shape for `signals`; 0 means the full extent.
    pub chunks: Option<(usize, usize)>,
    /// 0 = no compression, 1-9 gzip level.
    pub compression_level: u32,
}

impl WriteOptions {
    pub fn new(kind: ContainerKind) -> Self {
        Self {
            kind,
            chunks: None,
            compression_level: 5,
        }
    }

    pub fn from_config(cfg: &Config) -> ConvertResult<Self> {
        let out = &cfg.output;
        let chunks = (out.chunk_channels > 0 || out.chunk_samples > 0)
            .then_some((out.chunk_channels, out.chunk_samples));
        Ok(Self {
            kind: out.container.parse()?,
            chunks,
            compression_level: out.compression_level.min(9),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredContainer {
    pub time: Vec<f64>,
    pub signals: Array2<f64>,
    pub annotations: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl StoredContainer {
    pub fn sampling_frequency(&self) -> Option<f64> {
        self.metadata.get("sampling_frequency").and_then(Value::as_f64)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.string_list("channel_names")
    }

    pub fn channel_units(&self) -> Vec<String> {
        self.string_list("channel_units")
    }

    fn string_list(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn parsed_annotations(&self) -> Vec<Annotation> {
        self.annotations
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect()
    }

    pub fn summary(&self) -> Value {
        serde_json::json!({
            "channels": self.signals.nrows(),
            "samples": self.signals.ncols(),
            "time_len": self.time.len(),
            "annotations": self.annotations.len(),
            "sampling_frequency": self.sampling_frequency(),
            "channel_names": self.channel_names(),
            "metadata_keys": self.metadata.keys().collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub result: &'a CanonicalResult,
    pub descriptor: &'a Descriptor,
    pub original_filename: &'a str,
    pub annotations: Option<&'a [Annotation]>,
    pub overrides: Option<&'a Map<String, Value>>,
}

impl<'a> WriteRequest<'a> {
    pub fn new(result: &'a CanonicalResult, descriptor: &'a Descriptor, original_filename: &'a str) -> Self {
        Self {
            result,
            descriptor,
            original_filename,
            annotations: None,
            overrides: None,
        }
    }

    fn to_container(&self) -> ConvertResult<StoredContainer> {
        let r = self.result;
        let signals = r.signals.clone().unwrap_or_else(|| Array2::zeros((0, 0)));
        let time = r.time.clone().unwrap_or_default();

        let annotations = self
            .annotations
            .or(r.annotations.as_deref())
            .unwrap_or_default()
            .iter()
            .map(|a| serde_json::to_string(a).map_err(ConvertError::write))
            .collect::<ConvertResult<Vec<_>>>()?;

        Ok(StoredContainer {
            time,
            signals,
            annotations,
            metadata: meta::merged_metadata(
                r,
                self.descriptor,
                self.original_filename,
                self.overrides,
            ),
        })
    }
}

pub struct StandardizedWriter {
    options: WriteOptions,
}

impl StandardizedWriter {
    pub fn new(options: WriteOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    pub fn output_path(&self, base: &Path) -> PathBuf {
        output_path(base, self.options.kind)
    }

    /// Write atomically; an existing container at the target is replaced
    /// only once the new one is complete.
    pub fn write(&self, base: &Path, req: &WriteRequest<'_>) -> ConvertResult<PathBuf> {
        let target = self.output_path(base);
        let container = req.to_container()?;
        debug!(
            "writing {} container channels={} samples={} -> {}",
            self.options.kind,
            container.signals.nrows(),
            container.signals.ncols(),
            target.display()
        );

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        match self.options.kind {
            ContainerKind::Archive => archive::write(&target, &container, self.options.compression_level)?,
            ContainerKind::Zarr => zarr::write_dir(&target, &container, &self.options)?,
            ContainerKind::ZarrTar => zarr::write_tar(&target, &container, &self.options)?,
            ContainerKind::Hdf5 => hdf5::write(&target, &container)?,
        }

        info!("wrote {}", target.display());
        Ok(target)
    }
}

pub fn output_path(base: &Path, kind: ContainerKind) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(kind.suffix());
    PathBuf::from(s)
}

pub fn read_container(path: &Path) -> ConvertResult<StoredContainer> {
    let kind = ContainerKind::from_path(path).ok_or_else(|| {
        ConvertError::write(format!("cannot infer container kind of {}", path.display()))
    })?;
    if !path.exists() {
        return Err(ConvertError::write(format!("{} does not exist", path.display())));
    }
    match kind {
        ContainerKind::Archive => archive::read(path),
        ContainerKind::Zarr => zarr::read_dir(path),
        ContainerKind::ZarrTar => zarr::read_tar(path),
        ContainerKind::Hdf5 => hdf5::read(path),
    }
}

fn parent_dir(target: &Path) -> &Path {
    target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn temp_prefix(target: &Path) -> String {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.")
}

// Moves an existing `target` aside before `install` runs; the old copy is
// removed on success and moved back on failure.
fn replace_with<F>(target: &Path, install: F) -> ConvertResult<()>
where
    F: FnOnce() -> ConvertResult<()>,
{
    if std::fs::symlink_metadata(target).is_err() {
        return install();
    }
    let aside = tempfile::Builder::new()
        .prefix(&temp_prefix(target))
        .suffix(".old")
        .tempdir_in(parent_dir(target))?;
    let previous = aside.path().join("previous");
    std::fs::rename(target, &previous)?;

    install().inspect_err(|_| {
        if let Err(e) = std::fs::rename(&previous, target) {
            warn!("could not restore {}: {e}", target.display());
        }
    })
}

pub(crate) fn persist_file<F>(target: &Path, fill: F) -> ConvertResult<()>
where
    F: FnOnce(&mut std::fs::File) -> ConvertResult<()>,
{
    let mut tmp = tempfile::Builder::new()
        .prefix(&temp_prefix(target))
        .suffix(".tmp")
        .tempfile_in(parent_dir(target))?;
    fill(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    let install = move || {
        tmp.persist(target)
            .map(drop)
            .map_err(|e| ConvertError::write(format!("persist {}: {}", target.display(), e.error)))
    };
    // A plain file is swapped by the rename itself.
    if target.is_dir() { replace_with(target, install) } else { install() }
}

pub(crate) fn persist_dir<F>(target: &Path, fill: F) -> ConvertResult<()>
where
    F: FnOnce(&Path) -> ConvertResult<()>,
{
    let tmp = tempfile::Builder::new()
        .prefix(&temp_prefix(target))
        .suffix(".tmp")
        .tempdir_in(parent_dir(target))?;
    fill(tmp.path())?;
    replace_with(target, || {
        std::fs::rename(tmp.path(), target)?;
        Ok(())
    })
}
