use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub readers: Readers,
    #[serde(default)]
    pub hashing: Hashing,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub imaging: Imaging,
    #[serde(default)]
    pub formats: Formats,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub overwrite: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            overwrite: false,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
    pub work_dir: String,
    pub descriptors_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "./output".into(),
            work_dir: "./.sigfuse/work".into(),
            descriptors_dir: "./descriptors".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    /// archive | zarr | zarr.tar | hdf5
    pub container: String,
    pub chunk_channels: usize,
    pub chunk_samples: usize,
    pub compression_level: u32,
    pub write_batch_report: bool,
    pub batch_report_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            container: "archive".into(),
            chunk_channels: 0,
            chunk_samples: 0,
            compression_level: 5,
            write_batch_report: true,
            batch_report_filename: "batch_report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Readers {
    pub command_timeout_seconds: u64,
}
impl Default for Readers {
    fn default() -> Self {
        Self {
            command_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hashing {
    pub record_source_checksum: bool,
    pub mode: String,
    pub fast_window_bytes: u64,
}
impl Default for Hashing {
    fn default() -> Self {
        Self {
            record_source_checksum: false,
            mode: "fast_2x16mb".into(),
            fast_window_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    pub kind: String,
    pub mirror_root: String,
    pub metadata_url: String,
    pub file_url: String,
    /// JSON array of collection ids; only used by `list` with the http kind.
    pub collections_url: String,
    pub timeout_seconds: u64,
    pub primary_prefix: String,
}
impl Default for Source {
    fn default() -> Self {
        Self {
            kind: "mirror".into(),
            mirror_root: "./mirror".into(),
            metadata_url: "https://api.pennsieve.io/discover/datasets/{collection}/versions/1/metadata"
                .into(),
            file_url: "https://api.pennsieve.io/discover/datasets/{collection}/versions/1/files/{path}"
                .into(),
            collections_url: String::new(),
            timeout_seconds: 120,
            primary_prefix: "primary/".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Imaging {
    pub program: String,
    /// `{input}` and `{output}` are substituted per file.
    pub args: Vec<String>,
    pub store_suffix: String,
    pub timeout_seconds: u64,
}
impl Default for Imaging {
    fn default() -> Self {
        Self {
            program: "ngff-zarr".into(),
            args: [
                "-i",
                "{input}",
                "-o",
                "{output}",
                "--ome-zarr-version",
                "0.4",
                "--method",
                "dask_image_gaussian",
                "--output-scale",
                "3",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            store_suffix: ".ome.zarr".into(),
            timeout_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Formats {
    pub imaging_exts: Vec<String>,
    pub timeseries_exts: Vec<String>,
}
impl Default for Formats {
    fn default() -> Self {
        let list = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            imaging_exts: list(&[
                ".tif", ".tiff", ".czi", ".nd2", ".lsm", ".jpx", ".svs", ".ims", ".png", ".jpg",
                ".jpeg", ".bmp", ".vsi", ".jp2", ".roi", ".dm3", ".pxp", ".ipf", ".lif", ".ima",
                ".mrxs", ".obj", ".avi", ".exf", ".cxd",
            ]),
            timeseries_exts: list(&[
                ".mat", ".smr", ".csv", ".tsv", ".json", ".adicht", ".hdf5", ".h5", ".ets",
                ".abf", ".rhd", ".nev", ".ns5", ".ns2", ".ns1", ".smrx", ".wav", ".acq", ".tbk",
                ".tdx", ".tev", ".tin", ".tnt", ".tsq", ".eeg", ".vmrk", ".vhdr", ".sev", ".sam",
                ".pss", ".psmethod",
            ]),
        }
    }
}

impl Formats {
    fn has(list: &[String], ext: &str) -> bool {
        let ext = crate::descriptor::types::normalize_extension(ext);
        list.iter()
            .any(|e| crate::descriptor::types::normalize_extension(e) == ext)
    }

    pub fn is_imaging(&self, ext: &str) -> bool {
        Self::has(&self.imaging_exts, ext)
    }

    pub fn is_supported(&self, ext: &str) -> bool {
        !ext.trim_start_matches('.').is_empty()
            && (self.is_imaging(ext) || Self::has(&self.timeseries_exts, ext))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub dump_effective_config: bool,
}
