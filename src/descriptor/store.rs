use super::types::{normalize_extension, Descriptor};
use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    descriptors: Vec<Descriptor>,
}

impl DescriptorStore {
    pub fn new(descriptors: Vec<Descriptor>) -> Self {
        Self { descriptors }
    }

    /// Load every `*.toml` file in `dir`, sorted by file name. Files that fail
    /// to load are skipped with a warning.
    pub fn load_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| anyhow::anyhow!("reading descriptors dir {}: {e}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect();
        files.sort();

        let mut descriptors = Vec::new();
        for file in &files {
            match load_file(file) {
                Ok(d) => {
                    debug!("loaded descriptor {} from {}", d.id, file.display());
                    descriptors.push(d);
                }
                Err(err) => warn!("skipping descriptor: {err}"),
            }
        }

        info!(
            "loaded {} descriptor(s) from {}",
            descriptors.len(),
            dir.display()
        );
        Ok(Self { descriptors })
    }

    pub fn all(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn by_collection_key(&self, key: u64) -> Vec<&Descriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.collection_key == Some(key))
            .collect()
    }

    pub fn by_extension(&self, ext: &str) -> Vec<&Descriptor> {
        let ext = normalize_extension(ext);
        self.descriptors
            .iter()
            .filter(|d| d.matches_extension(&ext))
            .collect()
    }
}

pub fn load_file(path: &Path) -> Result<Descriptor, ConvertError> {
    let fail = |reason: String| ConvertError::DescriptorLoad {
        path: path.to_path_buf(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let descriptor = parse(&raw).map_err(fail)?;
    Ok(descriptor)
}

pub fn parse(raw: &str) -> Result<Descriptor, String> {
    let d: Descriptor = toml::from_str(raw).map_err(|e| format!("parsing TOML: {e}"))?;
    validate(&d)?;
    Ok(d)
}

fn validate(d: &Descriptor) -> Result<(), String> {
    if d.id.trim().is_empty() {
        return Err("missing id".into());
    }
    if d.format.is_empty() {
        return Err(format!("{}: missing format tag", d.id));
    }
    if d.parser.reader.trim().is_empty() {
        return Err(format!("{}: parser has no reader", d.id));
    }
    if d.parser.invocation().is_none() {
        return Err(format!(
            "{}: parser must declare exactly one of `function` or `load_method`",
            d.id
        ));
    }
    Ok(())
}
