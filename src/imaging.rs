use crate::{
    config::Config,
    error::{ConvertError, ConvertResult},
    process::{expand_tilde, run_capture},
    writer::zarr::update_root_attributes,
};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::info;

pub const IMAGING_DESCRIPTOR_ID: &str = "imaging-pipeline";

pub trait ImagingConverter {
    fn convert(&self, input: &Path, output_dir: &Path) -> ConvertResult<PathBuf>;
}

pub struct CommandImagingConverter {
    program: String,
    args: Vec<String>,
    store_suffix: String,
    timeout_seconds: u64,
}

impl CommandImagingConverter {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            program: cfg.imaging.program.clone(),
            args: cfg.imaging.args.clone(),
            store_suffix: cfg.imaging.store_suffix.clone(),
            timeout_seconds: cfg.imaging.timeout_seconds,
        }
    }

    pub fn store_path(&self, input: &Path, output_dir: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        output_dir.join(format!("{stem}{}", self.store_suffix))
    }

    pub fn command_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        self.args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

impl ImagingConverter for CommandImagingConverter {
    fn convert(&self, input: &Path, output_dir: &Path) -> ConvertResult<PathBuf> {
        let store = self.store_path(input, output_dir);
        let args = self.command_args(input, &store);
        let program = expand_tilde(&self.program).display().to_string();
        run_capture(&program, &args, Some(self.timeout_seconds))
            .map_err(|e| ConvertError::Imaging(format!("{e:#}")))?;
        if !store.exists() {
            return Err(ConvertError::Imaging(format!(
                "{program} finished but {} was not created",
                store.display()
            )));
        }
        info!("imaging store {}", store.display());
        Ok(store)
    }
}

pub fn attach_store_attributes(
    store: &Path,
    collection_id: &str,
    collection_metadata: Option<&Value>,
) -> ConvertResult<()> {
    let mut attrs = Map::new();
    attrs.insert(
        "collection_metadata".into(),
        collection_metadata.cloned().unwrap_or(Value::Null),
    );
    attrs.insert("collection_id".into(), Value::String(collection_id.to_string()));
    update_root_attributes(store, &attrs)
        .map_err(|e| ConvertError::Imaging(format!("attaching attributes to {}: {e}", store.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_template_is_filled() {
        let conv = CommandImagingConverter::from_config(&Config::default());
        let store = conv.store_path(Path::new("/w/slide.czi"), Path::new("/out"));
        assert_eq!(store, PathBuf::from("/out/slide.ome.zarr"));
        let args = conv.command_args(Path::new("/w/slide.czi"), &store);
        assert_eq!(&args[..4], &["-i", "/w/slide.czi", "-o", "/out/slide.ome.zarr"]);
    }

    #[test]
    fn attributes_merge_into_existing_zattrs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".zattrs"), r#"{"multiscales": []}"#).unwrap();
        let meta = serde_json::json!({"name": "demo"});
        attach_store_attributes(dir.path(), "42", Some(&meta)).unwrap();
        let back: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(".zattrs")).unwrap()).unwrap();
        assert_eq!(back["multiscales"], serde_json::json!([]));
        assert_eq!(back["collection_id"], serde_json::json!("42"));
        assert_eq!(back["collection_metadata"]["name"], serde_json::json!("demo"));
    }
}
