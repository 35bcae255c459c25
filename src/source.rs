use crate::{
    config::Config,
    error::{ConvertError, ConvertResult},
};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const PRIMARY_FILES_PREFIX: &str = "files/primary/";

pub const INVALID_TYPE: &str = "<invalid type>";

pub trait Source {
    fn collection_metadata(&self, collection_id: &str) -> Result<Value>;

    /// Download `relative_path` (already primary-prefixed) into `dest_dir`.
    /// The file usually lands at `dest_dir/<file name>`, but callers must not
    /// rely on it.
    fn fetch(&self, collection_id: &str, relative_path: &str, dest_dir: &Path) -> Result<()>;

    fn list_primary_files(&self, collection_id: &str) -> Result<Vec<String>> {
        let meta = self.collection_metadata(collection_id)?;
        Ok(primary_files(&meta))
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        bail!("this source cannot enumerate collections")
    }

    fn collections_by_type(&self, ids: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for id in ids {
            match self.collection_metadata(id) {
                Ok(meta) => groups
                    .entry(collection_type(&meta).to_string())
                    .or_default()
                    .push(id.clone()),
                Err(e) => warn!("collection {id}: skipped: {e:#}"),
            }
        }
        groups
    }
}

pub fn collection_type(metadata: &Value) -> &str {
    ["/item/types/0/name", "/_source/item/types/0/name"]
        .into_iter()
        .find_map(|ptr| metadata.pointer(ptr).and_then(Value::as_str))
        .unwrap_or(INVALID_TYPE)
}

pub fn sort_collection_ids(ids: &mut [String]) {
    ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
}

pub fn primary_files(metadata: &Value) -> Vec<String> {
    metadata
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(|f| f.get("path").and_then(Value::as_str))
                .filter(|p| p.starts_with(PRIMARY_FILES_PREFIX))
                .map(|p| p.trim_start_matches("files/").to_string())
                .collect()
        })
        .unwrap_or_default()
}

pub fn with_primary_prefix(relative_path: &str, prefix: &str) -> String {
    let rel = relative_path.trim_start_matches('/');
    if prefix.is_empty() || rel.starts_with(prefix) {
        rel.to_string()
    } else {
        format!("{prefix}{rel}")
    }
}

fn fill_template(template: &str, collection_id: &str, path: &str) -> String {
    template
        .replace("{collection}", collection_id)
        .replace("{path}", path)
}

fn file_name(relative_path: &str) -> Result<&str> {
    relative_path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("no file name in '{relative_path}'"))
}

pub struct MirrorSource {
    root: PathBuf,
}

impl MirrorSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Source for MirrorSource {
    fn collection_metadata(&self, collection_id: &str) -> Result<Value> {
        let path = self.root.join(collection_id).join("metadata.json");
        let raw = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    fn fetch(&self, collection_id: &str, relative_path: &str, dest_dir: &Path) -> Result<()> {
        let src = self.root.join(collection_id).join("files").join(relative_path);
        if !src.is_file() {
            bail!("no matching file for files/{relative_path}");
        }
        let dest = dest_dir.join(file_name(relative_path)?);
        std::fs::copy(&src, &dest)
            .with_context(|| format!("copy {} -> {}", src.display(), dest.display()))?;
        Ok(())
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.path().join("metadata.json").is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        sort_collection_ids(&mut ids);
        Ok(ids)
    }
}

pub struct HttpSource {
    client: reqwest::blocking::Client,
    metadata_url: String,
    file_url: String,
    collections_url: String,
}

impl HttpSource {
    pub fn new(metadata_url: &str, file_url: &str, timeout_secs: u64) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder();
        if timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }
        let client = builder.build().context("building HTTP client")?;
        Ok(Self {
            client,
            metadata_url: metadata_url.to_string(),
            file_url: file_url.to_string(),
            collections_url: String::new(),
        })
    }

    pub fn with_collections_url(mut self, url: &str) -> Self {
        self.collections_url = url.to_string();
        self
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        debug!("GET {url}");
        let resp = self.client.get(url).send().with_context(|| format!("GET {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("GET {url}: HTTP {}", status.as_u16());
        }
        Ok(resp)
    }
}

impl Source for HttpSource {
    fn collection_metadata(&self, collection_id: &str) -> Result<Value> {
        let url = fill_template(&self.metadata_url, collection_id, "");
        self.get(&url)?
            .json::<Value>()
            .with_context(|| format!("decoding metadata from {url}"))
    }

    fn fetch(&self, collection_id: &str, relative_path: &str, dest_dir: &Path) -> Result<()> {
        let url = fill_template(&self.file_url, collection_id, &format!("files/{relative_path}"));
        let mut resp = self.get(&url)?;
        let dest = dest_dir.join(file_name(relative_path)?);
        let mut out = std::fs::File::create(&dest)
            .with_context(|| format!("create {}", dest.display()))?;
        resp.copy_to(&mut out)
            .with_context(|| format!("download {url}"))?;
        Ok(())
    }

    // The endpoint answers with a JSON array of ids (strings or numbers).
    fn list_collections(&self) -> Result<Vec<String>> {
        if self.collections_url.is_empty() {
            bail!("source.collections_url is not set");
        }
        let url = &self.collections_url;
        let listing: Vec<Value> = self
            .get(url)?
            .json()
            .with_context(|| format!("decoding collection list from {url}"))?;
        let mut ids: Vec<String> = listing
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();
        sort_collection_ids(&mut ids);
        Ok(ids)
    }
}

pub fn from_config(cfg: &Config) -> Result<Box<dyn Source>> {
    match cfg.source.kind.as_str() {
        "mirror" => Ok(Box::new(MirrorSource::new(&cfg.source.mirror_root))),
        "http" => Ok(Box::new(
            HttpSource::new(
                &cfg.source.metadata_url,
                &cfg.source.file_url,
                cfg.source.timeout_seconds,
            )?
            .with_collections_url(&cfg.source.collections_url),
        )),
        other => bail!("unknown source.kind: {other}"),
    }
}

pub struct Session<'a> {
    source: &'a dyn Source,
    collection_id: String,
    primary_prefix: String,
    metadata: Option<Value>,
    fetches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub fetches: usize,
}

impl<'a> Session<'a> {
    /// Opens the session and fetches the collection metadata. A metadata
    /// failure is logged and leaves the session usable.
    pub fn open(source: &'a dyn Source, collection_id: &str, primary_prefix: &str) -> Self {
        let metadata = match source.collection_metadata(collection_id) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("collection {collection_id}: metadata unavailable: {e:#}");
                None
            }
        };
        info!("session open collection={collection_id}");
        Self {
            source,
            collection_id: collection_id.to_string(),
            primary_prefix: primary_prefix.to_string(),
            metadata,
            fetches: 0,
        }
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    pub fn collection_key(&self) -> Option<u64> {
        self.collection_id.trim().parse().ok()
    }

    pub fn primary_files(&self) -> ConvertResult<Vec<String>> {
        let files = match &self.metadata {
            Some(m) => primary_files(m),
            None => self
                .source
                .list_primary_files(&self.collection_id)
                .map_err(|e| ConvertError::Acquisition(format!("{e:#}")))?,
        };
        if files.is_empty() {
            return Err(ConvertError::Acquisition(format!(
                "no primary files to process in collection {}",
                self.collection_id
            )));
        }
        Ok(files)
    }

    pub fn acquire(&mut self, relative_path: &str, workspace: &Path) -> ConvertResult<PathBuf> {
        let rel = with_primary_prefix(relative_path, &self.primary_prefix);
        self.fetches += 1;
        self.source
            .fetch(&self.collection_id, &rel, workspace)
            .map_err(|e| ConvertError::Acquisition(format!("{e:#}")))?;

        let name = file_name(&rel).map_err(|e| ConvertError::Acquisition(e.to_string()))?;
        let expected = workspace.join(name);
        if expected.is_file() {
            return Ok(expected);
        }

        debug!("{} not at expected location; searching workspace", name);
        walkdir::WalkDir::new(workspace)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == name)
            .map(|e| e.into_path())
            .ok_or_else(|| {
                ConvertError::Acquisition(format!(
                    "download failed: {name} not found in {}",
                    workspace.display()
                ))
            })
    }

    pub fn close(self) -> SessionStats {
        info!(
            "session closed collection={} fetches={}",
            self.collection_id, self.fetches
        );
        SessionStats {
            fetches: self.fetches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefix_is_added_once() {
        assert_eq!(with_primary_prefix("sub-1/a.csv", "primary/"), "primary/sub-1/a.csv");
        assert_eq!(with_primary_prefix("primary/a.csv", "primary/"), "primary/a.csv");
        assert_eq!(with_primary_prefix("/a.csv", ""), "a.csv");
    }

    #[test]
    fn primary_files_are_listed_without_files_prefix() {
        let meta = json!({
            "files": [
                {"path": "files/primary/sub-1/rec.csv"},
                {"path": "files/docs/readme.txt"},
                {"path": "files/primary/img.tif"},
                {"name": "no path"}
            ]
        });
        assert_eq!(
            primary_files(&meta),
            vec!["primary/sub-1/rec.csv".to_string(), "primary/img.tif".to_string()]
        );
    }

    fn mirror_collection(root: &Path, id: &str, metadata: Value) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("metadata.json"), metadata.to_string()).unwrap();
    }

    #[test]
    fn mirror_collections_are_grouped_by_type() {
        let root = tempfile::tempdir().unwrap();
        mirror_collection(root.path(), "10", json!({"item": {"types": []}}));
        mirror_collection(root.path(), "2", json!({"item": {"types": [{"name": "computational"}]}}));
        mirror_collection(root.path(), "1", json!({"item": {"types": [{"name": "experimental"}]}}));
        mirror_collection(root.path(), "9", json!({"item": {"types": [{"name": "experimental"}]}}));
        std::fs::create_dir(root.path().join("no-metadata")).unwrap();
        std::fs::write(root.path().join("stray.txt"), "x").unwrap();

        let source = MirrorSource::new(root.path());
        let ids = source.list_collections().unwrap();
        assert_eq!(ids, vec!["1", "2", "9", "10"]);

        let groups = source.collections_by_type(&ids);
        assert_eq!(groups["experimental"], vec!["1", "9"]);
        assert_eq!(groups["computational"], vec!["2"]);
        assert_eq!(groups[INVALID_TYPE], vec!["10"]);
    }

    #[test]
    fn unknown_collections_are_left_out_of_groups() {
        let root = tempfile::tempdir().unwrap();
        mirror_collection(root.path(), "1", json!({"item": {"types": [{"name": "device"}]}}));
        let source = MirrorSource::new(root.path());
        let groups = source.collections_by_type(&["1".to_string(), "404".to_string()]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["device"], vec!["1"]);
    }

    #[test]
    fn search_hits_carry_the_type_under_source() {
        let hit = json!({"_id": "7", "_source": {"item": {"types": [{"name": "scaffold"}]}}});
        assert_eq!(collection_type(&hit), "scaffold");
        assert_eq!(collection_type(&json!({"item": {"types": "bad"}})), INVALID_TYPE);
    }

    #[test]
    fn http_listing_needs_an_endpoint() {
        let source = HttpSource::new("http://127.0.0.1:9/{collection}", "http://127.0.0.1:9/{path}", 1).unwrap();
        let err = source.list_collections().unwrap_err();
        assert!(err.to_string().contains("collections_url"));
    }

    #[test]
    fn templates_fill_both_placeholders() {
        assert_eq!(
            fill_template("https://x/{collection}/f/{path}", "42", "files/primary/a.csv"),
            "https://x/42/f/files/primary/a.csv"
        );
    }
}
