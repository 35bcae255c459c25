//! BatchOrchestrator: one file at a time, each in its own scratch workspace,
//! one record per input no matter what happens to it.

use crate::{
    config::Config,
    descriptor::DescriptorStore,
    error::{ConvertError, ConvertResult},
    imaging::{attach_store_attributes, ImagingConverter, IMAGING_DESCRIPTOR_ID},
    reader::{ReaderInvoker, ReaderRegistry},
    report::{BatchRecord, BatchReport, BatchStatus, BatchSummary},
    select::MappingSelector,
    source::{Session, SessionStats, Source},
    util::{ensure_dir, hash_file, now_rfc3339},
    writer::{StandardizedWriter, WriteRequest},
};
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

pub struct BatchOrchestrator<'a> {
    cfg: &'a Config,
    store: &'a DescriptorStore,
    readers: &'a ReaderRegistry,
    imaging: &'a dyn ImagingConverter,
    writer: StandardizedWriter,
    out_dir: PathBuf,
    work_dir: PathBuf,
    overwrite: bool,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub collection_id: String,
    pub started: String,
    pub finished: String,
    pub records: Vec<BatchRecord>,
    pub session: SessionStats,
}

impl BatchOutcome {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_records(&self.records)
    }
}

fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        cfg: &'a Config,
        store: &'a DescriptorStore,
        readers: &'a ReaderRegistry,
        imaging: &'a dyn ImagingConverter,
        writer: StandardizedWriter,
    ) -> Self {
        Self {
            cfg,
            store,
            readers,
            imaging,
            writer,
            out_dir: PathBuf::from(&cfg.paths.out_dir),
            work_dir: PathBuf::from(&cfg.paths.work_dir),
            overwrite: cfg.global.overwrite,
        }
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn run_collection(
        &self,
        source: &dyn Source,
        collection_id: &str,
        paths: Option<Vec<String>>,
    ) -> ConvertResult<BatchOutcome> {
        let started = now_rfc3339();
        let mut session = Session::open(source, collection_id, &self.cfg.source.primary_prefix);

        let paths = match paths {
            Some(p) if !p.is_empty() => p,
            _ => match session.primary_files() {
                Ok(p) => p,
                Err(e) => {
                    session.close();
                    return Err(e);
                }
            },
        };

        let records = self.run(&mut session, &paths);
        let stats = session.close();
        Ok(BatchOutcome {
            collection_id: collection_id.to_string(),
            started,
            finished: now_rfc3339(),
            records,
            session: stats,
        })
    }

    pub fn run(&self, session: &mut Session<'_>, paths: &[String]) -> Vec<BatchRecord> {
        info!("batch start files={} out={}", paths.len(), self.out_dir.display());
        let records: Vec<BatchRecord> = paths
            .iter()
            .enumerate()
            .map(|(i, rel)| {
                let span = info_span!("file", index = i, rel = %rel);
                let _enter = span.enter();
                self.process_one(session, rel)
            })
            .collect();
        let s = BatchSummary::from_records(&records);
        info!(
            "batch done ok={} failed={} unsupported={}",
            s.ok, s.failed, s.unsupported
        );
        records
    }

    fn process_one(&self, session: &mut Session<'_>, rel: &str) -> BatchRecord {
        let started = Instant::now();
        let mut rec = BatchRecord::pending(rel);

        let ext = extension_of(rel);
        if !self.cfg.formats.is_supported(&ext) {
            rec.status = BatchStatus::Unsupported;
            rec.error = Some(ConvertError::UnsupportedFormat(ext).to_string());
            debug!("unsupported");
            return rec;
        }

        match self.acquire_and_convert(session, rel, &mut rec) {
            Ok(()) => rec.status = BatchStatus::Ok,
            Err(err) => {
                warn!("failed ({}): {}", err.kind(), err);
                rec.status = BatchStatus::Failed;
                rec.error = Some(err.to_string());
            }
        }
        debug!("finished in {:?} status={}", started.elapsed(), rec.status.as_str());
        rec
    }

    fn acquire_and_convert(
        &self,
        session: &mut Session<'_>,
        rel: &str,
        rec: &mut BatchRecord,
    ) -> ConvertResult<()> {
        ensure_dir(&self.work_dir).map_err(|e| ConvertError::Acquisition(format!("{e:#}")))?;
        // Dropped (and deleted) on every return path below.
        let workspace = tempfile::Builder::new()
            .prefix("sigfuse-")
            .tempdir_in(&self.work_dir)?;

        let local = session.acquire(rel, workspace.path())?;
        rec.local_path = Some(local.clone());
        ensure_dir(&self.out_dir).map_err(|e| ConvertError::write(format!("{e:#}")))?;

        let ext = local
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.cfg.formats.is_imaging(&ext) {
            let store = self.imaging.convert(&local, &self.out_dir)?;
            attach_store_attributes(&store, session.collection_id(), session.metadata())?;
            rec.descriptor_id = Some(IMAGING_DESCRIPTOR_ID.to_string());
            rec.std_path = Some(store);
            rec.written = true;
            return Ok(());
        }

        let mut overrides = Map::new();
        overrides.insert(
            "collection_metadata".into(),
            session.metadata().cloned().unwrap_or(Value::Null),
        );
        overrides.insert(
            "collection_id".into(),
            Value::String(session.collection_id().to_string()),
        );
        self.map_and_write(&local, session.collection_key(), overrides, rec)
    }

    pub fn map_and_write(
        &self,
        local: &Path,
        collection_key: Option<u64>,
        mut overrides: Map<String, Value>,
        rec: &mut BatchRecord,
    ) -> ConvertResult<()> {
        let invoker = ReaderInvoker::new(self.readers);
        let selection = MappingSelector::new(self.store, invoker).select(local, collection_key);
        rec.mapping_score = Some(selection.score());
        let best = selection.best.ok_or(ConvertError::NoUsableMapping)?;
        rec.descriptor_id = Some(best.descriptor.id.clone());

        let stem = local
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let base = self.out_dir.join(format!("{stem}_std"));
        let target = self.writer.output_path(&base);

        if target.exists() && !self.overwrite {
            info!("{} exists; reusing (overwrite=false)", target.display());
            rec.std_path = Some(target);
            rec.written = false;
            return Ok(());
        }

        if self.cfg.hashing.record_source_checksum {
            match hash_file(self.cfg, local) {
                Ok(h) => {
                    overrides.insert("source_sha256".into(), Value::String(h));
                }
                Err(e) => warn!("checksum of {} failed: {e:#}", local.display()),
            }
        }

        let original = local
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let req = WriteRequest {
            overrides: Some(&overrides),
            ..WriteRequest::new(&best.result, best.descriptor, &original)
        };
        let path = self.writer.write(&base, &req)?;
        rec.std_path = Some(path);
        rec.written = true;
        Ok(())
    }

    pub fn convert_local(&self, input: &Path) -> BatchRecord {
        let mut rec = BatchRecord::pending(&input.display().to_string());
        rec.local_path = Some(input.to_path_buf());
        let result = ensure_dir(&self.out_dir)
            .map_err(|e| ConvertError::write(format!("{e:#}")))
            .and_then(|_| self.map_and_write(input, None, Map::new(), &mut rec));
        match result {
            Ok(()) => rec.status = BatchStatus::Ok,
            Err(err) => {
                warn!("{}: {}", input.display(), err);
                rec.status = BatchStatus::Failed;
                rec.error = Some(err.to_string());
            }
        }
        rec
    }

    pub fn write_report(&self, outcome: &BatchOutcome) -> Result<PathBuf> {
        let report = BatchReport {
            collection_id: outcome.collection_id.clone(),
            started: outcome.started.clone(),
            finished: outcome.finished.clone(),
            container: self.writer.options().kind.to_string(),
            summary: outcome.summary(),
            records: outcome.records.clone(),
        };
        ensure_dir(&self.out_dir)?;
        let path = self.out_dir.join(&self.cfg.output.batch_report_filename);
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased_with_dot() {
        assert_eq!(extension_of("primary/a/B.CSV"), ".csv");
        assert_eq!(extension_of("primary/README"), "");
    }
}
