use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Ok,
    Failed,
    Unsupported,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Ok => "ok",
            BatchStatus::Failed => "failed",
            BatchStatus::Unsupported => "unsupported",
        }
    }
}

/// Outcome of one input file. Finalized once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub rel_path: String,
    pub local_path: Option<PathBuf>,
    pub std_path: Option<PathBuf>,
    pub descriptor_id: Option<String>,
    pub mapping_score: Option<i64>,
    pub status: BatchStatus,
    pub error: Option<String>,
    #[serde(default)]
    pub written: bool,
}

impl BatchRecord {
    pub fn pending(rel_path: &str) -> Self {
        Self {
            rel_path: rel_path.to_string(),
            local_path: None,
            std_path: None,
            descriptor_id: None,
            mapping_score: None,
            status: BatchStatus::Pending,
            error: None,
            written: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == BatchStatus::Ok
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub ok: usize,
    pub failed: usize,
    pub unsupported: usize,
    pub written: usize,
}

impl BatchSummary {
    pub fn from_records(records: &[BatchRecord]) -> Self {
        let count = |s: BatchStatus| records.iter().filter(|r| r.status == s).count();
        Self {
            total: records.len(),
            ok: count(BatchStatus::Ok),
            failed: count(BatchStatus::Failed),
            unsupported: count(BatchStatus::Unsupported),
            written: records.iter().filter(|r| r.written).count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub collection_id: String,
    pub started: String,
    pub finished: String,
    pub container: String,
    pub summary: BatchSummary,
    pub records: Vec<BatchRecord>,
}
