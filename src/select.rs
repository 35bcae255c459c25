use crate::{
    descriptor::{Descriptor, DescriptorStore},
    evaluate::evaluate,
    model::CanonicalResult,
    reader::ReaderInvoker,
    score::score,
};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MatchOutcome<'a> {
    pub descriptor: &'a Descriptor,
    pub result: CanonicalResult,
    pub score: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub descriptor_id: String,
    pub score: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    CollectionKey,
    Extension,
    AllDescriptors,
}

#[derive(Debug)]
pub struct Selection<'a> {
    pub best: Option<MatchOutcome<'a>>,
    pub source: CandidateSource,
    pub attempts: Vec<CandidateReport>,
}

impl Selection<'_> {
    pub fn score(&self) -> i64 {
        self.best.as_ref().map(|b| b.score as i64).unwrap_or(-1)
    }

    pub fn descriptor_id(&self) -> Option<&str> {
        self.best.as_ref().map(|b| b.descriptor.id.as_str())
    }
}

pub struct MappingSelector<'a> {
    store: &'a DescriptorStore,
    invoker: ReaderInvoker<'a>,
}

impl<'a> MappingSelector<'a> {
    pub fn new(store: &'a DescriptorStore, invoker: ReaderInvoker<'a>) -> Self {
        Self { store, invoker }
    }

    pub fn candidates(&self, path: &Path, collection_key: Option<u64>) -> (Vec<&'a Descriptor>, CandidateSource) {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (found, source) = match collection_key {
            Some(key) => (self.store.by_collection_key(key), CandidateSource::CollectionKey),
            None => (self.store.by_extension(&ext), CandidateSource::Extension),
        };
        if !found.is_empty() {
            return (found, source);
        }

        warn!(
            "no descriptor matched collection_key={:?} or extension '.{}'; trying all {}",
            collection_key,
            ext,
            self.store.len()
        );
        (self.store.all().iter().collect(), CandidateSource::AllDescriptors)
    }

    /// Try every candidate in enumeration order and keep the first one that
    /// reaches the highest score.
    pub fn select(&self, path: &Path, collection_key: Option<u64>) -> Selection<'a> {
        let (candidates, source) = self.candidates(path, collection_key);
        let mut best: Option<MatchOutcome<'a>> = None;
        let mut attempts = Vec::with_capacity(candidates.len());

        for descriptor in candidates {
            let attempt = self
                .invoker
                .invoke(descriptor, path)
                .and_then(|parsed| evaluate(descriptor, &parsed));

            match attempt {
                Ok(result) => {
                    let s = score(&result, descriptor);
                    debug!("candidate {} scored {}", descriptor.id, s);
                    attempts.push(CandidateReport {
                        descriptor_id: descriptor.id.clone(),
                        score: Some(s),
                        error: None,
                    });
                    if best.as_ref().is_none_or(|b| s > b.score) {
                        best = Some(MatchOutcome {
                            descriptor,
                            result,
                            score: s,
                        });
                    }
                }
                Err(err) => {
                    warn!("mapping {} failed: {}", descriptor.id, err);
                    attempts.push(CandidateReport {
                        descriptor_id: descriptor.id.clone(),
                        score: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        match &best {
            Some(b) => info!(
                "selected descriptor {} score={} for {}",
                b.descriptor.id,
                b.score,
                path.display()
            ),
            None => warn!("no usable mapping for {}", path.display()),
        }

        Selection {
            best,
            source,
            attempts,
        }
    }
}
