use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embedding::Embedder;
use crate::error::{ExtractError, Result};
use crate::index::EmbeddingIndex;
use crate::page::load_pdf;
use crate::reader::{Inference, ValueReader};
use crate::scanner::PageScanner;

pub const DEFAULT_TOP_K: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    pub use_embedding_filter: bool,
    pub top_k: usize,
    pub jobs: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            use_embedding_filter: true,
            top_k: DEFAULT_TOP_K,
            jobs: 1,
        }
    }
}

/// Result recorded for one paper. Serialises as a bare array of values, or
/// as `{"error": "..."}` when the paper could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaperOutcome {
    Values(Vec<String>),
    Failed { error: String },
}

impl PaperOutcome {
    pub fn values(&self) -> Option<&[String]> {
        match self {
            PaperOutcome::Values(values) => Some(values),
            PaperOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PaperOutcome::Failed { .. })
    }
}

pub type ExtractionResults = BTreeMap<String, PaperOutcome>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub papers: usize,
    pub with_values: usize,
    pub ambiguous: usize,
    pub failed: usize,
}

impl ExtractionSummary {
    pub fn from_results(results: &ExtractionResults) -> Self {
        let mut summary = Self {
            papers: results.len(),
            ..Self::default()
        };
        for outcome in results.values() {
            match outcome {
                PaperOutcome::Values(values) if values.len() > 1 => {
                    summary.with_values += 1;
                    summary.ambiguous += 1;
                }
                PaperOutcome::Values(values) if !values.is_empty() => summary.with_values += 1,
                PaperOutcome::Values(_) => {}
                PaperOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

pub struct ExtractionDriver {
    inference: Arc<dyn Inference>,
    embedder: Option<Arc<dyn Embedder>>,
    options: DriverOptions,
}

impl ExtractionDriver {
    pub fn new(
        inference: Arc<dyn Inference>,
        embedder: Option<Arc<dyn Embedder>>,
        options: DriverOptions,
    ) -> Result<Self> {
        if options.use_embedding_filter && embedder.is_none() {
            return Err(ExtractError::Configuration(
                "embedding filter enabled but no embedding provider configured".to_string(),
            ));
        }
        if options.top_k == 0 {
            return Err(ExtractError::Configuration(
                "top_k must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            inference,
            embedder,
            options,
        })
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Extracts `target` from every paper. Per-paper failures are recorded in
    /// the returned map; configuration errors abort the run.
    pub fn run(&self, target: &str, papers: &[PathBuf]) -> Result<ExtractionResults> {
        let reader = ValueReader::new(target, self.inference.clone())?;
        let ids = paper_identifiers(papers);
        let started = Instant::now();
        info!(
            papers = papers.len(),
            target_quantity = reader.target(),
            filter = self.options.use_embedding_filter,
            "starting extraction"
        );
        let mut seen = HashSet::new();
        let work: Vec<(&PathBuf, String)> = papers
            .iter()
            .zip(ids)
            .filter(|(_, id)| seen.insert(id.clone()))
            .collect();
        let outcomes: Vec<(String, PaperOutcome)> = if self.options.jobs > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.jobs)
                .build()
                .map_err(|e| ExtractError::Configuration(format!("thread pool: {e}")))?;
            pool.install(|| {
                work.par_iter()
                    .map(|(path, id)| self.outcome(&reader, path, id))
                    .collect::<Result<Vec<_>>>()
            })?
        } else {
            work.iter()
                .map(|(path, id)| self.outcome(&reader, path, id))
                .collect::<Result<Vec<_>>>()?
        };
        let results: ExtractionResults = outcomes.into_iter().collect();
        let summary = ExtractionSummary::from_results(&results);
        info!(
            papers = summary.papers,
            with_values = summary.with_values,
            ambiguous = summary.ambiguous,
            failed = summary.failed,
            elapsed = ?started.elapsed(),
            "extraction finished"
        );
        Ok(results)
    }

    /// Per-paper failures become [`PaperOutcome::Failed`]; a configuration
    /// error is returned so collection stops at the first one.
    fn outcome(
        &self,
        reader: &ValueReader,
        path: &Path,
        id: &str,
    ) -> Result<(String, PaperOutcome)> {
        let outcome = match self.process(reader, path, id) {
            Ok(values) => PaperOutcome::Values(values),
            Err(err) if err.is_configuration() => return Err(err),
            Err(err) => {
                warn!(paper = %id, "extraction failed: {err}");
                PaperOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        Ok((id.to_string(), outcome))
    }

    fn process(&self, reader: &ValueReader, path: &Path, id: &str) -> Result<Vec<String>> {
        let pages = load_pdf(path)?;
        let pages = if self.options.use_embedding_filter {
            let embedder = self.embedder.as_deref().ok_or_else(|| {
                ExtractError::Configuration("no embedding provider configured".to_string())
            })?;
            let index = EmbeddingIndex::build(pages, embedder)?;
            index.query(reader.target(), self.options.top_k, embedder)?
        } else {
            pages
        };
        PageScanner::from_pages(id, pages).scan(reader)
    }
}

/// File names identify papers; when two inputs share a file name the full
/// path is used for both.
pub fn paper_identifiers(papers: &[PathBuf]) -> Vec<String> {
    let names: Vec<String> = papers
        .iter()
        .map(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
        .collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &names {
        *counts.entry(name.as_str()).or_default() += 1;
    }
    papers
        .iter()
        .zip(names.iter())
        .map(|(path, name)| {
            if counts.get(name.as_str()).copied().unwrap_or(0) > 1 {
                path.display().to_string()
            } else {
                name.clone()
            }
        })
        .collect()
}

pub fn write_results(path: &Path, results: &ExtractionResults) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), results)?;
    Ok(())
}

pub fn read_results(path: &Path) -> Result<ExtractionResults> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClient;
    use serde_json::json;

    struct Never;

    impl Inference for Never {
        fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok("NA".to_string())
        }
    }

    #[test]
    fn outcome_serialisation_shapes() {
        let mut results = ExtractionResults::new();
        results.insert(
            "a.pdf".to_string(),
            PaperOutcome::Values(vec!["1 ms".to_string()]),
        );
        results.insert(
            "b.pdf".to_string(),
            PaperOutcome::Failed {
                error: "file not found".to_string(),
            },
        );
        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(
            value,
            json!({ "a.pdf": ["1 ms"], "b.pdf": { "error": "file not found" } })
        );
        let back: ExtractionResults = serde_json::from_value(value).unwrap();
        assert_eq!(back, results);
    }

    #[test]
    fn duplicate_file_names_fall_back_to_paths() {
        let papers = vec![
            PathBuf::from("one/paper.pdf"),
            PathBuf::from("two/paper.pdf"),
            PathBuf::from("two/other.pdf"),
        ];
        assert_eq!(
            paper_identifiers(&papers),
            vec!["one/paper.pdf", "two/paper.pdf", "other.pdf"]
        );
    }

    #[test]
    fn filter_without_embedder_is_rejected_up_front() {
        let err = ExtractionDriver::new(Arc::new(Never), None, DriverOptions::default())
            .err()
            .unwrap();
        assert!(err.is_configuration());

        let options = DriverOptions {
            use_embedding_filter: false,
            ..DriverOptions::default()
        };
        assert!(ExtractionDriver::new(Arc::new(Never), None, options).is_ok());
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let options = DriverOptions {
            top_k: 0,
            ..DriverOptions::default()
        };
        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::hash());
        assert!(ExtractionDriver::new(Arc::new(Never), Some(embedder), options).is_err());
    }

    #[test]
    fn summary_counts_each_kind() {
        let mut results = ExtractionResults::new();
        results.insert("a".into(), PaperOutcome::Values(vec![]));
        results.insert("b".into(), PaperOutcome::Values(vec!["1".into()]));
        results.insert("c".into(), PaperOutcome::Values(vec!["1".into(), "2".into()]));
        results.insert("d".into(), PaperOutcome::Failed { error: "x".into() });
        assert_eq!(
            ExtractionSummary::from_results(&results),
            ExtractionSummary {
                papers: 4,
                with_values: 2,
                ambiguous: 1,
                failed: 1,
            }
        );
    }
}
